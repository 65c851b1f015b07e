//! Scaling decider — one pure decision per service per cycle.
//!
//! Compares a fresh `MetricSample` against `ScalingBounds` and proposes a
//! replica count. Scale-up is considered before scale-down, and the
//! proposed count is always inside `[min_replicas, max_replicas]`.

use serde::Serialize;
use tracing::debug;

use fleet_core::{MetricSample, ResourceRequest, ResourceTotals, ScalingBounds, ServiceSpec};

/// What the decider wants done with a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    NoAction,
}

impl ScaleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleAction::ScaleUp => "scale-up",
            ScaleAction::ScaleDown => "scale-down",
            ScaleAction::NoAction => "no-action",
        }
    }
}

impl std::fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which rule produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleTrigger {
    CpuHigh,
    MemoryHigh,
    ResponseTimeHigh,
    Underutilized,
    /// Replica count found below `min_replicas`.
    BelowMinimum,
    /// Replica count found above `max_replicas`.
    AboveMaximum,
    /// Load is high but the service already runs `max_replicas`.
    AtMaxUnderLoad,
    WithinTargets,
}

/// A scaling decision for a single service.
///
/// Only `decide` constructs one, so `proposed_replicas` is always within
/// the bounds it was decided under.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingDecision {
    service: String,
    action: ScaleAction,
    previous_replicas: u32,
    proposed_replicas: u32,
    trigger: ScaleTrigger,
    justification: String,
    resources: ResourceRequest,
}

impl ScalingDecision {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn action(&self) -> ScaleAction {
        self.action
    }

    pub fn previous_replicas(&self) -> u32 {
        self.previous_replicas
    }

    pub fn proposed_replicas(&self) -> u32 {
        self.proposed_replicas
    }

    pub fn trigger(&self) -> ScaleTrigger {
        self.trigger
    }

    pub fn justification(&self) -> &str {
        &self.justification
    }

    /// Per-replica resource request of the service.
    pub fn resources(&self) -> ResourceRequest {
        self.resources
    }

    pub fn resources_before(&self) -> ResourceTotals {
        self.resources.total(self.previous_replicas)
    }

    pub fn resources_after(&self) -> ResourceTotals {
        self.resources.total(self.proposed_replicas)
    }

    pub fn is_change(&self) -> bool {
        self.previous_replicas != self.proposed_replicas
    }
}

/// Decide how many replicas `spec` should run given `sample`.
pub fn decide(spec: &ServiceSpec, sample: &MetricSample, bounds: &ScalingBounds) -> ScalingDecision {
    let current = spec.replicas;
    let (action, proposed, trigger, justification) = evaluate(current, sample, bounds);

    debug!(
        service = %spec.name,
        action = %action,
        from = current,
        to = proposed,
        cpu = sample.cpu_percent,
        memory = sample.memory_percent,
        response_ms = sample.response_time_ms,
        "scaling decision"
    );

    ScalingDecision {
        service: spec.name.clone(),
        action,
        previous_replicas: current,
        proposed_replicas: proposed,
        trigger,
        justification,
        resources: spec.resources,
    }
}

fn evaluate(
    current: u32,
    sample: &MetricSample,
    bounds: &ScalingBounds,
) -> (ScaleAction, u32, ScaleTrigger, String) {
    let min = bounds.min_replicas;
    let max = bounds.max_replicas.max(min);

    // Out-of-bounds counts are repaired before thresholds are consulted.
    if current < min {
        return (
            ScaleAction::ScaleUp,
            min,
            ScaleTrigger::BelowMinimum,
            format!("{current} replicas below minimum {min}"),
        );
    }
    if current > max {
        return (
            ScaleAction::ScaleDown,
            max,
            ScaleTrigger::AboveMaximum,
            format!("{current} replicas above maximum {max}"),
        );
    }

    let overload = overload(sample, bounds);

    if let Some((trigger, why)) = &overload
        && current < max
    {
        let proposed = current.saturating_add(bounds.scale_step).min(max);
        return (ScaleAction::ScaleUp, proposed, *trigger, why.clone());
    }

    let underutilized = sample.cpu_percent < bounds.scale_down_threshold
        && sample.memory_percent < bounds.scale_down_threshold
        && sample.response_time_ms < bounds.response_time_alert_ms / 2.0
        && current > min;
    if underutilized {
        let proposed = current.saturating_sub(bounds.scale_step).max(min);
        return (
            ScaleAction::ScaleDown,
            proposed,
            ScaleTrigger::Underutilized,
            format!(
                "cpu {:.1}% and memory {:.1}% below {:.1}%, response time {:.0}ms below {:.0}ms",
                sample.cpu_percent,
                sample.memory_percent,
                bounds.scale_down_threshold,
                sample.response_time_ms,
                bounds.response_time_alert_ms / 2.0
            ),
        );
    }

    match overload {
        Some((_, why)) => (
            ScaleAction::NoAction,
            current,
            ScaleTrigger::AtMaxUnderLoad,
            format!("{why}, already at maximum {max}"),
        ),
        None => (
            ScaleAction::NoAction,
            current,
            ScaleTrigger::WithinTargets,
            "metrics within targets".to_string(),
        ),
    }
}

/// The first scale-up threshold `sample` exceeds, if any.
fn overload(sample: &MetricSample, bounds: &ScalingBounds) -> Option<(ScaleTrigger, String)> {
    if sample.cpu_percent > bounds.scale_up_threshold {
        Some((
            ScaleTrigger::CpuHigh,
            format!(
                "cpu {:.1}% above {:.1}%",
                sample.cpu_percent, bounds.scale_up_threshold
            ),
        ))
    } else if sample.memory_percent > bounds.scale_up_threshold {
        Some((
            ScaleTrigger::MemoryHigh,
            format!(
                "memory {:.1}% above {:.1}%",
                sample.memory_percent, bounds.scale_up_threshold
            ),
        ))
    } else if sample.response_time_ms > bounds.response_time_alert_ms {
        Some((
            ScaleTrigger::ResponseTimeHigh,
            format!(
                "response time {:.0}ms above {:.0}ms",
                sample.response_time_ms, bounds.response_time_alert_ms
            ),
        ))
    } else {
        None
    }
}
