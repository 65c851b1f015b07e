//! Report generator — folds one cycle's outputs into a `FleetReport`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use fleet_autoscale::{ScaleAction, ScaleTrigger, ScalingDecision};
use fleet_core::epoch_millis;
use fleet_health::{HealthCheckResult, HealthScore};
use fleet_state::{StateRecord, Status, checked_name, scaled_service};

use crate::recommend::{self, Recommendations};

/// Stage components that only summarize health checks.
const CHECK_STAGES: [&str; 2] = ["health", "security"];

/// Rollup of one cycle's scaling phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingSummary {
    pub services_evaluated: usize,
    pub scaled_up: usize,
    pub scaled_down: usize,
    pub unchanged: usize,
    /// Services whose scaling unit failed (metric fetch, apply, or panic).
    pub failed_services: Vec<String>,
    pub cpu_millis_before: u64,
    pub cpu_millis_after: u64,
    pub memory_mib_before: u64,
    pub memory_mib_after: u64,
    /// Fraction of evaluated services whose scaling unit completed.
    pub efficiency: f64,
    pub decisions: Vec<ScalingDecision>,
}

/// Most recent status of one component during the cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentStatus {
    pub component: String,
    pub status: Status,
    pub timestamp: u64,
    pub detail: String,
}

/// Everything a caller learns from one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetReport {
    /// Unix timestamp in milliseconds.
    pub generated_at: u64,
    pub health: HealthScore,
    pub failed_checks: Vec<HealthCheckResult>,
    pub scaling: ScalingSummary,
    pub components: Vec<ComponentStatus>,
    pub recommendations: Vec<String>,
}

impl FleetReport {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Build the report. Pure; empty inputs yield a zero-valued report.
pub fn build(
    health_results: &[HealthCheckResult],
    decisions: &[ScalingDecision],
    history: &[StateRecord],
) -> FleetReport {
    let components = latest_per_component(history);
    let failed_checks: Vec<HealthCheckResult> =
        health_results.iter().filter(|r| !r.passed).cloned().collect();
    let scaling = summarize_scaling(decisions, &components);

    let mut recs = Recommendations::default();
    for check in &failed_checks {
        for text in recommend::for_check(check.name) {
            recs.push(*text);
        }
    }
    if scaling.scaled_up > 0 {
        recs.push(recommend::for_scale_ups(scaling.scaled_up));
    }
    for d in decisions {
        if d.trigger() == ScaleTrigger::AtMaxUnderLoad {
            recs.push(recommend::for_pinned_at_max(d.service(), d.proposed_replicas()));
        }
    }
    // Failed checks already carry their own recommendations.
    for c in components.iter().filter(|c| {
        c.status == Status::Failed
            && checked_name(&c.component).is_none()
            && !CHECK_STAGES.contains(&c.component.as_str())
    }) {
        recs.push(recommend::for_failed_component(&c.component, &c.detail));
    }

    FleetReport {
        generated_at: epoch_millis(),
        health: HealthScore::from_results(health_results),
        failed_checks,
        scaling,
        components,
        recommendations: recs.finish(),
    }
}

/// Last record per component, sorted by component name.
fn latest_per_component(history: &[StateRecord]) -> Vec<ComponentStatus> {
    let mut latest: BTreeMap<&str, &StateRecord> = BTreeMap::new();
    for record in history {
        match latest.get(record.component.as_str()) {
            Some(prev) if prev.seq > record.seq => {}
            _ => {
                latest.insert(record.component.as_str(), record);
            }
        }
    }
    latest
        .into_values()
        .map(|r| ComponentStatus {
            component: r.component.clone(),
            status: r.status,
            timestamp: r.timestamp,
            detail: r.detail.clone(),
        })
        .collect()
}

fn summarize_scaling(decisions: &[ScalingDecision], components: &[ComponentStatus]) -> ScalingSummary {
    let failed: BTreeSet<&str> = components
        .iter()
        .filter(|c| c.status == Status::Failed)
        .filter_map(|c| scaled_service(&c.component))
        .collect();

    let mut evaluated: BTreeSet<&str> = components
        .iter()
        .filter_map(|c| scaled_service(&c.component))
        .collect();
    evaluated.extend(decisions.iter().map(|d| d.service()));

    let mut summary = ScalingSummary {
        services_evaluated: evaluated.len(),
        scaled_up: 0,
        scaled_down: 0,
        unchanged: 0,
        failed_services: failed.iter().map(|s| s.to_string()).collect(),
        cpu_millis_before: 0,
        cpu_millis_after: 0,
        memory_mib_before: 0,
        memory_mib_after: 0,
        efficiency: 0.0,
        decisions: decisions.to_vec(),
    };

    for d in decisions {
        let before = d.resources_before();
        // A failed apply leaves the service where it was.
        let after = if failed.contains(d.service()) {
            before
        } else {
            d.resources_after()
        };
        summary.cpu_millis_before += before.cpu_millis;
        summary.memory_mib_before += before.memory_mib;
        summary.cpu_millis_after += after.cpu_millis;
        summary.memory_mib_after += after.memory_mib;

        if failed.contains(d.service()) {
            continue;
        }
        match d.action() {
            ScaleAction::ScaleUp => summary.scaled_up += 1,
            ScaleAction::ScaleDown => summary.scaled_down += 1,
            ScaleAction::NoAction => summary.unchanged += 1,
        }
    }

    if summary.services_evaluated > 0 {
        let completed = summary.services_evaluated - failed.len();
        summary.efficiency = completed as f64 / summary.services_evaluated as f64;
    }
    summary
}
