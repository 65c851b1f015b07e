//! Cycle state machine vocabulary.

use serde::Serialize;

/// Where the control loop is within a cycle.
///
/// ```text
/// Idle → Discovering → HealthChecking → Scaling → Reporting → Idle
///            └──────────────┴──────────────┴──────────┴──→ Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Discovering,
    HealthChecking,
    Scaling,
    Reporting,
    Failed,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Discovering => "discovering",
            CyclePhase::HealthChecking => "health checking",
            CyclePhase::Scaling => "scaling",
            CyclePhase::Reporting => "reporting",
            CyclePhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Terminal status of a cycle that produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    /// Every pipeline stage completed.
    Success,
    /// A report was produced but some stage did not complete.
    Degraded,
}

impl CycleStatus {
    pub fn from_progress(progress: u8) -> Self {
        if progress >= 100 {
            CycleStatus::Success
        } else {
            CycleStatus::Degraded
        }
    }
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleStatus::Success => f.write_str("success"),
            CycleStatus::Degraded => f.write_str("degraded"),
        }
    }
}
