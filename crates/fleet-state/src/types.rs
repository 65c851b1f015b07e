//! Record types persisted by the fleet state store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stages a cycle must complete for progress to reach 100%.
pub const PIPELINE_STAGES: [&str; 6] = [
    "discovery",
    "health",
    "scaling",
    "security",
    "reporting",
    "cleanup",
];

/// Component name of the per-cycle marker record.
pub const CYCLE_COMPONENT: &str = "cycle";

/// Status of a component at the time a record was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Completed,
    Failed,
    /// Answer for components with no record. Never persisted.
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status transition of one component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateRecord {
    /// Append sequence number; total order of the log.
    pub seq: u64,
    pub component: String,
    pub status: Status,
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    pub detail: String,
}

/// Renders the `component|status|timestamp|detail` tuple.
///
/// `detail` is last, so splitting on the first three `|` recovers the fields
/// even when the detail itself contains pipes.
impl fmt::Display for StateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.component, self.status, self.timestamp, self.detail
        )
    }
}

/// Component id for a single health check's observation.
pub fn health_component(check: &str) -> String {
    format!("health/{check}")
}

/// Check name of a `health/<check>` component id.
pub fn checked_name(component: &str) -> Option<&str> {
    component.strip_prefix("health/")
}

/// Component id for a single service's scaling unit.
pub fn scaling_component(service: &str) -> String {
    format!("scaling/{service}")
}

/// Service name of a `scaling/<service>` component id.
pub fn scaled_service(component: &str) -> Option<&str> {
    component.strip_prefix("scaling/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_renders_pipe_tuple() {
        let record = StateRecord {
            seq: 7,
            component: "scaling/api".to_string(),
            status: Status::Failed,
            timestamp: 1_700_000_000_000,
            detail: "scaler apply failed: a|b".to_string(),
        };
        let line = record.to_string();
        assert_eq!(line, "scaling/api|failed|1700000000000|scaler apply failed: a|b");

        let fields: Vec<&str> = line.splitn(4, '|').collect();
        assert_eq!(fields[3], "scaler apply failed: a|b");
    }

    #[test]
    fn scaling_component_round_trips() {
        assert_eq!(scaled_service(&scaling_component("api")), Some("api"));
        assert_eq!(scaled_service("health/database"), None);
        assert_eq!(checked_name(&health_component("database")), Some("database"));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Status::Completed).unwrap(), "\"completed\"");
    }
}
