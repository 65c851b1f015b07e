//! Domain types shared by every fleet subsystem.
//!
//! `ServiceSpec` is loaded once per run from configuration and is read-only
//! to the control loop. `MetricSample` is produced fresh every cycle by a
//! metric source and never persisted. `ScalingBounds` carries the tunables
//! the scaling decider is driven by.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique key of a managed service.
pub type ServiceName = String;

// ── Service ───────────────────────────────────────────────────────

/// Static configuration for one managed service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSpec {
    pub name: ServiceName,
    /// Host the service is reachable on (used for probes and sampling).
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Current replica count.
    pub replicas: u32,
    /// Semantic version string of the deployed build.
    pub version: String,
    /// HTTP path answering 2xx when the service is healthy.
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// HTTP path serving a JSON `MetricSample`.
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
    /// Resource request per replica.
    pub resources: ResourceRequest,
}

/// CPU/memory request for a single replica.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResourceRequest {
    /// CPU in millicores.
    pub cpu_millis: u32,
    /// Memory in MiB.
    pub memory_mib: u32,
}

impl ResourceRequest {
    /// Aggregate request for `replicas` replicas.
    pub fn total(&self, replicas: u32) -> ResourceTotals {
        ResourceTotals {
            cpu_millis: u64::from(self.cpu_millis) * u64::from(replicas),
            memory_mib: u64::from(self.memory_mib) * u64::from(replicas),
        }
    }
}

/// Summed resource requests across replicas or services.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResourceTotals {
    pub cpu_millis: u64,
    pub memory_mib: u64,
}

impl std::ops::AddAssign for ResourceTotals {
    fn add_assign(&mut self, rhs: Self) {
        self.cpu_millis += rhs.cpu_millis;
        self.memory_mib += rhs.memory_mib;
    }
}

impl ServiceSpec {
    /// `host:port` address used by probes.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_health_path() -> String {
    "/healthz".to_string()
}

fn default_metrics_path() -> String {
    "/metrics.json".to_string()
}

// ── Metrics ───────────────────────────────────────────────────────

/// Point-in-time utilization for one service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    /// CPU utilization (0–100).
    pub cpu_percent: f64,
    /// Memory utilization (0–100).
    pub memory_percent: f64,
    /// Requests per second.
    pub request_rate: f64,
    /// Response time in milliseconds.
    pub response_time_ms: f64,
}

impl MetricSample {
    pub fn new(cpu_percent: f64, memory_percent: f64, request_rate: f64, response_time_ms: f64) -> Self {
        Self {
            cpu_percent,
            memory_percent,
            request_rate,
            response_time_ms,
        }
    }

    /// Check that every field is finite and inside its documented range.
    pub fn validate(&self) -> Result<(), String> {
        let percent = |label: &str, v: f64| {
            if v.is_finite() && (0.0..=100.0).contains(&v) {
                Ok(())
            } else {
                Err(format!("{label} out of range 0-100: {v}"))
            }
        };
        let non_negative = |label: &str, v: f64| {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(format!("{label} must be >= 0: {v}"))
            }
        };
        percent("cpu_percent", self.cpu_percent)?;
        percent("memory_percent", self.memory_percent)?;
        non_negative("request_rate", self.request_rate)?;
        non_negative("response_time_ms", self.response_time_ms)
    }
}

// ── Health checks ─────────────────────────────────────────────────

/// The fixed battery of health checks, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckName {
    ClusterConnectivity,
    Database,
    Network,
    ServiceEndpoints,
    LoadBalancer,
    Monitoring,
    Logging,
    SecurityPolicy,
    BackupIntegrity,
    SslCertificates,
}

impl CheckName {
    pub const ALL: [CheckName; 10] = [
        CheckName::ClusterConnectivity,
        CheckName::Database,
        CheckName::Network,
        CheckName::ServiceEndpoints,
        CheckName::LoadBalancer,
        CheckName::Monitoring,
        CheckName::Logging,
        CheckName::SecurityPolicy,
        CheckName::BackupIntegrity,
        CheckName::SslCertificates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckName::ClusterConnectivity => "cluster-connectivity",
            CheckName::Database => "database",
            CheckName::Network => "network",
            CheckName::ServiceEndpoints => "service-endpoints",
            CheckName::LoadBalancer => "load-balancer",
            CheckName::Monitoring => "monitoring",
            CheckName::Logging => "logging",
            CheckName::SecurityPolicy => "security-policy",
            CheckName::BackupIntegrity => "backup-integrity",
            CheckName::SslCertificates => "ssl-certificates",
        }
    }

    /// Whether this check probes an external target that must be configured.
    ///
    /// `service-endpoints` and `security-policy` run against the inventory.
    pub fn needs_target(&self) -> bool {
        !matches!(self, CheckName::ServiceEndpoints | CheckName::SecurityPolicy)
    }
}

impl std::fmt::Display for CheckName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CheckName::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown health check: {s}"))
    }
}

// ── Scaling bounds ────────────────────────────────────────────────

/// Thresholds and limits the scaling decider works within.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalingBounds {
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// CPU or memory percent above which a service scales up.
    pub scale_up_threshold: f64,
    /// CPU and memory percent below which a service may scale down.
    pub scale_down_threshold: f64,
    /// Replicas added or removed per decision.
    pub scale_step: u32,
    /// Response time above which a service scales up.
    pub response_time_alert_ms: f64,
}

impl Default for ScalingBounds {
    fn default() -> Self {
        Self {
            min_replicas: 1,
            max_replicas: 10,
            scale_up_threshold: 75.0,
            scale_down_threshold: 25.0,
            scale_step: 1,
            response_time_alert_ms: 1000.0,
        }
    }
}

impl ScalingBounds {
    /// Reject bounds the decider cannot honor.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_replicas == 0 {
            return Err("max_replicas must be at least 1".into());
        }
        if self.min_replicas > self.max_replicas {
            return Err(format!(
                "min_replicas ({}) exceeds max_replicas ({})",
                self.min_replicas, self.max_replicas
            ));
        }
        if self.scale_step == 0 {
            return Err("scale_step must be at least 1".into());
        }
        for (label, v) in [
            ("scale_up_threshold", self.scale_up_threshold),
            ("scale_down_threshold", self.scale_down_threshold),
        ] {
            if !v.is_finite() || !(0.0..=100.0).contains(&v) {
                return Err(format!("{label} out of range 0-100: {v}"));
            }
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(format!(
                "scale_down_threshold ({}) must be below scale_up_threshold ({})",
                self.scale_down_threshold, self.scale_up_threshold
            ));
        }
        if !self.response_time_alert_ms.is_finite() || self.response_time_alert_ms <= 0.0 {
            return Err(format!(
                "response_time_alert_ms must be positive: {}",
                self.response_time_alert_ms
            ));
        }
        Ok(())
    }
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bounds_are_valid() {
        assert!(ScalingBounds::default().validate().is_ok());
    }

    #[test]
    fn bounds_reject_inverted_replicas() {
        let bounds = ScalingBounds {
            min_replicas: 5,
            max_replicas: 2,
            ..Default::default()
        };
        assert!(bounds.validate().unwrap_err().contains("exceeds"));
    }

    #[test]
    fn bounds_reject_overlapping_thresholds() {
        let bounds = ScalingBounds {
            scale_up_threshold: 40.0,
            scale_down_threshold: 60.0,
            ..Default::default()
        };
        assert!(bounds.validate().is_err());
    }

    #[test]
    fn bounds_reject_zero_step() {
        let bounds = ScalingBounds {
            scale_step: 0,
            ..Default::default()
        };
        assert!(bounds.validate().is_err());
    }

    #[test]
    fn sample_validation() {
        assert!(MetricSample::new(30.0, 30.0, 10.0, 100.0).validate().is_ok());
        assert!(MetricSample::new(130.0, 30.0, 10.0, 100.0).validate().is_err());
        assert!(MetricSample::new(30.0, f64::NAN, 10.0, 100.0).validate().is_err());
        assert!(MetricSample::new(30.0, 30.0, -1.0, 100.0).validate().is_err());
    }

    #[test]
    fn check_names_round_trip_through_str() {
        for name in CheckName::ALL {
            assert_eq!(name.as_str().parse::<CheckName>(), Ok(name));
        }
        assert!("disk-space".parse::<CheckName>().is_err());
        assert!(!CheckName::SecurityPolicy.needs_target());
        assert!(CheckName::Database.needs_target());
    }

    #[test]
    fn resource_totals_scale_with_replicas() {
        let req = ResourceRequest {
            cpu_millis: 250,
            memory_mib: 512,
        };
        let mut totals = req.total(4);
        assert_eq!(totals.cpu_millis, 1000);
        assert_eq!(totals.memory_mib, 2048);

        totals += req.total(1);
        assert_eq!(totals.cpu_millis, 1250);
    }
}
