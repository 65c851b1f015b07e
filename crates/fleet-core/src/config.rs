//! fleet.toml configuration parser.
//!
//! The configuration is parsed into typed structs once, at the boundary,
//! and validated before anything else runs. Nothing downstream re-parses
//! strings out of it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::duration::parse_duration;
use crate::types::{CheckName, ScalingBounds, ServiceSpec};

/// Errors raised while loading or validating a fleet config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FleetConfig {
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub scaling: ScalingBounds,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

/// Cycle timing and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Time between cycles when running as a loop.
    pub interval: String,
    /// Bound on a single metric fetch.
    pub metric_timeout: String,
    /// Bound on a single scaler apply.
    pub apply_timeout: String,
    /// Bound on a single health check.
    pub check_timeout: String,
    /// Bound on listing the inventory.
    pub inventory_timeout: String,
    /// Keep at most this many state records after each cycle.
    pub retention: Option<usize>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            interval: "60s".to_string(),
            metric_timeout: "2s".to_string(),
            apply_timeout: "10s".to_string(),
            check_timeout: "5s".to_string(),
            inventory_timeout: "10s".to_string(),
            retention: None,
        }
    }
}

impl ControlConfig {
    pub fn interval(&self) -> Duration {
        parse_duration(&self.interval).unwrap_or(Duration::from_secs(60))
    }

    pub fn metric_timeout(&self) -> Duration {
        parse_duration(&self.metric_timeout).unwrap_or(Duration::from_secs(2))
    }

    pub fn apply_timeout(&self) -> Duration {
        parse_duration(&self.apply_timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn check_timeout(&self) -> Duration {
        parse_duration(&self.check_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn inventory_timeout(&self) -> Duration {
        parse_duration(&self.inventory_timeout).unwrap_or(Duration::from_secs(10))
    }
}

/// Which checks run, in order, and what each one probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub checks: Vec<CheckName>,
    /// Probe target per check name (`[health.probes.database]`).
    pub probes: BTreeMap<String, ProbeTarget>,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            checks: vec![CheckName::ServiceEndpoints, CheckName::SecurityPolicy],
            probes: BTreeMap::new(),
        }
    }
}

impl HealthSection {
    /// Probe target configured for a check, if any.
    pub fn probe(&self, name: CheckName) -> Option<&ProbeTarget> {
        self.probes.get(name.as_str())
    }
}

/// What an infrastructure check connects to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeTarget {
    /// TCP connect to `host:port`.
    Tcp { address: String },
    /// HTTP GET answering 2xx.
    Http {
        address: String,
        #[serde(default = "default_probe_path")]
        path: String,
    },
    /// File or directory modified within `max_age`.
    File { path: PathBuf, max_age: String },
}

fn default_probe_path() -> String {
    "/".to_string()
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| ConfigError::Invalid(msg);

        self.scaling.validate().map_err(invalid)?;

        for (label, value) in [
            ("control.interval", &self.control.interval),
            ("control.metric_timeout", &self.control.metric_timeout),
            ("control.apply_timeout", &self.control.apply_timeout),
            ("control.check_timeout", &self.control.check_timeout),
            ("control.inventory_timeout", &self.control.inventory_timeout),
        ] {
            match parse_duration(value) {
                Some(d) if !d.is_zero() => {}
                _ => return Err(invalid(format!("{label}: bad duration {value:?}"))),
            }
        }

        let mut seen = HashSet::new();
        for name in &self.health.checks {
            if !seen.insert(*name) {
                return Err(invalid(format!("health check listed twice: {name}")));
            }
            if name.needs_target() && self.health.probe(*name).is_none() {
                return Err(invalid(format!("health check {name} has no probe target")));
            }
        }
        for (key, target) in &self.health.probes {
            key.parse::<CheckName>().map_err(invalid)?;
            if let ProbeTarget::File { max_age, .. } = target
                && parse_duration(max_age).is_none()
            {
                return Err(invalid(format!("health.probes.{key}: bad max_age {max_age:?}")));
            }
        }

        validate_services(&self.services)
    }
}

/// Reject inventories the control loop cannot key or probe.
pub fn validate_services(services: &[ServiceSpec]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for svc in services {
        if svc.name.trim().is_empty() {
            return Err(ConfigError::Invalid("service with empty name".into()));
        }
        if !names.insert(svc.name.as_str()) {
            return Err(ConfigError::Invalid(format!("duplicate service: {}", svc.name)));
        }
        if svc.port == 0 {
            return Err(ConfigError::Invalid(format!("service {}: port must be non-zero", svc.name)));
        }
        semver::Version::parse(&svc.version).map_err(|e| {
            ConfigError::Invalid(format!("service {}: version {:?}: {e}", svc.name, svc.version))
        })?;
    }
    Ok(())
}
