//! The built-in check catalog.
//!
//! Infrastructure checks take their target from `[health.probes.<name>]`;
//! `service-endpoints` and `security-policy` run against the inventory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::{parse_duration, CheckName, HealthSection, ProbeTarget, ServiceSpec};

use crate::checker::{
    freshness_probe, http_probe, tcp_probe, CheckError, CheckFuture, CheckScope, HealthCheck,
};

/// Lowest port a service may listen on without elevated privileges.
const FIRST_UNPRIVILEGED_PORT: u16 = 1024;

/// TCP connect to a fixed address.
#[derive(Debug, Clone)]
pub struct TcpCheck {
    pub name: CheckName,
    pub address: String,
}

impl HealthCheck for TcpCheck {
    fn name(&self) -> CheckName {
        self.name
    }

    fn probe<'a>(&'a self, _service: Option<&'a ServiceSpec>) -> CheckFuture<'a> {
        Box::pin(tcp_probe(&self.address))
    }
}

/// HTTP GET against a fixed address, passing on 2xx.
#[derive(Debug, Clone)]
pub struct HttpCheck {
    pub name: CheckName,
    pub address: String,
    pub path: String,
}

impl HealthCheck for HttpCheck {
    fn name(&self) -> CheckName {
        self.name
    }

    fn probe<'a>(&'a self, _service: Option<&'a ServiceSpec>) -> CheckFuture<'a> {
        Box::pin(async move {
            let uri = format!("http://{}{}", self.address, self.path);
            http_probe(&self.address, &self.path).await.into_check(&uri)
        })
    }
}

/// File or directory freshness (backups, certificate bundles).
#[derive(Debug, Clone)]
pub struct FreshFileCheck {
    pub name: CheckName,
    pub path: PathBuf,
    pub max_age: Duration,
}

impl HealthCheck for FreshFileCheck {
    fn name(&self) -> CheckName {
        self.name
    }

    fn probe<'a>(&'a self, _service: Option<&'a ServiceSpec>) -> CheckFuture<'a> {
        Box::pin(freshness_probe(&self.path, self.max_age))
    }
}

/// Per-service HTTP probe of `health_path`.
#[derive(Debug, Clone, Default)]
pub struct EndpointCheck;

impl HealthCheck for EndpointCheck {
    fn name(&self) -> CheckName {
        CheckName::ServiceEndpoints
    }

    fn scope(&self) -> CheckScope {
        CheckScope::PerService
    }

    fn probe<'a>(&'a self, service: Option<&'a ServiceSpec>) -> CheckFuture<'a> {
        Box::pin(async move {
            let spec = service.ok_or_else(|| CheckError::Failed("no service given".into()))?;
            let address = spec.address();
            let uri = format!("http://{address}{}", spec.health_path);
            http_probe(&address, &spec.health_path).await.into_check(&uri)
        })
    }
}

/// Per-service static policy: unprivileged port, non-zero resource
/// requests, at least one replica.
#[derive(Debug, Clone, Default)]
pub struct PolicyCheck;

impl PolicyCheck {
    /// Every rule `spec` breaks.
    pub fn violations(spec: &ServiceSpec) -> Vec<String> {
        let mut violations = Vec::new();
        if spec.port < FIRST_UNPRIVILEGED_PORT {
            violations.push(format!("privileged port {}", spec.port));
        }
        if spec.resources.cpu_millis == 0 || spec.resources.memory_mib == 0 {
            violations.push("missing resource requests".to_string());
        }
        if spec.replicas == 0 {
            violations.push("zero replicas".to_string());
        }
        violations
    }
}

impl HealthCheck for PolicyCheck {
    fn name(&self) -> CheckName {
        CheckName::SecurityPolicy
    }

    fn scope(&self) -> CheckScope {
        CheckScope::PerService
    }

    fn probe<'a>(&'a self, service: Option<&'a ServiceSpec>) -> CheckFuture<'a> {
        let outcome = match service {
            Some(spec) => {
                let violations = Self::violations(spec);
                if violations.is_empty() {
                    Ok(())
                } else {
                    Err(CheckError::Failed(violations.join(", ")))
                }
            }
            None => Err(CheckError::Failed("no service given".into())),
        };
        Box::pin(async move { outcome })
    }
}

/// Stands in for a check whose probe target is missing, so the configured
/// battery still yields one result per name.
#[derive(Debug, Clone)]
pub struct UnconfiguredCheck {
    pub name: CheckName,
}

impl HealthCheck for UnconfiguredCheck {
    fn name(&self) -> CheckName {
        self.name
    }

    fn probe<'a>(&'a self, _service: Option<&'a ServiceSpec>) -> CheckFuture<'a> {
        let name = self.name;
        Box::pin(async move { Err(CheckError::Failed(format!("no probe target configured for {name}"))) })
    }
}

/// Build the check for `name` from its configured target.
pub fn build_check(name: CheckName, target: Option<&ProbeTarget>) -> Arc<dyn HealthCheck> {
    match (name, target) {
        (CheckName::ServiceEndpoints, _) => Arc::new(EndpointCheck),
        (CheckName::SecurityPolicy, _) => Arc::new(PolicyCheck),
        (_, Some(ProbeTarget::Tcp { address })) => Arc::new(TcpCheck {
            name,
            address: address.clone(),
        }),
        (_, Some(ProbeTarget::Http { address, path })) => Arc::new(HttpCheck {
            name,
            address: address.clone(),
            path: path.clone(),
        }),
        (_, Some(ProbeTarget::File { path, max_age })) => match parse_duration(max_age) {
            Some(max_age) => Arc::new(FreshFileCheck {
                name,
                path: path.clone(),
                max_age,
            }),
            None => Arc::new(UnconfiguredCheck { name }),
        },
        (_, None) => Arc::new(UnconfiguredCheck { name }),
    }
}

/// Build the configured battery, in configured order.
pub fn catalog(section: &HealthSection) -> Vec<Arc<dyn HealthCheck>> {
    section
        .checks
        .iter()
        .map(|name| build_check(*name, section.probe(*name)))
        .collect()
}
