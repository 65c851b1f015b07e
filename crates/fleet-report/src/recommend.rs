//! Canned recommendations.

use fleet_core::CheckName;

pub const MAINTAIN_CURRENT: &str = "Fleet is healthy: maintain current configuration";

const CHECK_DNS: &str = "Check DNS resolution and service discovery";
const REVIEW_NETWORK_POLICY: &str = "Review network policies between control plane and nodes";
const REVIEW_SECURITY: &str = "Review security policies and access controls";

/// Recommendations for a failed check. Several checks share entries.
pub fn for_check(name: CheckName) -> &'static [&'static str] {
    match name {
        CheckName::ClusterConnectivity => &[
            "Verify cluster API reachability and node status",
            REVIEW_NETWORK_POLICY,
        ],
        CheckName::Database => &[
            "Check database connectivity and connection pool limits",
            "Verify database replication and failover configuration",
        ],
        CheckName::Network => &[REVIEW_NETWORK_POLICY, CHECK_DNS],
        CheckName::ServiceEndpoints => &[
            "Investigate failing service endpoints and restart unhealthy replicas",
            CHECK_DNS,
        ],
        CheckName::LoadBalancer => &["Verify load balancer target health and listener configuration"],
        CheckName::Monitoring => &["Restore the monitoring stack so scaling decisions see fresh metrics"],
        CheckName::Logging => &["Restore log shipping and check log storage capacity"],
        CheckName::SecurityPolicy => &[
            "Move services to unprivileged ports and set resource requests",
            REVIEW_SECURITY,
        ],
        CheckName::BackupIntegrity => &["Run a fresh backup and verify that it restores"],
        CheckName::SslCertificates => &["Renew expiring SSL certificates", REVIEW_SECURITY],
    }
}

pub fn for_scale_ups(count: usize) -> String {
    format!("Review capacity planning: {count} service(s) scaled up this cycle")
}

pub fn for_pinned_at_max(service: &str, max: u32) -> String {
    format!("Raise max_replicas above {max} or optimize {service}: overloaded at maximum replicas")
}

pub fn for_failed_component(component: &str, detail: &str) -> String {
    if detail.is_empty() {
        format!("Investigate failed component {component}")
    } else {
        format!("Investigate failed component {component}: {detail}")
    }
}

/// Ordered, duplicate-free recommendation list.
#[derive(Debug, Default)]
pub(crate) struct Recommendations(Vec<String>);

impl Recommendations {
    pub(crate) fn push(&mut self, text: impl Into<String>) {
        let text = text.into();
        if !self.0.contains(&text) {
            self.0.push(text);
        }
    }

    pub(crate) fn finish(mut self) -> Vec<String> {
        if self.0.is_empty() {
            self.0.push(MAINTAIN_CURRENT.to_string());
        }
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_check_has_a_recommendation() {
        for name in CheckName::ALL {
            assert!(!for_check(name).is_empty(), "{name} has no recommendation");
        }
    }

    #[test]
    fn duplicates_keep_first_position() {
        let mut recs = Recommendations::default();
        for text in for_check(CheckName::Network) {
            recs.push(*text);
        }
        for text in for_check(CheckName::ServiceEndpoints) {
            recs.push(*text);
        }
        let out = recs.finish();
        assert_eq!(out.len(), 3);
        assert_eq!(out[1], CHECK_DNS);
    }

    #[test]
    fn empty_list_gets_default() {
        assert_eq!(Recommendations::default().finish(), vec![MAINTAIN_CURRENT.to_string()]);
    }
}
