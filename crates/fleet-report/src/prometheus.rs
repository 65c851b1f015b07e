//! Prometheus text exposition format.
//!
//! Renders a `FleetReport` for scraping via the node-exporter textfile
//! collector or any compatible agent.

use std::fmt::Write;

use crate::report::FleetReport;

/// Render one cycle's report in Prometheus text format.
pub fn render_prometheus(report: &FleetReport) -> String {
    let mut out = String::new();

    gauge(&mut out, "fleet_health_score", "Fraction of health checks that passed (0.0-1.0).");
    let _ = writeln!(out, "fleet_health_score {:.4}", report.health.score);

    gauge(&mut out, "fleet_health_checks", "Health checks run in the last cycle.");
    let _ = writeln!(out, "fleet_health_checks{{result=\"passed\"}} {}", report.health.passed);
    let _ = writeln!(out, "fleet_health_checks{{result=\"failed\"}} {}", report.health.failed);

    gauge(&mut out, "fleet_health_check_failed", "1 for every check that failed in the last cycle.");
    for check in &report.failed_checks {
        let _ = writeln!(out, "fleet_health_check_failed{{check=\"{}\"}} 1", check.name);
    }

    let s = &report.scaling;
    gauge(&mut out, "fleet_scaling_services", "Services by scaling outcome in the last cycle.");
    for (action, count) in [
        ("scale-up", s.scaled_up),
        ("scale-down", s.scaled_down),
        ("no-action", s.unchanged),
        ("failed", s.failed_services.len()),
    ] {
        let _ = writeln!(out, "fleet_scaling_services{{action=\"{action}\"}} {count}");
    }

    gauge(&mut out, "fleet_scaling_efficiency", "Fraction of services whose scaling unit completed.");
    let _ = writeln!(out, "fleet_scaling_efficiency {:.4}", s.efficiency);

    gauge(&mut out, "fleet_service_replicas", "Replica count proposed for each service.");
    for d in &s.decisions {
        let _ = writeln!(
            out,
            "fleet_service_replicas{{service=\"{}\"}} {}",
            escape(d.service()),
            d.proposed_replicas()
        );
    }

    gauge(&mut out, "fleet_requested_cpu_millis", "Summed CPU requests in millicores.");
    let _ = writeln!(out, "fleet_requested_cpu_millis{{phase=\"before\"}} {}", s.cpu_millis_before);
    let _ = writeln!(out, "fleet_requested_cpu_millis{{phase=\"after\"}} {}", s.cpu_millis_after);

    gauge(&mut out, "fleet_requested_memory_mib", "Summed memory requests in MiB.");
    let _ = writeln!(out, "fleet_requested_memory_mib{{phase=\"before\"}} {}", s.memory_mib_before);
    let _ = writeln!(out, "fleet_requested_memory_mib{{phase=\"after\"}} {}", s.memory_mib_after);

    gauge(&mut out, "fleet_report_generated_at_ms", "Unix time the report was built, in milliseconds.");
    let _ = writeln!(out, "fleet_report_generated_at_ms {}", report.generated_at);

    out
}

fn gauge(out: &mut String, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} gauge");
}

/// Escape a label value.
fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::build;
    use fleet_autoscale::decide;
    use fleet_core::{CheckName, MetricSample, ResourceRequest, ScalingBounds, ServiceSpec};
    use fleet_health::HealthCheckResult;

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            host: "127.0.0.1".to_string(),
            port: 9000,
            replicas: 2,
            version: "0.3.1".to_string(),
            health_path: "/healthz".to_string(),
            metrics_path: "/metrics.json".to_string(),
            resources: ResourceRequest {
                cpu_millis: 250,
                memory_mib: 128,
            },
        }
    }

    #[test]
    fn render_empty() {
        let output = render_prometheus(&build(&[], &[], &[]));
        // Should still have type declarations.
        assert!(output.contains("# HELP fleet_health_score"));
        assert!(output.contains("# TYPE fleet_health_score gauge"));
        assert!(output.contains("fleet_health_score 0.0000"));
    }

    #[test]
    fn render_populated_report() {
        let checks = vec![
            HealthCheckResult {
                name: CheckName::Database,
                passed: false,
                reason: "connect refused".to_string(),
                failed_services: Vec::new(),
                timestamp: 1,
            },
            HealthCheckResult {
                name: CheckName::Network,
                passed: true,
                reason: "ok".to_string(),
                failed_services: Vec::new(),
                timestamp: 1,
            },
        ];
        let decision = decide(
            &spec("api"),
            &MetricSample::new(90.0, 10.0, 1.0, 1.0),
            &ScalingBounds::default(),
        );
        let output = render_prometheus(&build(&checks, &[decision], &[]));

        assert!(output.contains("fleet_health_score 0.5000"));
        assert!(output.contains("fleet_health_checks{result=\"failed\"} 1"));
        assert!(output.contains("fleet_health_check_failed{check=\"database\"} 1"));
        assert!(output.contains("fleet_scaling_services{action=\"scale-up\"} 1"));
        assert!(output.contains("fleet_service_replicas{service=\"api\"} 3"));
        assert!(output.contains("fleet_requested_cpu_millis{phase=\"after\"} 750"));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let output = render_prometheus(&build(&[], &[], &[]));
        for line in output.lines() {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (metric, value) = line.rsplit_once(' ').unwrap();
            assert!(!metric.is_empty());
            assert!(value.parse::<f64>().is_ok(), "bad value in: {line}");
        }
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape("a\"b\\c"), "a\\\"b\\\\c");
    }
}
