//! fleet-health — the health check battery.
//!
//! A configured, ordered list of checks is run concurrently once per cycle.
//! Each check gets its own task and its own timeout, so one failing,
//! hanging, or panicking probe still leaves a result for every other check.
//!
//! ```text
//! HealthEvaluator::evaluate(fleet)
//!   ├── fleet checks        tcp / http / file-freshness probe, once
//!   └── per-service checks  service-endpoints, security-policy, once per spec
//!        └── Vec<HealthCheckResult>  (one per configured check, in order)
//!             └── HealthScore        passed / total → grade
//! ```

pub mod checker;
pub mod checks;
pub mod evaluator;
pub mod score;

pub use checker::{
    CheckError, CheckFuture, CheckScope, HealthCheck, HealthCheckResult, ProbeResult, http_probe,
};
pub use checks::{build_check, catalog};
pub use evaluator::HealthEvaluator;
pub use score::{HealthGrade, HealthScore};
