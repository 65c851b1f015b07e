//! fleet-control — the fleet health-and-autoscaling control loop.
//!
//! The `Orchestrator` is the only component that calls the others. Per
//! cycle it lists the inventory, runs the health battery, fans out one
//! scaling unit per service, and folds the results into a `FleetReport`.
//!
//! ```text
//! InventoryProvider ─→ HealthEvaluator ─→ [ScalingUnit × N] ─→ fleet_report::build
//!                                           │ MetricSource::sample (timeout)
//!                                           │ decide
//!                                           │ ScalerExecutor::apply (timeout)
//!                                           ▼
//!                                        StateStore (pending → completed | failed)
//! ```
//!
//! Failure policy:
//! - inventory unavailable: the cycle fails, no report
//! - a health check fails or panics: recorded, cycle continues
//! - a service's metric fetch or apply fails: recorded against that
//!   service, the rest of the fleet continues

pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod unit;

pub use error::CycleError;
pub use orchestrator::{CycleOutcome, CycleSettings, Orchestrator, stage};
pub use phase::{CyclePhase, CycleStatus};
pub use unit::UnitOutcome;
