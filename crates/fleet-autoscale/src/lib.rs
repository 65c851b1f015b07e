//! fleet-autoscale — replica-count decisions and their actuation.
//!
//! `decide` is a pure function of a service's current replica count, a
//! fresh metric sample, and the configured `ScalingBounds`. Applying the
//! result is left to a `ScalerExecutor`.
//!
//! # Decision rules
//!
//! ```text
//! replicas < min                                   → ScaleUp to min
//! replicas > max                                   → ScaleDown to max
//! (cpu > up || mem > up || rt > alert) && r < max  → ScaleUp   min(r + step, max)
//! cpu < down && mem < down && rt < alert/2 && r > min
//!                                                  → ScaleDown max(r - step, min)
//! otherwise                                        → NoAction
//! ```
//!
//! Scale-up is checked first so ambiguous signals grow capacity.

pub mod decider;
pub mod executor;

pub use decider::{ScaleAction, ScaleTrigger, ScalingDecision, decide};
pub use executor::{
    ApplyFuture, ApplyOutcome, ReplicaLedger, ScaleCallback, ScaleError, ScaleFuture,
    ScalerExecutor,
};
