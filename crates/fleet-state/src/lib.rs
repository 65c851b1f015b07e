//! fleet-state — durable, append-only record of control-loop progress.
//!
//! Backed by [redb](https://docs.rs/redb). Each status transition of a
//! component (a pipeline stage, a health check, a service's scaling unit)
//! is appended as a `StateRecord` under a monotonically increasing sequence
//! number. History is only ever appended to; "current status" is the last
//! record per component.
//!
//! # Tables
//!
//! ```text
//! records : seq        → StateRecord (JSON)   insert-only
//! latest  : component  → seq                  derived index
//! meta    : "cycle_start" → seq               progress scoping
//! replicas: service    → applied replica count restart recovery
//! ```
//!
//! Retention (`compact`) is a separate maintenance pass and is never run
//! from the write path.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
