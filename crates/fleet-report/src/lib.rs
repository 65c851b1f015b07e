//! fleet-report — one `FleetReport` per cycle.
//!
//! `build` is pure aggregation over the cycle's health results, scaling
//! decisions and state history. Rendering is the caller's business; JSON
//! (via serde) and Prometheus text are provided.

pub mod prometheus;
pub mod recommend;
pub mod report;

pub use prometheus::render_prometheus;
pub use recommend::MAINTAIN_CURRENT;
pub use report::{ComponentStatus, FleetReport, ScalingSummary, build};
