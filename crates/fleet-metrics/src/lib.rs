//! fleet-metrics — where per-service utilization samples come from.
//!
//! The control loop only sees the `MetricSource` trait. Production wiring
//! uses `HttpMetricSource`, which reads a JSON `MetricSample` from each
//! service; tests and dry runs use `StaticMetricSource`.
//!
//! ```text
//! MetricSource::sample(service, timeout)
//!   ├── HttpMetricSource   GET http://{host}:{port}{metrics_path}
//!   └── StaticMetricSource fixed samples / errors per service
//! ```

pub mod http_source;
pub mod source;

pub use http_source::HttpMetricSource;
pub use source::{MetricError, MetricSource, SampleFuture, StaticMetricSource};
