//! The `MetricSource` seam and a fixed-sample implementation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

use fleet_core::MetricSample;

/// Errors a metric fetch can end in. All are per-service and recoverable.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MetricError {
    #[error("metric fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("metrics unavailable: {0}")]
    Unavailable(String),

    #[error("invalid metric sample: {0}")]
    Invalid(String),

    #[error("no metric source registered for service {0}")]
    UnknownService(String),
}

/// Boxed future alias for sample results.
pub type SampleFuture<'a> =
    Pin<Box<dyn Future<Output = Result<MetricSample, MetricError>> + Send + 'a>>;

/// Supplies point-in-time utilization per service.
pub trait MetricSource: Send + Sync {
    /// Fetch the current sample for `service`, giving up after `timeout`.
    fn sample<'a>(&'a self, service: &'a str, timeout: Duration) -> SampleFuture<'a>;
}

/// Fixed samples keyed by service name.
#[derive(Debug, Clone, Default)]
pub struct StaticMetricSource {
    samples: HashMap<String, Result<MetricSample, MetricError>>,
}

impl StaticMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `sample` for `service`.
    pub fn with_sample(mut self, service: &str, sample: MetricSample) -> Self {
        self.samples.insert(service.to_string(), Ok(sample));
        self
    }

    /// Fail every fetch for `service` with `error`.
    pub fn with_error(mut self, service: &str, error: MetricError) -> Self {
        self.samples.insert(service.to_string(), Err(error));
        self
    }

    /// Load `{ "service": { "cpu_percent": .., ... }, ... }`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let parsed: HashMap<String, MetricSample> = serde_json::from_str(json)?;
        Ok(Self {
            samples: parsed.into_iter().map(|(k, v)| (k, Ok(v))).collect(),
        })
    }
}

impl MetricSource for StaticMetricSource {
    fn sample<'a>(&'a self, service: &'a str, _timeout: Duration) -> SampleFuture<'a> {
        let result = match self.samples.get(service) {
            Some(Ok(sample)) => sample
                .validate()
                .map(|_| *sample)
                .map_err(MetricError::Invalid),
            Some(Err(e)) => Err(e.clone()),
            None => Err(MetricError::UnknownService(service.to_string())),
        };
        Box::pin(async move { result })
    }
}
