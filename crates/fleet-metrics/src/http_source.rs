//! HTTP metric source.
//!
//! Each service exposes its current utilization as a JSON `MetricSample`
//! on `metrics_path`. A fetch is a single HTTP/1 GET over a fresh TCP
//! connection, bounded end-to-end by the caller's timeout.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::debug;

use fleet_core::{MetricSample, ServiceSpec};

use crate::source::{MetricError, MetricSource, SampleFuture};

/// Largest response body accepted from a metrics endpoint.
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct Endpoint {
    address: String,
    path: String,
}

/// Samples services over HTTP.
#[derive(Debug, Default)]
pub struct HttpMetricSource {
    endpoints: RwLock<HashMap<String, Endpoint>>,
}

impl HttpMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source that knows every service in `services`.
    pub fn from_services(services: &[ServiceSpec]) -> Self {
        let source = Self::new();
        for spec in services {
            source.register(spec);
        }
        source
    }

    /// Register (or re-point) the metrics endpoint for a service.
    pub fn register(&self, spec: &ServiceSpec) {
        let endpoint = Endpoint {
            address: spec.address(),
            path: spec.metrics_path.clone(),
        };
        if let Ok(mut endpoints) = self.endpoints.write() {
            endpoints.insert(spec.name.clone(), endpoint);
        }
    }

    fn endpoint(&self, service: &str) -> Option<Endpoint> {
        self.endpoints.read().ok()?.get(service).cloned()
    }
}

impl MetricSource for HttpMetricSource {
    fn sample<'a>(&'a self, service: &'a str, timeout: Duration) -> SampleFuture<'a> {
        Box::pin(async move {
            let endpoint = self
                .endpoint(service)
                .ok_or_else(|| MetricError::UnknownService(service.to_string()))?;

            let body = tokio::time::timeout(timeout, fetch(&endpoint.address, &endpoint.path))
                .await
                .map_err(|_| MetricError::Timeout(timeout))??;

            let sample: MetricSample = serde_json::from_slice(&body)
                .map_err(|e| MetricError::Invalid(e.to_string()))?;
            sample.validate().map_err(MetricError::Invalid)?;
            debug!(%service, cpu = sample.cpu_percent, mem = sample.memory_percent, "metrics sampled");
            Ok(sample)
        })
    }
}

/// GET `http://{address}{path}` and return the body of a 2xx response.
async fn fetch(address: &str, path: &str) -> Result<bytes::Bytes, MetricError> {
    let uri = format!("http://{address}{path}");
    let unavailable = |what: &str, e: &dyn std::fmt::Display| {
        debug!(error = %e, %uri, "metric fetch {what} failed");
        MetricError::Unavailable(format!("{what} {uri}: {e}"))
    };

    let stream = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|e| unavailable("connect", &e))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| unavailable("handshake", &e))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", address)
        .header("accept", "application/json")
        .header("user-agent", "fleet-metrics/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .map_err(|e| unavailable("request", &e))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| unavailable("request", &e))?;
    if !resp.status().is_success() {
        return Err(MetricError::Unavailable(format!(
            "{uri} answered {}",
            resp.status()
        )));
    }

    // Stop reading once the body passes the cap.
    let body = Limited::new(resp.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| {
            if e.is::<LengthLimitError>() {
                MetricError::Invalid(format!("{uri} body exceeds {MAX_BODY_BYTES} bytes"))
            } else {
                unavailable("body", &e)
            }
        })?
        .to_bytes();
    Ok(body)
}
