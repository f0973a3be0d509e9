//! # Prometheus Metrics
//!
//! HTTP-level metrics (request counts, latency, errors) are recorded in
//! middleware. Credential outcomes are counted by [`ApiMetrics`] acting as
//! an [`IssuanceObserver`], and failures by error code from the handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use prometheus::core::Collector;
use prometheus::{Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use resid_issuance::{IssuanceEvent, IssuanceObserver, ReconcileTrigger};

/// Shared metrics state backed by a Prometheus registry.
#[derive(Clone)]
pub struct ApiMetrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,

    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    http_errors_total: IntCounterVec,

    credentials_total: IntCounterVec,
    issuance_failures_total: IntCounterVec,
}

impl std::fmt::Debug for ApiMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiMetrics")
            .field("requests", &self.requests())
            .field("errors", &self.errors())
            .finish()
    }
}

fn sum(counter: &IntCounterVec) -> u64 {
    counter
        .collect()
        .iter()
        .flat_map(|mf| mf.get_metric())
        .map(|m| m.get_counter().get_value() as u64)
        .sum()
}

impl ApiMetrics {
    /// Create a new metrics instance with a fresh Prometheus registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("resid_http_requests_total", "Total HTTP requests"),
            &["method", "path", "status"],
        )
        .expect("metric can be created");

        let http_request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "resid_http_request_duration_seconds",
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 120.0,
            ]),
            &["method", "path"],
        )
        .expect("metric can be created");

        let http_errors_total = IntCounterVec::new(
            Opts::new("resid_http_errors_total", "Total HTTP errors (4xx and 5xx)"),
            &["method", "path", "status"],
        )
        .expect("metric can be created");

        let credentials_total = IntCounterVec::new(
            Opts::new(
                "resid_credentials_total",
                "Residency credential outcomes (minted, reconciled, diverged)",
            ),
            &["outcome"],
        )
        .expect("metric can be created");

        let issuance_failures_total = IntCounterVec::new(
            Opts::new(
                "resid_issuance_failures_total",
                "Failed credential operations by error code",
            ),
            &["code"],
        )
        .expect("metric can be created");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(http_errors_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(credentials_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(issuance_failures_total.clone()))
            .expect("metric can be registered");

        Self {
            inner: Arc::new(Inner {
                registry,
                http_requests_total,
                http_request_duration_seconds,
                http_errors_total,
                credentials_total,
                issuance_failures_total,
            }),
        }
    }

    /// Total request count across all labels.
    pub fn requests(&self) -> u64 {
        sum(&self.inner.http_requests_total)
    }

    /// Total error response count across all labels.
    pub fn errors(&self) -> u64 {
        sum(&self.inner.http_errors_total)
    }

    /// Credential outcomes recorded under `outcome`.
    pub fn credentials(&self, outcome: &str) -> u64 {
        self.inner
            .credentials_total
            .with_label_values(&[outcome])
            .get()
    }

    /// Count a failed credential operation.
    pub fn record_failure(&self, code: &str) {
        self.inner
            .issuance_failures_total
            .with_label_values(&[code])
            .inc();
    }

    fn record_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.inner
            .http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();

        self.inner
            .http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);

        if status >= 400 {
            self.inner
                .http_errors_total
                .with_label_values(&[method, path, &status_str])
                .inc();
        }
    }

    /// Gather all metrics and encode to Prometheus text format.
    pub fn gather_and_encode(&self) -> Result<String, String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| format!("failed to encode metrics: {e}"))?;
        String::from_utf8(buffer)
            .map_err(|e| format!("metrics encoding produced invalid UTF-8: {e}"))
    }
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IssuanceObserver for ApiMetrics {
    fn notify(&self, event: &IssuanceEvent) {
        let outcome = match event {
            IssuanceEvent::Minted(_) => "minted",
            IssuanceEvent::Reconciled {
                trigger: ReconcileTrigger::MintRecovery,
                ..
            } => "recovered",
            IssuanceEvent::Reconciled {
                trigger: ReconcileTrigger::Standalone,
                ..
            } => "reconciled",
            IssuanceEvent::Diverged { .. } => "diverged",
        };
        self.inner
            .credentials_total
            .with_label_values(&[outcome])
            .inc();
    }
}

/// Normalize a request path so subject identifiers do not become labels.
///
/// `/v1/credentials/{subject_id}` and `/v1/subjects/{subject_id}/...` keep
/// their shape; the `mint` and `sync` action segments are left alone.
pub(crate) fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    segments
        .iter()
        .enumerate()
        .map(|(i, &segment)| {
            let parent = i.checked_sub(1).map(|p| segments[p]);
            match parent {
                Some("credentials") if !matches!(segment, "mint" | "sync" | "") => {
                    "{subject_id}"
                }
                Some("subjects") if !segment.is_empty() => "{subject_id}",
                _ => segment,
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Middleware that records HTTP request metrics via Prometheus.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let metrics = request.extensions().get::<ApiMetrics>().cloned();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());
    let start = Instant::now();

    let response = next.run(request).await;

    if let Some(m) = metrics {
        let duration = start.elapsed().as_secs_f64();
        m.record_request(&method, &path, response.status().as_u16(), duration);
    }

    response
}
