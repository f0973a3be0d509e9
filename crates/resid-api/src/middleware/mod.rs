//! # Middleware Stack
//!
//! Tower middleware for the API layer:
//! - [`metrics`]: Prometheus request metrics and credential outcome counters.
//!
//! Request tracing uses `tower_http::trace::TraceLayer` directly and
//! bearer authentication lives in [`crate::auth`].

pub mod metrics;
