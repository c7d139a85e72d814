//! # Observability
//!
//! Prometheus metrics and tracing setup.

pub mod metrics;
pub mod otel;

pub use otel::get_trace_id;
