//! # OpenTelemetry Support
//!
//! Sets up the global tracing subscriber: an `EnvFilter` (from `RUST_LOG`), a
//! compact fmt layer, and a `tracing-opentelemetry` layer backed by an SDK tracer
//! provider so every reconcile span carries a trace id.
//!
//! No exporter is configured; spans stay in process and only their ids are
//! surfaced in logs.

use anyhow::{Context, Result};
use opentelemetry::trace::{TraceId, TracerProvider as _};
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::{info, warn};
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "gateway_operator=info";

/// Handle kept by `main` to flush and shut down the provider on exit
pub type TracerProviderHandle = SdkTracerProvider;

/// Trace id of the current span, `TraceId::INVALID` outside an instrumented span
pub fn get_trace_id() -> TraceId {
    use opentelemetry::trace::TraceContextExt as _;
    use tracing_opentelemetry::OpenTelemetrySpanExt as _;

    tracing::Span::current()
        .context()
        .span()
        .span_context()
        .trace_id()
}

/// Install the global subscriber and return the tracer provider
///
/// # Errors
///
/// Fails if the filter directive is invalid or a global subscriber is already set.
pub fn init_otel() -> Result<TracerProviderHandle> {
    let provider = SdkTracerProvider::builder().build();
    let tracer = provider.tracer(env!("CARGO_PKG_NAME"));

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Invalid log filter")?;

    let collector = Registry::default()
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(tracing_subscriber::fmt::layer().compact())
        .with(env_filter);
    tracing::subscriber::set_global_default(collector)
        .context("Failed to install tracing subscriber")?;

    info!("Tracing initialized");
    Ok(provider)
}

/// Flush and shut down the tracer provider
pub fn shutdown_otel(provider: TracerProviderHandle) {
    if let Err(e) = provider.shutdown() {
        warn!("OpenTelemetry shutdown failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_outside_span_is_invalid() {
        assert_eq!(get_trace_id(), TraceId::INVALID);
    }
}
