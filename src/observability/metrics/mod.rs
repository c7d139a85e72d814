//! # Metrics Module
//!
//! Prometheus metrics for monitoring the operator, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup, registration and text encoding
//! - `controller_metrics` - Reconcile passes, errors by class, requeues, duration
//! - `owned_metrics` - Owned resource operations and issued certificates

pub mod controller_metrics;
pub mod owned_metrics;
pub mod registry;

pub use controller_metrics::*;
pub use owned_metrics::*;
pub use registry::*;
