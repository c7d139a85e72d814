//! Gateway Operator Library
//!
//! Reconciliation engine for gateway control planes, data planes and Konnect
//! extensions. Tests are included in the module files and under `tests/`.

pub mod certificates;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod fingerprint;
pub mod grants;
pub mod observability;
pub mod owned;
pub mod rbac;
pub mod resources;
pub mod runtime;

// Re-export CRD types for convenience
pub use crd::*;
