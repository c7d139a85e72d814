//! # Operator Configuration
//!
//! Operator settings come from command-line flags (each backed by an environment
//! variable); HTTP server settings come from the environment with defaults.

mod operator;
mod server;

pub use operator::OperatorConfig;
pub use server::ServerConfig;

use std::sync::Arc;

/// Operator configuration shared by every reconciler
pub type SharedOperatorConfig = Arc<OperatorConfig>;
