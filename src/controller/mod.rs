//! # Controller
//!
//! Reconcile flows, the retry backoff they share, and the probe server.

pub mod backoff;
pub mod reconciler;
pub mod server;
