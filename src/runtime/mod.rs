//! # Runtime Module
//!
//! Process initialization, the controller watch loop, and the error policy
//! applied to failed reconcile passes.

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use error_policy::*;
pub use initialization::*;
pub use watch_loop::*;
