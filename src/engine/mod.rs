//! Engine
//!
//! Token lifecycle coordination and its periodic driver.

pub mod lifecycle;
pub mod scheduler;

pub use lifecycle::LifecycleEngine;
pub use scheduler::ReconcileScheduler;
