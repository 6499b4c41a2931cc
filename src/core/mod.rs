//! Broker Core Components
//!
//! HTTP transport, time source and per-key locking.

pub mod clock;
pub mod locks;
pub mod transport;

pub use clock::*;
pub use locks::KeyedLocks;
pub use transport::*;
