//! Connections
//!
//! Storage of named BIG-IP targets and resolution to remote clients.

pub mod store;

pub use store::ConnectionStore;
