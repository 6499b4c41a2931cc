//! Builders
//!
//! Fluent builder patterns for broker configuration.

pub mod config;

pub use config::{broker_config, BrokerConfigBuilder};
