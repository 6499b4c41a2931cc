//! Configuration Builder
//!
//! Fluent builder for broker configuration.

use std::time::Duration;

use crate::error::{BrokerResult, ValidationError};
use crate::types::{
    BrokerConfig, DEFAULT_MAX_RESPONSE_SIZE, DEFAULT_PROBE_TTL, DEFAULT_RECONCILE_INTERVAL,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_TOKEN_TTL, MAX_TOKEN_TTL,
};

/// Broker configuration builder.
#[derive(Debug, Clone)]
pub struct BrokerConfigBuilder {
    request_timeout: Duration,
    probe_ttl: Duration,
    default_ttl: Duration,
    max_ttl: Duration,
    reconcile_interval: Duration,
    max_response_size: usize,
}

impl Default for BrokerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerConfigBuilder {
    /// Create new configuration builder.
    pub fn new() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_ttl: DEFAULT_PROBE_TTL,
            default_ttl: DEFAULT_TOKEN_TTL,
            max_ttl: MAX_TOKEN_TTL,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }

    /// Set the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the connectivity probe TTL.
    pub fn probe_ttl(mut self, ttl: Duration) -> Self {
        self.probe_ttl = ttl;
        self
    }

    /// Set the default token TTL.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the maximum token TTL.
    pub fn max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    /// Set the scheduled reconciliation interval.
    pub fn reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Set the maximum accepted response size.
    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.max_response_size = bytes;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> BrokerResult<BrokerConfig> {
        let invalid = |message: String| -> crate::error::BrokerError {
            ValidationError::InvalidConfig { message }.into()
        };

        if self.request_timeout.is_zero() {
            return Err(invalid("request_timeout must be positive".to_string()));
        }
        if self.reconcile_interval.is_zero() {
            return Err(invalid("reconcile_interval must be positive".to_string()));
        }
        if self.max_response_size == 0 {
            return Err(invalid("max_response_size must be positive".to_string()));
        }
        for (field, ttl) in [
            ("probe_ttl", self.probe_ttl),
            ("default_ttl", self.default_ttl),
            ("max_ttl", self.max_ttl),
        ] {
            if ttl.as_secs() == 0 {
                return Err(invalid(format!("{} must be at least one second", field)));
            }
            if ttl > MAX_TOKEN_TTL {
                return Err(invalid(format!(
                    "{} ({}s) exceeds the BIG-IP limit of {}s",
                    field,
                    ttl.as_secs(),
                    MAX_TOKEN_TTL.as_secs()
                )));
            }
        }
        if self.default_ttl > self.max_ttl {
            return Err(invalid(format!(
                "default_ttl ({}s) exceeds max_ttl ({}s)",
                self.default_ttl.as_secs(),
                self.max_ttl.as_secs()
            )));
        }

        Ok(BrokerConfig {
            request_timeout: self.request_timeout,
            probe_ttl: self.probe_ttl,
            default_ttl: self.default_ttl,
            max_ttl: self.max_ttl,
            reconcile_interval: self.reconcile_interval,
            max_response_size: self.max_response_size,
        })
    }
}

/// Create a new broker configuration builder.
pub fn broker_config() -> BrokerConfigBuilder {
    BrokerConfigBuilder::new()
}
