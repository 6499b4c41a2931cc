//! Configuration Types
//!
//! Broker-wide settings: remote request ceiling, probe and token lifetimes.

use std::time::Duration;

use crate::builders::BrokerConfigBuilder;
use crate::error::{BrokerResult, ValidationError};

/// Ceiling applied to every remote round-trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Lifetime of the token acquired while verifying a connection.
pub const DEFAULT_PROBE_TTL: Duration = Duration::from_secs(60);

/// Token lifetime used when an issue request does not specify one.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Longest token lifetime BIG-IP accepts.
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(36000);

/// Cadence used by [`ReconcileScheduler`](crate::engine::ReconcileScheduler).
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(60);

/// Largest remote response body accepted (1 MiB).
pub const DEFAULT_MAX_RESPONSE_SIZE: usize = 1_048_576;

/// Token broker configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Timeout for each individual remote request.
    pub request_timeout: Duration,
    /// TTL requested for the connectivity probe token.
    pub probe_ttl: Duration,
    /// TTL used when an issue request omits one.
    pub default_ttl: Duration,
    /// Largest TTL an issue request may ask for.
    pub max_ttl: Duration,
    /// Interval between scheduled reconciliation passes.
    pub reconcile_interval: Duration,
    /// Largest accepted remote response body in bytes.
    pub max_response_size: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            probe_ttl: DEFAULT_PROBE_TTL,
            default_ttl: DEFAULT_TOKEN_TTL,
            max_ttl: MAX_TOKEN_TTL,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            max_response_size: DEFAULT_MAX_RESPONSE_SIZE,
        }
    }
}

impl BrokerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// All values are whole seconds and optional:
    ///
    /// - `BIGIP_TOKEN_REQUEST_TIMEOUT`
    /// - `BIGIP_TOKEN_PROBE_TTL`
    /// - `BIGIP_TOKEN_DEFAULT_TTL`
    /// - `BIGIP_TOKEN_MAX_TTL`
    /// - `BIGIP_TOKEN_RECONCILE_INTERVAL`
    pub fn from_env() -> BrokerResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> BrokerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = BrokerConfigBuilder::new();

        if let Some(timeout) = read_secs(&lookup, "BIGIP_TOKEN_REQUEST_TIMEOUT")? {
            builder = builder.request_timeout(timeout);
        }
        if let Some(ttl) = read_secs(&lookup, "BIGIP_TOKEN_PROBE_TTL")? {
            builder = builder.probe_ttl(ttl);
        }
        if let Some(ttl) = read_secs(&lookup, "BIGIP_TOKEN_DEFAULT_TTL")? {
            builder = builder.default_ttl(ttl);
        }
        if let Some(ttl) = read_secs(&lookup, "BIGIP_TOKEN_MAX_TTL")? {
            builder = builder.max_ttl(ttl);
        }
        if let Some(interval) = read_secs(&lookup, "BIGIP_TOKEN_RECONCILE_INTERVAL")? {
            builder = builder.reconcile_interval(interval);
        }

        builder.build()
    }

    /// Resolve the TTL for an issue request, applying the default and limits.
    pub fn resolve_ttl(&self, requested: Option<Duration>) -> BrokerResult<Duration> {
        let ttl = requested.unwrap_or(self.default_ttl);
        if ttl.as_secs() == 0 {
            return Err(ValidationError::InvalidTtl {
                ttl,
                reason: "must be at least one second".to_string(),
            }
            .into());
        }
        if ttl > self.max_ttl {
            return Err(ValidationError::InvalidTtl {
                ttl,
                reason: format!("exceeds maximum of {}s", self.max_ttl.as_secs()),
            }
            .into());
        }
        Ok(Duration::from_secs(ttl.as_secs()))
    }
}

fn read_secs<F>(lookup: &F, name: &str) -> BrokerResult<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| {
                ValidationError::InvalidConfig {
                    message: format!("{} must be a whole number of seconds, got '{}'", name, raw),
                }
                .into()
            }),
    }
}
