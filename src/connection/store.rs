//! Connection Store
//!
//! Persists named BIG-IP connections after proving they work.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::{Clock, KeyedLocks};
use crate::error::{BrokerError, BrokerResult, NotFoundError, StorageError, ValidationError};
use crate::remote::{RemoteAuthClient, RemoteClientFactory};
use crate::storage::{connection_key, get_json, put_json, KvStorage, CONNECTION_PREFIX};
use crate::telemetry::BrokerMetrics;
use crate::types::{Connection, ConnectionConfig, ConnectionInput};

/// Named connection registry.
///
/// Writes to the same name are serialized; the probe and the persist happen
/// under one lock so a concurrent writer cannot slip in between.
pub struct ConnectionStore {
    storage: Arc<dyn KvStorage>,
    factory: Arc<dyn RemoteClientFactory>,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn BrokerMetrics>,
    locks: KeyedLocks,
    probe_ttl_secs: u64,
}

impl ConnectionStore {
    /// Create a store.
    pub fn new(
        storage: Arc<dyn KvStorage>,
        factory: Arc<dyn RemoteClientFactory>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn BrokerMetrics>,
        probe_ttl: std::time::Duration,
    ) -> Self {
        Self {
            storage,
            factory,
            clock,
            metrics,
            locks: KeyedLocks::new(),
            probe_ttl_secs: probe_ttl.as_secs().max(1),
        }
    }

    /// Create or replace a connection.
    ///
    /// A probe token is acquired and revoked with the new settings before
    /// anything is stored. When the probe login fails nothing is written.
    pub async fn write(&self, input: ConnectionInput) -> BrokerResult<Connection> {
        let endpoint = input.validate()?;
        let key = connection_key(&input.name);
        let _guard = self.locks.acquire(&key).await;

        let now = self.clock.now();
        let created_at = match get_json::<ConnectionConfig>(self.storage.as_ref(), &key).await {
            Ok(Some(previous)) => previous.created_at,
            Ok(None) => now,
            Err(BrokerError::Storage(StorageError::CorruptedData { message, .. })) => {
                warn!(connection = %input.name, error = %message, "Replacing unreadable connection record");
                now
            }
            Err(e) => return Err(e),
        };

        let config = ConnectionConfig {
            name: input.name,
            endpoint,
            username: input.username,
            password: input.password,
            tls_policy: input.tls_policy,
            login_provider: input.login_provider,
            created_at,
            updated_at: now,
        };

        self.probe(&config).await?;

        put_json(self.storage.as_ref(), &key, &config).await?;
        info!(
            connection = %config.name,
            endpoint = %config.endpoint,
            tls_policy = ?config.tls_policy,
            "Connection stored"
        );
        Ok(config.view())
    }

    async fn probe(&self, config: &ConnectionConfig) -> BrokerResult<()> {
        let probe_failed = |error: BrokerError| -> BrokerError {
            ValidationError::ProbeFailed {
                name: config.name.clone(),
                message: error.to_string(),
            }
            .into()
        };

        let client = self.factory.client_for(config).map_err(probe_failed)?;
        let token = match client.acquire(self.probe_ttl_secs).await {
            Ok(token) => token,
            Err(error) => {
                self.metrics.record_probe(&config.name, false);
                warn!(connection = %config.name, error = %error, "Connectivity probe failed");
                return Err(probe_failed(error));
            }
        };
        self.metrics.record_probe(&config.name, true);

        if let Err(error) = client.revoke(&token.value).await {
            warn!(
                connection = %config.name,
                error = %error,
                "Probe token could not be revoked; it will expire on its own"
            );
        }
        debug!(connection = %config.name, "Connectivity probe succeeded");
        Ok(())
    }

    /// Stored connection with credentials, or `NotFound`.
    pub(crate) async fn load(&self, name: &str) -> BrokerResult<ConnectionConfig> {
        get_json(self.storage.as_ref(), &connection_key(name))
            .await?
            .ok_or_else(|| {
                NotFoundError::Connection {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Read a connection without its credentials.
    pub async fn read(&self, name: &str) -> BrokerResult<Connection> {
        Ok(self.load(name).await?.view())
    }

    /// Remove a connection. Tokens issued through it are left in place.
    pub async fn delete(&self, name: &str) -> BrokerResult<()> {
        let key = connection_key(name);
        let _guard = self.locks.acquire(&key).await;
        self.storage.delete(&key).await?;
        info!(connection = %name, "Connection deleted");
        Ok(())
    }

    /// Connection names in lexical order.
    pub async fn list(&self) -> BrokerResult<Vec<String>> {
        self.storage.list(CONNECTION_PREFIX).await
    }

    /// Whether a connection with this name is stored.
    pub async fn exists(&self, name: &str) -> BrokerResult<bool> {
        Ok(self.storage.get(&connection_key(name)).await?.is_some())
    }

    /// Remote client for a stored connection.
    pub async fn resolve(&self, name: &str) -> BrokerResult<Arc<dyn RemoteAuthClient>> {
        let config = self.load(name).await?;
        self.factory.client_for(&config)
    }
}
