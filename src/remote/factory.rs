//! Remote Client Factory
//!
//! Builds a [`RemoteAuthClient`] from a stored connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::client::{BigIpAuthClient, MockRemoteAuthClient, RemoteAuthClient};
use crate::core::locks::lock;
use crate::core::{HttpTransport, ReqwestHttpTransport};
use crate::error::{BrokerResult, TransportError};
use crate::types::{BrokerConfig, ConnectionConfig, TlsPolicy};

/// Builds remote clients for connections.
pub trait RemoteClientFactory: Send + Sync {
    /// Client bound to `connection`'s endpoint, credentials and TLS policy.
    fn client_for(&self, connection: &ConnectionConfig) -> BrokerResult<Arc<dyn RemoteAuthClient>>;
}

/// Factory producing [`BigIpAuthClient`]s.
///
/// One HTTP transport is kept per TLS policy and shared by every client.
pub struct BigIpClientFactory {
    verifying: Arc<dyn HttpTransport>,
    permissive: Arc<dyn HttpTransport>,
    request_timeout: Duration,
}

impl BigIpClientFactory {
    /// Create a factory with reqwest transports built from `config`.
    pub fn new(config: &BrokerConfig) -> BrokerResult<Self> {
        let verifying = ReqwestHttpTransport::with_options(
            config.request_timeout,
            TlsPolicy::Verify,
            config.max_response_size,
        )?;
        let permissive = ReqwestHttpTransport::with_options(
            config.request_timeout,
            TlsPolicy::SkipVerify,
            config.max_response_size,
        )?;

        Ok(Self {
            verifying: Arc::new(verifying),
            permissive: Arc::new(permissive),
            request_timeout: config.request_timeout,
        })
    }

    /// Create a factory sending every request through `transport`.
    pub fn with_transport(config: &BrokerConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            verifying: transport.clone(),
            permissive: transport,
            request_timeout: config.request_timeout,
        }
    }
}

impl RemoteClientFactory for BigIpClientFactory {
    fn client_for(&self, connection: &ConnectionConfig) -> BrokerResult<Arc<dyn RemoteAuthClient>> {
        let transport = match connection.tls_policy {
            TlsPolicy::Verify => self.verifying.clone(),
            TlsPolicy::SkipVerify => self.permissive.clone(),
        };
        Ok(Arc::new(BigIpAuthClient::for_connection(
            connection,
            transport,
            self.request_timeout,
        )))
    }
}

/// Mock factory for testing.
///
/// Hands out one [`MockRemoteAuthClient`] per connection name, so calls made
/// through different resolutions of the same connection land in one history.
#[derive(Default)]
pub struct MockRemoteClientFactory {
    clients: Mutex<HashMap<String, Arc<MockRemoteAuthClient>>>,
    resolved: Mutex<Vec<String>>,
    should_fail: Mutex<bool>,
}

impl MockRemoteClientFactory {
    /// Create new mock factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock client for `name`, created on first use.
    pub fn client(&self, name: &str) -> Arc<MockRemoteAuthClient> {
        lock(&self.clients)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MockRemoteAuthClient::new()))
            .clone()
    }

    /// Fail every client construction.
    pub fn set_should_fail(&self, should_fail: bool) -> &Self {
        *lock(&self.should_fail) = should_fail;
        self
    }

    /// Connection names clients were built for, in order.
    pub fn get_resolved(&self) -> Vec<String> {
        lock(&self.resolved).clone()
    }
}

impl RemoteClientFactory for MockRemoteClientFactory {
    fn client_for(&self, connection: &ConnectionConfig) -> BrokerResult<Arc<dyn RemoteAuthClient>> {
        if *lock(&self.should_fail) {
            return Err(TransportError::TlsError {
                message: "mock client construction failure".to_string(),
            }
            .into());
        }
        lock(&self.resolved).push(connection.name.clone());
        Ok(self.client(&connection.name))
    }
}

/// Create mock client factory for testing.
pub fn create_mock_client_factory() -> MockRemoteClientFactory {
    MockRemoteClientFactory::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HttpMethod, MockHttpTransport};
    use chrono::Utc;
    use secrecy::SecretString;

    fn connection(name: &str, tls_policy: TlsPolicy) -> ConnectionConfig {
        ConnectionConfig {
            name: name.to_string(),
            endpoint: "https://bigip.lab.local".to_string(),
            username: "admin".to_string(),
            password: SecretString::new("secret".to_string()),
            tls_policy,
            login_provider: Some("tmos".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_factory_clients_use_shared_transport() {
        let transport = Arc::new(MockHttpTransport::new());
        transport.queue_json_response(
            200,
            &serde_json::json!({"token": {"token": "ABC", "timeout": 1200}}),
        );
        let factory = BigIpClientFactory::with_transport(&BrokerConfig::default(), transport.clone());

        let client = factory
            .client_for(&connection("lab1", TlsPolicy::SkipVerify))
            .unwrap();
        client.acquire(1200).await.unwrap();

        let login = transport.get_requests_by_method(HttpMethod::Post);
        assert_eq!(login.len(), 1);
        let body: serde_json::Value =
            serde_json::from_str(login[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body["loginProviderName"], "tmos");
        assert_eq!(login[0].timeout, Some(BrokerConfig::default().request_timeout));
    }

    #[test]
    fn test_reqwest_factory_builds() {
        let factory = BigIpClientFactory::new(&BrokerConfig::default()).unwrap();
        assert!(factory
            .client_for(&connection("lab1", TlsPolicy::Verify))
            .is_ok());
    }

    #[tokio::test]
    async fn test_mock_factory_reuses_client_per_name() {
        let factory = MockRemoteClientFactory::new();
        let first = factory
            .client_for(&connection("lab1", TlsPolicy::Verify))
            .unwrap();
        first.acquire(60).await.unwrap();

        assert_eq!(factory.client("lab1").issued_count(), 1);
        assert_eq!(factory.client("lab2").issued_count(), 0);
        assert_eq!(factory.get_resolved(), vec!["lab1"]);
    }
}
