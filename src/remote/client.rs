//! Remote Auth Client
//!
//! Token acquisition, timeout adjustment, revocation and validation against
//! the BIG-IP iControl REST API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::locks::lock;
use crate::core::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use crate::error::{summarize_body, AuthError, BrokerError, BrokerResult, TransportError};
use crate::types::{ConnectionConfig, DEFAULT_REQUEST_TIMEOUT};

const LOGIN_PATH: &str = "/mgmt/shared/authn/login";
const TOKENS_PATH: &str = "/mgmt/shared/authz/tokens";
const VERSION_PATH: &str = "/mgmt/tm/sys/version";

/// Header carrying the token on authenticated requests.
pub const AUTH_TOKEN_HEADER: &str = "X-F5-Auth-Token";

/// Timeout BIG-IP assigns to a fresh token when the login reply omits it.
pub const REMOTE_DEFAULT_TIMEOUT_SECS: u64 = 1200;

/// Token obtained from a login.
#[derive(Clone)]
pub struct AcquiredToken {
    /// Remote token value.
    pub value: SecretString,
    /// Timeout in effect on the remote side, in seconds.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for AcquiredToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquiredToken")
            .field("value", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Remote token operations for one connection.
#[async_trait]
pub trait RemoteAuthClient: Send + Sync {
    /// Log in and obtain a token living `ttl_secs` seconds.
    ///
    /// When the login succeeds but the timeout cannot be set, the fresh
    /// token is revoked (best effort) before the error is returned. A
    /// rejected timeout update is an `AuthError`; a network failure during
    /// it stays a `TransportError`.
    async fn acquire(&self, ttl_secs: u64) -> BrokerResult<AcquiredToken>;

    /// Change the timeout of an existing token.
    async fn adjust_timeout(&self, token: &SecretString, ttl_secs: u64) -> BrokerResult<()>;

    /// Invalidate a token. A token the system no longer knows counts as revoked.
    async fn revoke(&self, token: &SecretString) -> BrokerResult<()>;

    /// Check whether the system still accepts a token.
    async fn validate(&self, token: &SecretString) -> BrokerResult<bool>;
}

#[derive(Deserialize)]
struct LoginResponse {
    token: LoginToken,
}

#[derive(Deserialize)]
struct LoginToken {
    token: String,
    #[serde(default)]
    timeout: Option<u64>,
}

/// iControl REST client for one BIG-IP system.
pub struct BigIpAuthClient<T: HttpTransport + ?Sized> {
    base_url: String,
    username: String,
    password: SecretString,
    login_provider: Option<String>,
    transport: Arc<T>,
    timeout: Duration,
}

impl<T: HttpTransport + ?Sized> BigIpAuthClient<T> {
    /// Create a client for `base_url` (scheme and host, no trailing slash).
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: SecretString,
        transport: Arc<T>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password,
            login_provider: None,
            transport,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Create a client for a stored connection.
    pub fn for_connection(connection: &ConnectionConfig, transport: Arc<T>, timeout: Duration) -> Self {
        let client = Self::new(
            connection.endpoint.clone(),
            connection.username.clone(),
            connection.password.clone(),
            transport,
        )
        .with_timeout(timeout);
        match &connection.login_provider {
            Some(provider) => client.with_login_provider(provider.clone()),
            None => client,
        }
    }

    /// Set the login provider sent with credentials.
    pub fn with_login_provider(mut self, provider: impl Into<String>) -> Self {
        self.login_provider = Some(provider.into());
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn token_url(&self, token: &SecretString) -> String {
        format!(
            "{}{}/{}",
            self.base_url,
            TOKENS_PATH,
            urlencoding::encode(token.expose_secret())
        )
    }

    fn build_headers(&self, token: Option<&SecretString>) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("accept".to_string(), "application/json".to_string());
        if let Some(token) = token {
            headers.insert(
                AUTH_TOKEN_HEADER.to_string(),
                token.expose_secret().to_string(),
            );
        }
        headers
    }

    fn request(
        &self,
        method: HttpMethod,
        url: String,
        token: Option<&SecretString>,
        body: Option<String>,
    ) -> HttpRequest {
        HttpRequest {
            method,
            url,
            headers: self.build_headers(token),
            body,
            timeout: Some(self.timeout),
        }
    }

    async fn login(&self) -> BrokerResult<AcquiredToken> {
        let mut body = serde_json::json!({
            "username": self.username,
            "password": self.password.expose_secret(),
        });
        if let Some(provider) = &self.login_provider {
            body["loginProviderName"] = serde_json::Value::String(provider.clone());
        }

        let request = self.request(
            HttpMethod::Post,
            format!("{}{}", self.base_url, LOGIN_PATH),
            None,
            Some(body.to_string()),
        );
        let response = self.transport.send(request).await?;

        if !response.is_success() {
            return Err(login_error(&response));
        }

        let parsed: LoginResponse =
            serde_json::from_str(&response.body).map_err(|e| AuthError::InvalidResponse {
                message: format!("malformed login response: {}", e),
            })?;
        if parsed.token.token.is_empty() {
            return Err(AuthError::InvalidResponse {
                message: "login response carried an empty token".to_string(),
            }
            .into());
        }

        Ok(AcquiredToken {
            value: SecretString::new(parsed.token.token),
            timeout_secs: parsed.token.timeout.unwrap_or(REMOTE_DEFAULT_TIMEOUT_SECS),
        })
    }
}

fn login_error(response: &HttpResponse) -> BrokerError {
    let message = summarize_body(&response.body);
    match response.status {
        400 | 401 | 403 => AuthError::LoginRejected {
            status: response.status,
            message,
        },
        status => AuthError::UnexpectedStatus {
            operation: "login".to_string(),
            status,
            message,
        },
    }
    .into()
}

#[async_trait]
impl<T: HttpTransport + ?Sized> RemoteAuthClient for BigIpAuthClient<T> {
    async fn acquire(&self, ttl_secs: u64) -> BrokerResult<AcquiredToken> {
        let acquired = self.login().await?;
        debug!(
            endpoint = %self.base_url,
            remote_timeout = acquired.timeout_secs,
            "Acquired BIG-IP token"
        );

        if ttl_secs == 0 || ttl_secs == acquired.timeout_secs {
            return Ok(acquired);
        }

        if let Err(error) = self.adjust_timeout(&acquired.value, ttl_secs).await {
            warn!(
                endpoint = %self.base_url,
                ttl_secs,
                error = %error,
                "Token timeout update failed; revoking the new token"
            );
            if let Err(revoke_error) = self.revoke(&acquired.value).await {
                warn!(
                    endpoint = %self.base_url,
                    error = %revoke_error,
                    "Revocation of partially created token failed"
                );
            }
            return Err(error);
        }

        Ok(AcquiredToken {
            value: acquired.value,
            timeout_secs: ttl_secs,
        })
    }

    async fn adjust_timeout(&self, token: &SecretString, ttl_secs: u64) -> BrokerResult<()> {
        let body = serde_json::json!({ "timeout": ttl_secs }).to_string();
        let request = self.request(HttpMethod::Patch, self.token_url(token), Some(token), Some(body));
        let response = self.transport.send(request).await?;

        if !response.is_success() {
            return Err(AuthError::TimeoutUpdateRejected {
                status: response.status,
                message: summarize_body(&response.body),
            }
            .into());
        }
        Ok(())
    }

    async fn revoke(&self, token: &SecretString) -> BrokerResult<()> {
        let request = self.request(HttpMethod::Delete, self.token_url(token), Some(token), None);
        let response = self.transport.send(request).await?;

        match response.status {
            200 | 204 => Ok(()),
            404 => {
                debug!(endpoint = %self.base_url, "Token already gone on BIG-IP");
                Ok(())
            }
            status => Err(AuthError::RevocationRejected {
                status,
                message: summarize_body(&response.body),
            }
            .into()),
        }
    }

    async fn validate(&self, token: &SecretString) -> BrokerResult<bool> {
        let request = self.request(
            HttpMethod::Get,
            format!("{}{}", self.base_url, VERSION_PATH),
            Some(token),
            None,
        );
        let response = self.transport.send(request).await?;

        match response.status {
            s if (200..300).contains(&s) => Ok(true),
            401 | 403 => Ok(false),
            status => Err(AuthError::UnexpectedStatus {
                operation: "validate".to_string(),
                status,
                message: summarize_body(&response.body),
            }
            .into()),
        }
    }
}

/// Failure kind injected into [`MockRemoteAuthClient`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MockFailure {
    /// The remote system rejects the call.
    Auth,
    /// The remote system cannot be reached.
    Transport,
}

impl MockFailure {
    fn to_error(self, operation: &str) -> BrokerError {
        match self {
            Self::Auth => AuthError::UnexpectedStatus {
                operation: operation.to_string(),
                status: 401,
                message: "mock rejection".to_string(),
            }
            .into(),
            Self::Transport => TransportError::ConnectionFailed {
                message: format!("mock {} failure", operation),
            }
            .into(),
        }
    }
}

#[derive(Default)]
struct MockFailures {
    acquire: Option<MockFailure>,
    adjust: Option<MockFailure>,
    revoke: Option<MockFailure>,
    validate: Option<MockFailure>,
}

/// Mock remote client for testing.
///
/// Hands out `mock-token-N` values and records every call.
pub struct MockRemoteAuthClient {
    counter: AtomicU64,
    default_timeout: u64,
    failures: Mutex<MockFailures>,
    valid: Mutex<bool>,
    acquire_history: Mutex<Vec<u64>>,
    adjust_history: Mutex<Vec<(String, u64)>>,
    revoke_history: Mutex<Vec<String>>,
    validate_history: Mutex<Vec<String>>,
}

impl Default for MockRemoteAuthClient {
    fn default() -> Self {
        Self {
            counter: AtomicU64::new(0),
            default_timeout: REMOTE_DEFAULT_TIMEOUT_SECS,
            failures: Mutex::new(MockFailures::default()),
            valid: Mutex::new(true),
            acquire_history: Mutex::new(Vec::new()),
            adjust_history: Mutex::new(Vec::new()),
            revoke_history: Mutex::new(Vec::new()),
            validate_history: Mutex::new(Vec::new()),
        }
    }
}

impl MockRemoteAuthClient {
    /// Create new mock client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make logins fail.
    pub fn fail_acquire(&self, failure: Option<MockFailure>) -> &Self {
        lock(&self.failures).acquire = failure;
        self
    }

    /// Make timeout updates fail.
    pub fn fail_adjust(&self, failure: Option<MockFailure>) -> &Self {
        lock(&self.failures).adjust = failure;
        self
    }

    /// Make revocations fail.
    pub fn fail_revoke(&self, failure: Option<MockFailure>) -> &Self {
        lock(&self.failures).revoke = failure;
        self
    }

    /// Make validations fail.
    pub fn fail_validate(&self, failure: Option<MockFailure>) -> &Self {
        lock(&self.failures).validate = failure;
        self
    }

    /// Set the answer given by successful validations.
    pub fn set_valid(&self, valid: bool) -> &Self {
        *lock(&self.valid) = valid;
        self
    }

    /// TTLs passed to `acquire`, in order.
    pub fn get_acquire_history(&self) -> Vec<u64> {
        lock(&self.acquire_history).clone()
    }

    /// Timeout updates attempted, in order.
    pub fn get_adjust_history(&self) -> Vec<(String, u64)> {
        lock(&self.adjust_history).clone()
    }

    /// Token values passed to `revoke`, including failed attempts.
    pub fn get_revoke_history(&self) -> Vec<String> {
        lock(&self.revoke_history).clone()
    }

    /// Token values passed to `validate`.
    pub fn get_validate_history(&self) -> Vec<String> {
        lock(&self.validate_history).clone()
    }

    /// Number of tokens handed out.
    pub fn issued_count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Forget recorded calls.
    pub fn clear_history(&self) {
        lock(&self.acquire_history).clear();
        lock(&self.adjust_history).clear();
        lock(&self.revoke_history).clear();
        lock(&self.validate_history).clear();
    }
}

#[async_trait]
impl RemoteAuthClient for MockRemoteAuthClient {
    async fn acquire(&self, ttl_secs: u64) -> BrokerResult<AcquiredToken> {
        lock(&self.acquire_history).push(ttl_secs);
        if let Some(failure) = lock(&self.failures).acquire {
            return Err(failure.to_error("login"));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let value = SecretString::new(format!("mock-token-{}", n));

        if ttl_secs == 0 || ttl_secs == self.default_timeout {
            return Ok(AcquiredToken {
                value,
                timeout_secs: self.default_timeout,
            });
        }

        if let Err(error) = self.adjust_timeout(&value, ttl_secs).await {
            let _ = self.revoke(&value).await;
            return Err(error);
        }

        Ok(AcquiredToken {
            value,
            timeout_secs: ttl_secs,
        })
    }

    async fn adjust_timeout(&self, token: &SecretString, ttl_secs: u64) -> BrokerResult<()> {
        lock(&self.adjust_history).push((token.expose_secret().to_string(), ttl_secs));
        match lock(&self.failures).adjust {
            Some(failure) => Err(failure.to_error("timeout update")),
            None => Ok(()),
        }
    }

    async fn revoke(&self, token: &SecretString) -> BrokerResult<()> {
        lock(&self.revoke_history).push(token.expose_secret().to_string());
        match lock(&self.failures).revoke {
            Some(failure) => Err(failure.to_error("revoke")),
            None => Ok(()),
        }
    }

    async fn validate(&self, token: &SecretString) -> BrokerResult<bool> {
        lock(&self.validate_history).push(token.expose_secret().to_string());
        if let Some(failure) = lock(&self.failures).validate {
            return Err(failure.to_error("validate"));
        }
        Ok(*lock(&self.valid))
    }
}

/// Create mock remote client for testing.
pub fn create_mock_remote_client() -> MockRemoteAuthClient {
    MockRemoteAuthClient::new()
}
