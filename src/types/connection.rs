//! Connection Types
//!
//! A named BIG-IP target: endpoint, credentials and TLS policy.

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use super::serialize_secret;
use crate::error::{BrokerResult, ValidationError};

/// TLS certificate validation policy for a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsPolicy {
    /// Validate the server certificate.
    #[default]
    Verify,
    /// Accept any certificate (self-signed lab devices).
    SkipVerify,
}

impl TlsPolicy {
    /// Whether certificates are validated.
    pub fn verifies(&self) -> bool {
        matches!(self, Self::Verify)
    }
}

/// Input for creating or updating a connection.
#[derive(Clone, Deserialize)]
pub struct ConnectionInput {
    /// Unique connection name.
    pub name: String,
    /// Host, host:port or https URL of the management interface.
    pub endpoint: String,
    /// Username used to acquire tokens.
    pub username: String,
    /// Password used to acquire tokens.
    pub password: SecretString,
    /// TLS validation policy.
    #[serde(default)]
    pub tls_policy: TlsPolicy,
    /// Remote login provider (e.g. `tmos`).
    #[serde(default)]
    pub login_provider: Option<String>,
}

impl ConnectionInput {
    /// Create input with the default TLS policy and no login provider.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            username: username.into(),
            password: SecretString::new(password.into()),
            tls_policy: TlsPolicy::default(),
            login_provider: None,
        }
    }

    /// Set the TLS policy.
    pub fn tls_policy(mut self, policy: TlsPolicy) -> Self {
        self.tls_policy = policy;
        self
    }

    /// Set the remote login provider.
    pub fn login_provider(mut self, provider: impl Into<String>) -> Self {
        self.login_provider = Some(provider.into());
        self
    }

    /// Check required fields and return the normalized endpoint.
    pub fn validate(&self) -> BrokerResult<String> {
        use secrecy::ExposeSecret;

        validate_connection_name(&self.name)?;
        if self.endpoint.trim().is_empty() {
            return Err(missing("endpoint"));
        }
        if self.username.trim().is_empty() {
            return Err(missing("username"));
        }
        if self.password.expose_secret().is_empty() {
            return Err(missing("password"));
        }
        normalize_endpoint(&self.endpoint)
    }
}

impl std::fmt::Debug for ConnectionInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionInput")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .field("tls_policy", &self.tls_policy)
            .field("login_provider", &self.login_provider)
            .finish()
    }
}

/// Persisted connection record, including credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub name: String,
    pub endpoint: String,
    pub username: String,
    #[serde(serialize_with = "serialize_secret")]
    pub password: SecretString,
    #[serde(default)]
    pub tls_policy: TlsPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_provider: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionConfig {
    /// Redacted view safe to return to callers.
    pub fn view(&self) -> Connection {
        Connection {
            name: self.name.clone(),
            endpoint: self.endpoint.clone(),
            tls_policy: self.tls_policy,
            login_provider: self.login_provider.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("username", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .field("tls_policy", &self.tls_policy)
            .field("login_provider", &self.login_provider)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

/// Connection as returned by read operations. Carries no credentials.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub name: String,
    pub endpoint: String,
    pub tls_policy: TlsPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_provider: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn missing(field: &str) -> crate::error::BrokerError {
    ValidationError::MissingField {
        field: field.to_string(),
    }
    .into()
}

/// Check a connection name: alphanumerics plus `.`, `_` and `-`, starting
/// and ending with an alphanumeric.
pub fn validate_connection_name(name: &str) -> BrokerResult<()> {
    if name.is_empty() {
        return Err(missing("name"));
    }

    let invalid = |reason: &str| -> crate::error::BrokerError {
        ValidationError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        }
        .into()
    };

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(invalid("only letters, digits, '.', '_' and '-' are allowed"));
    }

    let first = name.chars().next();
    let last = name.chars().last();
    if !first.is_some_and(|c| c.is_ascii_alphanumeric())
        || !last.is_some_and(|c| c.is_ascii_alphanumeric())
    {
        return Err(invalid("must start and end with a letter or digit"));
    }

    Ok(())
}

/// Normalize an endpoint to an explicit `https://` URL without a trailing slash.
pub fn normalize_endpoint(endpoint: &str) -> BrokerResult<String> {
    let trimmed = endpoint.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(missing("endpoint"));
    }

    let invalid = |reason: &str| -> crate::error::BrokerError {
        ValidationError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
        .into()
    };

    let normalized = match trimmed.split_once("://") {
        Some((scheme, rest)) => {
            if !scheme.eq_ignore_ascii_case("https") {
                return Err(invalid("only https endpoints are supported"));
            }
            format!("https://{}", rest)
        }
        None => format!("https://{}", trimmed),
    };

    let url = Url::parse(&normalized).map_err(|e| invalid(&e.to_string()))?;
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(invalid("query strings and fragments are not allowed"));
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("bigip.lab.local").unwrap(),
            "https://bigip.lab.local"
        );
        assert_eq!(
            normalize_endpoint("10.1.1.245:8443/").unwrap(),
            "https://10.1.1.245:8443"
        );
        assert_eq!(
            normalize_endpoint("HTTPS://bigip.lab.local").unwrap(),
            "https://bigip.lab.local"
        );
        assert!(normalize_endpoint("http://bigip.lab.local").is_err());
        assert!(normalize_endpoint("https://").is_err());
        assert!(normalize_endpoint("bigip?x=1").is_err());
        assert!(normalize_endpoint("   ").is_err());
    }

    #[test]
    fn test_validate_connection_name() {
        assert!(validate_connection_name("lab1").is_ok());
        assert!(validate_connection_name("dc-1.edge_a").is_ok());
        assert!(validate_connection_name("").is_err());
        assert!(validate_connection_name("-lab").is_err());
        assert!(validate_connection_name("lab/1").is_err());
        assert!(validate_connection_name("lab.").is_err());
    }

    #[test]
    fn test_input_validate_requires_credentials() {
        let input = ConnectionInput::new("lab1", "bigip", "admin", "");
        assert!(matches!(
            input.validate(),
            Err(crate::error::BrokerError::Validation(
                ValidationError::MissingField { ref field }
            )) if field == "password"
        ));

        let input = ConnectionInput::new("lab1", "bigip", " ", "secret");
        assert!(input.validate().is_err());
    }

    #[test]
    fn test_input_debug_is_redacted() {
        let input = ConnectionInput::new("lab1", "bigip", "admin", "hunter2");
        let debug = format!("{:?}", input);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("admin"));
    }

    #[test]
    fn test_input_deserializes_with_defaults() {
        let input: ConnectionInput = serde_json::from_str(
            r#"{"name":"lab1","endpoint":"bigip","username":"admin","password":"pw"}"#,
        )
        .unwrap();
        assert_eq!(input.tls_policy, TlsPolicy::Verify);
        assert!(input.login_provider.is_none());

        let input: ConnectionInput = serde_json::from_str(
            r#"{"name":"lab1","endpoint":"bigip","username":"admin","password":"pw","tls_policy":"skip_verify"}"#,
        )
        .unwrap();
        assert_eq!(input.tls_policy, TlsPolicy::SkipVerify);
    }

    #[test]
    fn test_config_round_trips_password_but_view_drops_it() {
        let now = Utc::now();
        let config = ConnectionConfig {
            name: "lab1".to_string(),
            endpoint: "https://bigip".to_string(),
            username: "admin".to_string(),
            password: SecretString::new("pw".to_string()),
            tls_policy: TlsPolicy::SkipVerify,
            login_provider: Some("tmos".to_string()),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_string(&config).unwrap();
        let restored: ConnectionConfig = serde_json::from_str(&json).unwrap();
        use secrecy::ExposeSecret;
        assert_eq!(restored.password.expose_secret(), "pw");

        let view = serde_json::to_string(&config.view()).unwrap();
        assert!(!view.contains("pw\""));
        assert!(!view.contains("admin"));
    }
}
