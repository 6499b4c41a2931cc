//! Token Types
//!
//! Ledger records for issued tokens and the views derived from them.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::serialize_secret;
use crate::error::{BrokerResult, ValidationError};

/// Why a token left the active state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeactivationReason {
    /// Expired and cleaned up by a reconciliation pass.
    Reconciled,
    /// Revoked on explicit request.
    Revoked,
}

/// Terminal transition recorded on a token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deactivation {
    pub reason: DeactivationReason,
    pub at: DateTime<Utc>,
}

/// Lifecycle state of a recorded token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Active,
    Reconciled,
    Revoked,
}

/// Ledger entry for one issued token.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Ledger identifier.
    pub token_id: String,
    /// Token value returned by BIG-IP.
    #[serde(serialize_with = "serialize_secret")]
    remote_value: SecretString,
    /// Connection the token was issued through.
    pub connection_name: String,
    /// When the token was issued.
    pub issued_at: DateTime<Utc>,
    /// When the token expires. Never changes after creation.
    pub expires_at: DateTime<Utc>,
    /// False once reconciled or revoked.
    pub active: bool,
    /// Terminal transition, once one happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivation: Option<Deactivation>,
}

impl TokenRecord {
    /// Create an active record expiring `ttl_secs` after `issued_at`.
    ///
    /// Fails with `InvalidTtl` when the expiry is not representable.
    pub fn new(
        token_id: impl Into<String>,
        remote_value: SecretString,
        connection_name: impl Into<String>,
        issued_at: DateTime<Utc>,
        ttl_secs: u64,
    ) -> BrokerResult<Self> {
        Ok(Self {
            token_id: token_id.into(),
            remote_value,
            connection_name: connection_name.into(),
            issued_at,
            expires_at: Self::expiry(issued_at, ttl_secs)?,
            active: true,
            deactivation: None,
        })
    }

    /// Expiry of a token issued at `issued_at` with a lifetime of `ttl_secs`.
    pub fn expiry(issued_at: DateTime<Utc>, ttl_secs: u64) -> BrokerResult<DateTime<Utc>> {
        i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .ok_or_else(|| {
                ValidationError::InvalidTtl {
                    ttl: std::time::Duration::from_secs(ttl_secs),
                    reason: "expiry is out of range".to_string(),
                }
                .into()
            })
    }

    /// Remote token value.
    pub fn remote_value(&self) -> &SecretString {
        &self.remote_value
    }

    /// Whether the token is past its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Lifecycle state derived from the active flag and deactivation.
    pub fn state(&self) -> TokenState {
        match (self.active, self.deactivation) {
            (true, _) => TokenState::Active,
            (false, Some(d)) if d.reason == DeactivationReason::Revoked => TokenState::Revoked,
            (false, _) => TokenState::Reconciled,
        }
    }

    /// Mark the token inactive.
    ///
    /// Returns false, leaving the record untouched, when it was already
    /// inactive: the first terminal transition wins.
    pub fn deactivate(&mut self, reason: DeactivationReason, at: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.deactivation = Some(Deactivation { reason, at });
        true
    }

    /// View without the remote value.
    pub fn summary(&self) -> TokenSummary {
        TokenSummary {
            token_id: self.token_id.clone(),
            connection_name: self.connection_name.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            active: self.active,
            state: self.state(),
        }
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("token_id", &self.token_id)
            .field("remote_value", &"[REDACTED]")
            .field("connection_name", &self.connection_name)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("active", &self.active)
            .field("deactivation", &self.deactivation)
            .finish()
    }
}

/// Token metadata safe for listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSummary {
    pub token_id: String,
    pub connection_name: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub state: TokenState,
}

/// Result of a successful issue. The only place the token value is exposed.
#[derive(Clone)]
pub struct IssuedToken {
    pub token_id: String,
    token: SecretString,
    pub connection_name: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ttl: std::time::Duration,
}

impl IssuedToken {
    pub(crate) fn from_record(record: &TokenRecord, ttl: std::time::Duration) -> Self {
        Self {
            token_id: record.token_id.clone(),
            token: record.remote_value.clone(),
            connection_name: record.connection_name.clone(),
            issued_at: record.issued_at,
            expires_at: record.expires_at,
            ttl,
        }
    }

    /// Token value, for the `X-F5-Auth-Token` header.
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }
}

impl std::fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token_id", &self.token_id)
            .field("token", &"[REDACTED]")
            .field("connection_name", &self.connection_name)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Issue request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssueRequest {
    /// Connection to issue through.
    pub connection_name: String,
    /// Requested lifetime; the configured default when `None`.
    pub ttl: Option<std::time::Duration>,
}

impl IssueRequest {
    /// Request a token with the default TTL.
    pub fn new(connection_name: impl Into<String>) -> Self {
        Self {
            connection_name: connection_name.into(),
            ttl: None,
        }
    }

    /// Set the TTL.
    pub fn ttl(mut self, ttl: std::time::Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the TTL in seconds.
    pub fn ttl_secs(self, secs: u64) -> Self {
        self.ttl(std::time::Duration::from_secs(secs))
    }
}

/// Outcome counts of one reconciliation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Expired tokens marked inactive.
    pub reconciled: usize,
    /// Of those, how many could not be revoked remotely.
    pub revoke_failures: usize,
    /// Expired tokens left active because their connection is gone.
    pub skipped: usize,
    /// Entries that could not be read or updated.
    pub errored: usize,
}

impl ReconcileReport {
    /// True when the pass found nothing to do.
    ///
    /// Expired tokens of a deleted connection and unreadable entries are
    /// counted again on every pass, so a ledger holding either never
    /// produces an empty report. Use [`is_settled`](Self::is_settled) to
    /// ask whether the pass changed anything.
    pub fn is_empty(&self) -> bool {
        self.reconciled == 0 && self.skipped == 0 && self.errored == 0
    }

    /// True when the pass deactivated nothing.
    pub fn is_settled(&self) -> bool {
        self.reconciled == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TokenRecord {
        TokenRecord::new(
            "token_lab1_1700000000_0a1b2c3d",
            SecretString::new("remote-secret".to_string()),
            "lab1",
            Utc::now(),
            5,
        )
        .unwrap()
    }

    #[test]
    fn test_expiry_is_issued_plus_ttl() {
        let record = record();
        assert_eq!((record.expires_at - record.issued_at).num_seconds(), 5);
        assert!(!record.is_expired_at(record.issued_at));
        assert!(record.is_expired_at(record.expires_at));
    }

    #[test]
    fn test_deactivate_is_monotonic() {
        let mut record = record();
        let first = Utc::now();
        assert!(record.deactivate(DeactivationReason::Revoked, first));
        assert!(!record.deactivate(DeactivationReason::Reconciled, Utc::now()));

        assert!(!record.active);
        assert_eq!(record.state(), TokenState::Revoked);
        assert_eq!(record.deactivation.unwrap().at, first);
    }

    #[test]
    fn test_record_serialization_keeps_value_but_debug_hides_it() {
        let record = record();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("remote-secret"));

        let restored: TokenRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.remote_value().expose_secret(), "remote-secret");
        assert!(restored.deactivation.is_none());

        assert!(!format!("{:?}", record).contains("remote-secret"));
        assert!(!serde_json::to_string(&record.summary())
            .unwrap()
            .contains("remote-secret"));
    }

    #[test]
    fn test_unrepresentable_expiry_is_rejected() {
        let result = TokenRecord::new(
            "token_lab1_1700000000_0a1b2c3d",
            SecretString::new("remote-secret".to_string()),
            "lab1",
            Utc::now(),
            10_000_000_000_000,
        );
        assert!(matches!(
            result,
            Err(crate::error::BrokerError::Validation(
                ValidationError::InvalidTtl { .. }
            ))
        ));
        assert!(TokenRecord::expiry(Utc::now(), u64::MAX).is_err());
    }

    #[test]
    fn test_report_is_empty() {
        assert!(ReconcileReport::default().is_empty());
        assert!(ReconcileReport::default().is_settled());

        let carried_over = ReconcileReport {
            skipped: 1,
            errored: 2,
            ..Default::default()
        };
        assert!(!carried_over.is_empty());
        assert!(carried_over.is_settled());

        let fresh = ReconcileReport {
            reconciled: 1,
            ..Default::default()
        };
        assert!(!fresh.is_settled());
    }
}
