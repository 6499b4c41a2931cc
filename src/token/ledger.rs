//! Token Ledger
//!
//! Durable record of every issued token, keyed by token ID.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::warn;

use crate::core::KeyedLocks;
use crate::error::{BrokerError, BrokerResult, NotFoundError};
use crate::storage::{get_json, put_json, token_key, KvStorage, TOKEN_PREFIX};
use crate::types::{DeactivationReason, TokenRecord};

/// Storage reads in flight at once during a scan.
pub const SCAN_CONCURRENCY: usize = 16;

/// Active records plus the IDs of entries that could not be read.
#[derive(Debug, Default)]
pub struct ActiveScan {
    pub records: Vec<TokenRecord>,
    pub unreadable: Vec<String>,
}

/// Ledger of issued tokens.
///
/// Check-then-write and read-modify-write sequences on one token ID hold
/// that ID's lock. Records are never deleted.
pub struct TokenLedger {
    storage: Arc<dyn KvStorage>,
    locks: KeyedLocks,
}

impl TokenLedger {
    /// Create a ledger over `storage`.
    pub fn new(storage: Arc<dyn KvStorage>) -> Self {
        Self {
            storage,
            locks: KeyedLocks::new(),
        }
    }

    /// Store a new record. Fails with `Conflict` if the ID is taken.
    pub async fn record(&self, record: &TokenRecord) -> BrokerResult<()> {
        let key = token_key(&record.token_id);
        let _guard = self.locks.acquire(&key).await;

        if self.storage.get(&key).await?.is_some() {
            return Err(BrokerError::Conflict { key });
        }
        put_json(self.storage.as_ref(), &key, record).await
    }

    /// Read a record.
    pub async fn get(&self, token_id: &str) -> BrokerResult<TokenRecord> {
        get_json(self.storage.as_ref(), &token_key(token_id))
            .await?
            .ok_or_else(|| {
                NotFoundError::Token {
                    token_id: token_id.to_string(),
                }
                .into()
            })
    }

    /// All token IDs in lexical order.
    pub async fn list_ids(&self) -> BrokerResult<Vec<String>> {
        self.storage.list(TOKEN_PREFIX).await
    }

    /// Records still marked active, expired or not. Unreadable entries are
    /// logged and left out.
    pub async fn list_active(&self) -> BrokerResult<Vec<TokenRecord>> {
        Ok(self.scan_active().await?.records)
    }

    /// Like [`list_active`](Self::list_active), also reporting which entries
    /// could not be read.
    pub async fn scan_active(&self) -> BrokerResult<ActiveScan> {
        let ids = self.list_ids().await?;
        let reads: Vec<_> = stream::iter(ids)
            .map(|id| async move {
                let result: BrokerResult<Option<TokenRecord>> =
                    get_json(self.storage.as_ref(), &token_key(&id)).await;
                (id, result)
            })
            .buffered(SCAN_CONCURRENCY)
            .collect()
            .await;

        let mut scan = ActiveScan::default();
        for (id, result) in reads {
            match result {
                Ok(Some(record)) if record.active => scan.records.push(record),
                // Inactive, or deleted between list and read
                Ok(_) => {}
                Err(error) => {
                    warn!(token_id = %id, error = %error, "Skipping unreadable token record");
                    scan.unreadable.push(id);
                }
            }
        }
        Ok(scan)
    }

    /// Mark a record inactive.
    ///
    /// Returns whether this call made the transition; an already inactive
    /// record is left as it is.
    pub async fn deactivate(
        &self,
        token_id: &str,
        reason: DeactivationReason,
        at: DateTime<Utc>,
    ) -> BrokerResult<bool> {
        let key = token_key(token_id);
        let _guard = self.locks.acquire(&key).await;

        let mut record = self.get(token_id).await?;
        if !record.deactivate(reason, at) {
            return Ok(false);
        }
        put_json(self.storage.as_ref(), &key, &record).await?;
        Ok(true)
    }
}
