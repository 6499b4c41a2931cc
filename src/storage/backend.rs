//! Key-Value Storage
//!
//! The host's durable store, seen as single-key atomic get/put/delete plus
//! prefix listing. No multi-key transactions are assumed.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::RwLock;

use crate::core::locks::lock;
use crate::error::{BrokerError, BrokerResult, StorageError};

/// Durable key-value storage interface.
#[async_trait]
pub trait KvStorage: Send + Sync {
    /// Read the value stored under `key`.
    async fn get(&self, key: &str) -> BrokerResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> BrokerResult<()>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> BrokerResult<()>;

    /// List the keys starting with `prefix`, with the prefix stripped,
    /// in lexical order.
    async fn list(&self, prefix: &str) -> BrokerResult<Vec<String>>;
}

fn list_prefix(entries: &BTreeMap<String, Vec<u8>>, prefix: &str) -> Vec<String> {
    entries
        .range(prefix.to_string()..)
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, _)| key[prefix.len()..].to_string())
        .collect()
}

/// In-memory storage implementation.
#[derive(Default)]
pub struct InMemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    /// Create new in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no keys.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KvStorage for InMemoryStorage {
    async fn get(&self, key: &str) -> BrokerResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> BrokerResult<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> BrokerResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> BrokerResult<Vec<String>> {
        Ok(list_prefix(&*self.entries.read().await, prefix))
    }
}

/// Mock storage for testing, with failure injection by key prefix.
#[derive(Default)]
pub struct MockStorage {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    put_history: Mutex<Vec<String>>,
    delete_history: Mutex<Vec<String>>,
    failing_gets: Mutex<Vec<String>>,
    failing_puts: Mutex<Vec<String>>,
    fail_list: Mutex<bool>,
    should_fail: Mutex<bool>,
}

impl MockStorage {
    /// Create new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every operation.
    pub fn set_should_fail(&self, should_fail: bool) -> &Self {
        *lock(&self.should_fail) = should_fail;
        self
    }

    /// Fail reads of keys starting with `prefix`.
    pub fn fail_gets_with_prefix(&self, prefix: impl Into<String>) -> &Self {
        lock(&self.failing_gets).push(prefix.into());
        self
    }

    /// Fail writes of keys starting with `prefix`.
    pub fn fail_puts_with_prefix(&self, prefix: impl Into<String>) -> &Self {
        lock(&self.failing_puts).push(prefix.into());
        self
    }

    /// Fail list operations.
    pub fn set_fail_list(&self, fail: bool) -> &Self {
        *lock(&self.fail_list) = fail;
        self
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) -> &Self {
        lock(&self.failing_gets).clear();
        lock(&self.failing_puts).clear();
        *lock(&self.fail_list) = false;
        *lock(&self.should_fail) = false;
        self
    }

    /// Store raw bytes, bypassing failure injection.
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &Self {
        lock(&self.entries).insert(key.into(), value.into());
        self
    }

    /// Raw bytes under `key`.
    pub fn get_raw(&self, key: &str) -> Option<Vec<u8>> {
        lock(&self.entries).get(key).cloned()
    }

    /// Keys written, in order.
    pub fn get_put_history(&self) -> Vec<String> {
        lock(&self.put_history).clone()
    }

    /// Keys deleted, in order.
    pub fn get_delete_history(&self) -> Vec<String> {
        lock(&self.delete_history).clone()
    }

    fn check(&self, failing: &Mutex<Vec<String>>, key: &str) -> bool {
        *lock(&self.should_fail) || lock(failing).iter().any(|p| key.starts_with(p.as_str()))
    }
}

fn injected(message: &str) -> String {
    format!("mock storage failure: {}", message)
}

#[async_trait]
impl KvStorage for MockStorage {
    async fn get(&self, key: &str) -> BrokerResult<Option<Vec<u8>>> {
        if self.check(&self.failing_gets, key) {
            return Err(BrokerError::Storage(StorageError::ReadFailed {
                key: key.to_string(),
                message: injected("get"),
            }));
        }
        Ok(lock(&self.entries).get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> BrokerResult<()> {
        if self.check(&self.failing_puts, key) {
            return Err(BrokerError::Storage(StorageError::WriteFailed {
                key: key.to_string(),
                message: injected("put"),
            }));
        }
        lock(&self.put_history).push(key.to_string());
        lock(&self.entries).insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> BrokerResult<()> {
        if *lock(&self.should_fail) {
            return Err(BrokerError::Storage(StorageError::DeleteFailed {
                key: key.to_string(),
                message: injected("delete"),
            }));
        }
        lock(&self.delete_history).push(key.to_string());
        lock(&self.entries).remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> BrokerResult<Vec<String>> {
        if *lock(&self.should_fail) || *lock(&self.fail_list) {
            return Err(BrokerError::Storage(StorageError::ListFailed {
                prefix: prefix.to_string(),
                message: injected("list"),
            }));
        }
        Ok(list_prefix(&lock(&self.entries), prefix))
    }
}

/// Create in-memory storage.
pub fn create_in_memory_storage() -> InMemoryStorage {
    InMemoryStorage::new()
}

/// Create mock storage for testing.
pub fn create_mock_storage() -> MockStorage {
    MockStorage::new()
}
