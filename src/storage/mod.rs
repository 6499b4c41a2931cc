//! Storage
//!
//! Durable key-value seam and the JSON entry helpers built on it.
//!
//! Persisted layout:
//!
//! - `connection/<name>`: connection record
//! - `token/<token_id>`: token record

pub mod backend;

pub use backend::{
    create_in_memory_storage, create_mock_storage, InMemoryStorage, KvStorage, MockStorage,
};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{BrokerResult, StorageError};

/// Key prefix for connection records.
pub const CONNECTION_PREFIX: &str = "connection/";

/// Key prefix for token records.
pub const TOKEN_PREFIX: &str = "token/";

/// Storage key of a connection.
pub fn connection_key(name: &str) -> String {
    format!("{}{}", CONNECTION_PREFIX, name)
}

/// Storage key of a token record.
pub fn token_key(token_id: &str) -> String {
    format!("{}{}", TOKEN_PREFIX, token_id)
}

/// Read and decode a JSON entry.
pub async fn get_json<T>(storage: &dyn KvStorage, key: &str) -> BrokerResult<Option<T>>
where
    T: DeserializeOwned,
{
    let Some(raw) = storage.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_slice(&raw).map(Some).map_err(|e| {
        StorageError::CorruptedData {
            key: key.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

/// Encode and write a JSON entry.
pub async fn put_json<T>(storage: &dyn KvStorage, key: &str, value: &T) -> BrokerResult<()>
where
    T: Serialize + Sync,
{
    let raw = serde_json::to_vec(value).map_err(|e| StorageError::Serialization {
        key: key.to_string(),
        message: e.to_string(),
    })?;
    storage.put(key, raw).await
}
