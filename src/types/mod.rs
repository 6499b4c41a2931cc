//! Broker Types
//!
//! Connection, token and configuration types shared by every component.

pub mod config;
pub mod connection;
pub mod token;

pub use config::*;
pub use connection::*;
pub use token::*;

use secrecy::{ExposeSecret, SecretString};
use serde::Serializer;

/// Serialize a secret as its plain value, for persisted records only.
pub(crate) fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}
