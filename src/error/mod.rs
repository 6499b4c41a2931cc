//! Broker Error Types
//!
//! Error hierarchy for connection management, token issuance and reconciliation.

use std::time::Duration;
use thiserror::Error;

/// Maximum number of characters of a remote response body kept in an error.
const MAX_BODY_IN_ERROR: usize = 256;

/// Root error type for the token broker.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Conflict: {key} already exists")]
    Conflict { key: String },
}

impl BrokerError {
    /// Get error code for telemetry.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "BIGIP_VALIDATION",
            Self::NotFound(_) => "BIGIP_NOT_FOUND",
            Self::Auth(_) => "BIGIP_AUTH",
            Self::Transport(_) => "BIGIP_TRANSPORT",
            Self::Storage(_) => "BIGIP_STORAGE",
            Self::Conflict { .. } => "BIGIP_CONFLICT",
        }
    }

    /// Whether a later attempt of the same operation may succeed.
    ///
    /// Only transport failures qualify; rejected credentials or bad input
    /// fail the same way every time.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Caller input rejected before any remote or storage work.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid connection name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Invalid ttl {ttl:?}: {reason}")]
    InvalidTtl { ttl: Duration, reason: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Connectivity check for '{name}' failed: {message}")]
    ProbeFailed { name: String, message: String },
}

/// Referenced entity does not exist.
#[derive(Error, Debug)]
pub enum NotFoundError {
    #[error("connection '{name}'")]
    Connection { name: String },

    #[error("token '{token_id}'")]
    Token { token_id: String },
}

/// The remote system rejected a request or answered unexpectedly.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login rejected with HTTP {status}: {message}")]
    LoginRejected { status: u16, message: String },

    #[error("Token timeout update rejected with HTTP {status}: {message}")]
    TimeoutUpdateRejected { status: u16, message: String },

    #[error("Token revocation rejected with HTTP {status}: {message}")]
    RevocationRejected { status: u16, message: String },

    #[error("Unexpected HTTP {status} from {operation}: {message}")]
    UnexpectedStatus {
        operation: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },
}

/// Network or TLS failure talking to the remote system.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Request timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("TLS error: {message}")]
    TlsError { message: String },

    #[error("Unexpected redirect to: {location}")]
    UnexpectedRedirect { location: String },

    #[error("Response too large: {size} bytes")]
    ResponseTooLarge { size: usize },
}

/// Durable store failure.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Read of '{key}' failed: {message}")]
    ReadFailed { key: String, message: String },

    #[error("Write of '{key}' failed: {message}")]
    WriteFailed { key: String, message: String },

    #[error("Delete of '{key}' failed: {message}")]
    DeleteFailed { key: String, message: String },

    #[error("List of '{prefix}' failed: {message}")]
    ListFailed { prefix: String, message: String },

    #[error("Corrupted data at '{key}': {message}")]
    CorruptedData { key: String, message: String },

    #[error("Serialization of '{key}' failed: {message}")]
    Serialization { key: String, message: String },
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Shorten a remote response body for inclusion in an error message.
pub fn summarize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_BODY_IN_ERROR {
        return trimmed.to_string();
    }
    let mut short: String = trimmed.chars().take(MAX_BODY_IN_ERROR).collect();
    short.push_str("...");
    short
}

/// Get user-friendly error message.
pub fn get_user_message(error: &BrokerError) -> String {
    match error {
        BrokerError::Validation(ValidationError::ProbeFailed { name, .. }) => format!(
            "Could not verify connection '{}'. Check the endpoint and credentials.",
            name
        ),
        BrokerError::Validation(e) => e.to_string(),
        BrokerError::NotFound(e) => format!("{} does not exist.", e),
        BrokerError::Auth(_) => {
            "The BIG-IP system rejected the request. Check the configured credentials.".to_string()
        }
        BrokerError::Transport(TransportError::Timeout { .. }) => {
            "The BIG-IP system did not respond in time. Please try again.".to_string()
        }
        BrokerError::Transport(_) => {
            "The BIG-IP system could not be reached. Please try again later.".to_string()
        }
        _ => "An internal error occurred. Please try again.".to_string(),
    }
}
