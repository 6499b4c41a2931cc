//! BIG-IP Token Broker
//!
//! Issues short-lived F5 BIG-IP authentication tokens from stored
//! connections, keeps a ledger of every token handed out, and revokes
//! expired ones during periodic reconciliation.
//!
//! # Features
//!
//! - Connection registry with a connectivity probe before anything is stored
//! - Token issuance with a caller-chosen lifetime (iControl REST login plus
//!   timeout update)
//! - Explicit revocation and validation of issued tokens
//! - Reconciliation of expired tokens, on demand or on a schedule
//!
//! # Example
//!
//! ```rust,ignore
//! use bigip_token_integration::{
//!     BigIpClientFactory, BrokerConfig, ConnectionInput, InMemoryStorage, IssueRequest,
//!     LifecycleEngine, ReconcileScheduler, TlsPolicy,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BrokerConfig::from_env()?;
//!     let factory = BigIpClientFactory::new(&config)?;
//!     let engine = Arc::new(LifecycleEngine::new(
//!         config,
//!         Arc::new(InMemoryStorage::new()),
//!         Arc::new(factory),
//!     ));
//!
//!     engine
//!         .write_connection(
//!             ConnectionInput::new("lab1", "10.1.1.245", "admin", "secret")
//!                 .tls_policy(TlsPolicy::SkipVerify),
//!         )
//!         .await?;
//!
//!     let issued = engine.issue(IssueRequest::new("lab1").ttl_secs(300)).await?;
//!     println!("X-F5-Auth-Token: {}", issued.token());
//!
//!     let scheduler = ReconcileScheduler::start(engine.clone());
//!     // ...
//!     scheduler.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - `types`: connection, token and configuration types
//! - `error`: error hierarchy
//! - `core`: HTTP transport, clock and keyed locks
//! - `storage`: key-value storage seam
//! - `remote`: BIG-IP auth protocol client and client factory
//! - `connection`: connection store
//! - `token`: token ledger
//! - `engine`: lifecycle engine and reconcile scheduler
//! - `builders`: fluent configuration builder
//! - `telemetry`: metrics and logging setup

pub mod builders;
pub mod connection;
pub mod core;
pub mod engine;
pub mod error;
pub mod remote;
pub mod storage;
pub mod telemetry;
pub mod token;
pub mod types;

// Re-export engine
pub use engine::{LifecycleEngine, ReconcileScheduler};

// Re-export builders
pub use builders::{broker_config, BrokerConfigBuilder};

// Re-export errors
pub use error::{
    get_user_message, AuthError, BrokerError, BrokerResult, NotFoundError, StorageError,
    TransportError, ValidationError,
};

// Re-export types
pub use types::{
    // Config
    BrokerConfig, DEFAULT_MAX_RESPONSE_SIZE, DEFAULT_PROBE_TTL, DEFAULT_RECONCILE_INTERVAL,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_TOKEN_TTL, MAX_TOKEN_TTL,
    // Connection
    Connection, ConnectionConfig, ConnectionInput, TlsPolicy,
    // Token
    Deactivation, DeactivationReason, IssueRequest, IssuedToken, ReconcileReport, TokenRecord,
    TokenState, TokenSummary,
};

// Re-export core components
pub use crate::core::{
    // Transport
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, MockHttpTransport,
    ReqwestHttpTransport,
    // Clock
    Clock, MockClock, SystemClock,
    // Locks
    KeyedLocks,
};

// Re-export storage
pub use storage::{InMemoryStorage, KvStorage, MockStorage};

// Re-export remote
pub use remote::{
    AcquiredToken, BigIpAuthClient, BigIpClientFactory, MockFailure, MockRemoteAuthClient,
    MockRemoteClientFactory, RemoteAuthClient, RemoteClientFactory,
};

// Re-export stores
pub use connection::ConnectionStore;
pub use token::{ActiveScan, TokenLedger};

// Re-export telemetry
pub use telemetry::{
    create_in_memory_metrics, no_op_metrics, BrokerMetrics, InMemoryMetrics, LogFormat, LogLevel,
    LoggingConfig, MetricEntry, NoOpMetrics,
};
