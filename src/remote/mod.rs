//! Remote Auth
//!
//! BIG-IP token protocol client and the factory binding it to connections.

pub mod client;
pub mod factory;

pub use client::{
    create_mock_remote_client, AcquiredToken, BigIpAuthClient, MockFailure, MockRemoteAuthClient,
    RemoteAuthClient, AUTH_TOKEN_HEADER, REMOTE_DEFAULT_TIMEOUT_SECS,
};
pub use factory::{
    create_mock_client_factory, BigIpClientFactory, MockRemoteClientFactory, RemoteClientFactory,
};
