//! Lifecycle Engine
//!
//! Issues tokens, revokes and validates them on request, and reconciles
//! expired ledger entries with the remote systems.
//!
//! Per token: `Issuing -> Active -> {Reconciled, Revoked}`. A token only
//! reaches `Active` once both the remote login and the ledger write
//! succeeded; a failed ledger write revokes the remote token again.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::connection::ConnectionStore;
use crate::core::{Clock, SystemClock};
use crate::error::BrokerResult;
use crate::remote::RemoteClientFactory;
use crate::storage::KvStorage;
use crate::telemetry::{BrokerMetrics, NoOpMetrics};
use crate::token::TokenLedger;
use crate::types::{
    BrokerConfig, Connection, ConnectionInput, DeactivationReason, IssueRequest, IssuedToken,
    ReconcileReport, TokenRecord, TokenSummary,
};

/// Token lifecycle coordinator.
///
/// Construct once and share behind an `Arc`.
pub struct LifecycleEngine {
    config: BrokerConfig,
    connections: ConnectionStore,
    ledger: TokenLedger,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn BrokerMetrics>,
    reconcile_pass: Mutex<()>,
}

impl LifecycleEngine {
    /// Create an engine on the system clock without metrics.
    pub fn new(
        config: BrokerConfig,
        storage: Arc<dyn KvStorage>,
        factory: Arc<dyn RemoteClientFactory>,
    ) -> Self {
        Self::with_components(
            config,
            storage,
            factory,
            Arc::new(SystemClock),
            Arc::new(NoOpMetrics),
        )
    }

    /// Create an engine with every collaborator supplied.
    pub fn with_components(
        config: BrokerConfig,
        storage: Arc<dyn KvStorage>,
        factory: Arc<dyn RemoteClientFactory>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn BrokerMetrics>,
    ) -> Self {
        let connections = ConnectionStore::new(
            storage.clone(),
            factory,
            clock.clone(),
            metrics.clone(),
            config.probe_ttl,
        );
        Self {
            config,
            connections,
            ledger: TokenLedger::new(storage),
            clock,
            metrics,
            reconcile_pass: Mutex::new(()),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Underlying connection store.
    pub fn connections(&self) -> &ConnectionStore {
        &self.connections
    }

    /// Underlying token ledger.
    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    fn observe<T>(&self, operation: &str, result: BrokerResult<T>) -> BrokerResult<T> {
        if let Err(error) = &result {
            self.metrics.record_error(error.error_code(), operation);
        }
        result
    }

    // Connections

    /// Create or replace a connection after probing it.
    #[instrument(skip(self, input), fields(connection = %input.name))]
    pub async fn write_connection(&self, input: ConnectionInput) -> BrokerResult<Connection> {
        let result = self.connections.write(input).await;
        self.observe("write_connection", result)
    }

    /// Read a connection without credentials.
    pub async fn read_connection(&self, name: &str) -> BrokerResult<Connection> {
        self.connections.read(name).await
    }

    /// Delete a connection. Its tokens stay in the ledger.
    pub async fn delete_connection(&self, name: &str) -> BrokerResult<()> {
        self.connections.delete(name).await
    }

    /// Connection names in lexical order.
    pub async fn list_connections(&self) -> BrokerResult<Vec<String>> {
        self.connections.list().await
    }

    /// Whether a connection exists.
    pub async fn connection_exists(&self, name: &str) -> BrokerResult<bool> {
        self.connections.exists(name).await
    }

    // Tokens

    /// Issue a token through a connection.
    #[instrument(skip(self, request), fields(connection = %request.connection_name))]
    pub async fn issue(&self, request: IssueRequest) -> BrokerResult<IssuedToken> {
        let result = self.issue_inner(&request).await;
        self.metrics
            .record_issue(&request.connection_name, result.is_ok());
        self.observe("issue", result)
    }

    async fn issue_inner(&self, request: &IssueRequest) -> BrokerResult<IssuedToken> {
        let ttl = self.config.resolve_ttl(request.ttl)?;
        TokenRecord::expiry(self.clock.now(), ttl.as_secs())?;
        let name = request.connection_name.as_str();
        let client = self.connections.resolve(name).await?;
        let acquired = client.acquire(ttl.as_secs()).await?;

        let issued_at = self.clock.now();
        let token_id = generate_token_id(name, issued_at);
        let recorded = match TokenRecord::new(
            token_id.as_str(),
            acquired.value.clone(),
            name,
            issued_at,
            ttl.as_secs(),
        ) {
            Ok(record) => match self.ledger.record(&record).await {
                Ok(()) => Ok(record),
                Err(error) => Err(error),
            },
            Err(error) => Err(error),
        };

        let record = match recorded {
            Ok(record) => record,
            Err(error) => {
                warn!(
                    token_id = %token_id,
                    error = %error,
                    "Token could not be recorded; revoking the remote token"
                );
                let compensation = client.revoke(&acquired.value).await;
                self.metrics.record_compensation(name, compensation.is_ok());
                if let Err(revoke_error) = compensation {
                    warn!(
                        token_id = %token_id,
                        error = %revoke_error,
                        "Compensating revoke failed; remote token will expire on its own"
                    );
                }
                return Err(error);
            }
        };

        info!(
            token_id = %record.token_id,
            expires_at = %record.expires_at,
            ttl_secs = ttl.as_secs(),
            "Token issued"
        );
        Ok(IssuedToken::from_record(&record, ttl))
    }

    /// Active, unexpired tokens. Remote values are not included.
    pub async fn list_tokens(&self) -> BrokerResult<Vec<TokenSummary>> {
        let now = self.clock.now();
        Ok(self
            .ledger
            .list_active()
            .await?
            .iter()
            .filter(|record| !record.is_expired_at(now))
            .map(TokenRecord::summary)
            .collect())
    }

    /// Every token ID in the ledger, active or not.
    pub async fn list_token_ids(&self) -> BrokerResult<Vec<String>> {
        self.ledger.list_ids().await
    }

    /// Token metadata.
    pub async fn read_token(&self, token_id: &str) -> BrokerResult<TokenSummary> {
        Ok(self.ledger.get(token_id).await?.summary())
    }

    /// Revoke a token now.
    ///
    /// Succeeds without a remote call if the token is already inactive. If
    /// the remote revoke fails the record stays active so the call can be
    /// retried.
    #[instrument(skip(self))]
    pub async fn revoke_token(&self, token_id: &str) -> BrokerResult<()> {
        let result = self.revoke_inner(token_id).await;
        self.observe("revoke", result)
    }

    async fn revoke_inner(&self, token_id: &str) -> BrokerResult<()> {
        let record = self.ledger.get(token_id).await?;
        if !record.active {
            debug!(state = ?record.state(), "Token already inactive");
            return Ok(());
        }

        let client = self.connections.resolve(&record.connection_name).await?;
        let revoked = client.revoke(record.remote_value()).await;
        self.metrics
            .record_revocation(&record.connection_name, revoked.is_ok());
        revoked?;

        if self
            .ledger
            .deactivate(token_id, DeactivationReason::Revoked, self.clock.now())
            .await?
        {
            info!("Token revoked");
        }
        Ok(())
    }

    /// Whether the remote system still accepts a token.
    ///
    /// Inactive or locally expired tokens are reported invalid without a
    /// remote call.
    #[instrument(skip(self))]
    pub async fn validate_token(&self, token_id: &str) -> BrokerResult<bool> {
        let record = self.ledger.get(token_id).await?;
        if !record.active || record.is_expired_at(self.clock.now()) {
            return Ok(false);
        }
        let client = self.connections.resolve(&record.connection_name).await?;
        let result = client.validate(record.remote_value()).await;
        self.observe("validate", result)
    }

    // Reconciliation

    /// Reconcile against the engine clock.
    pub async fn reconcile_now(&self) -> BrokerResult<ReconcileReport> {
        self.reconcile(self.clock.now()).await
    }

    /// Deactivate every active record that expired by `now`, revoking each
    /// remotely first.
    ///
    /// Records whose connection cannot be resolved stay active and are
    /// counted as skipped. A failed remote revoke still deactivates the
    /// record. Only a failure to list the ledger is returned as an error;
    /// per-record failures are logged and counted. Concurrent calls run one
    /// after another.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, now: DateTime<Utc>) -> BrokerResult<ReconcileReport> {
        let _pass = self.reconcile_pass.lock().await;
        let started = Instant::now();

        let scan = self.ledger.scan_active().await?;
        let mut report = ReconcileReport {
            errored: scan.unreadable.len(),
            ..Default::default()
        };

        for record in scan.records.iter().filter(|r| r.is_expired_at(now)) {
            self.reconcile_record(record, now, &mut report).await;
        }

        self.metrics
            .record_reconcile(&report, started.elapsed().as_secs_f64() * 1000.0);
        if report.is_empty() {
            debug!("Reconciliation found nothing to do");
        } else {
            info!(
                reconciled = report.reconciled,
                revoke_failures = report.revoke_failures,
                skipped = report.skipped,
                errored = report.errored,
                "Reconciliation pass finished"
            );
        }
        Ok(report)
    }

    async fn reconcile_record(
        &self,
        record: &TokenRecord,
        now: DateTime<Utc>,
        report: &mut ReconcileReport,
    ) {
        let client = match self.connections.resolve(&record.connection_name).await {
            Ok(client) => client,
            Err(error) => {
                warn!(
                    token_id = %record.token_id,
                    connection = %record.connection_name,
                    error = %error,
                    "Cannot resolve connection for expired token; leaving it active"
                );
                report.skipped += 1;
                return;
            }
        };

        let revoked = client.revoke(record.remote_value()).await;
        self.metrics
            .record_revocation(&record.connection_name, revoked.is_ok());
        if let Err(error) = &revoked {
            warn!(
                token_id = %record.token_id,
                error = %error,
                "Remote revoke of expired token failed; deactivating anyway"
            );
        }

        match self
            .ledger
            .deactivate(&record.token_id, DeactivationReason::Reconciled, now)
            .await
        {
            Ok(true) => {
                report.reconciled += 1;
                if revoked.is_err() {
                    report.revoke_failures += 1;
                }
                debug!(token_id = %record.token_id, "Token reconciled");
            }
            Ok(false) => {
                debug!(token_id = %record.token_id, "Token deactivated concurrently");
            }
            Err(error) => {
                warn!(
                    token_id = %record.token_id,
                    error = %error,
                    "Could not deactivate expired token"
                );
                report.errored += 1;
            }
        }
    }
}

/// Build a token ID: `token_<connection>_<unix seconds>_<8 hex digits>`.
fn generate_token_id(connection: &str, issued_at: DateTime<Utc>) -> String {
    format!(
        "token_{}_{}_{:08x}",
        connection,
        issued_at.timestamp(),
        rand::random::<u32>()
    )
}

impl std::fmt::Debug for LifecycleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
