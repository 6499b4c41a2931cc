//! Integration tests for the lifecycle engine.

use bigip_token_integration::storage::TOKEN_PREFIX;
use bigip_token_integration::{
    BigIpClientFactory, BrokerConfig, BrokerError, ConnectionInput, HttpMethod, InMemoryMetrics,
    InMemoryStorage, IssueRequest, KvStorage, LifecycleEngine, MockClock, MockFailure,
    MockHttpTransport, MockRemoteClientFactory, MockStorage, ReconcileReport, TlsPolicy,
    TokenState, ValidationError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

struct Harness {
    engine: Arc<LifecycleEngine>,
    factory: Arc<MockRemoteClientFactory>,
    clock: Arc<MockClock>,
    metrics: Arc<InMemoryMetrics>,
}

fn harness_with_storage(storage: Arc<dyn KvStorage>) -> Harness {
    let factory = Arc::new(MockRemoteClientFactory::new());
    let clock = Arc::new(MockClock::starting_now());
    let metrics = Arc::new(InMemoryMetrics::new());
    let engine = Arc::new(LifecycleEngine::with_components(
        BrokerConfig::default(),
        storage,
        factory.clone(),
        clock.clone(),
        metrics.clone(),
    ));
    Harness {
        engine,
        factory,
        clock,
        metrics,
    }
}

fn harness() -> Harness {
    harness_with_storage(Arc::new(InMemoryStorage::new()))
}

fn lab(name: &str) -> ConnectionInput {
    ConnectionInput::new(name, "10.1.1.245", "admin", "hunter2").tls_policy(TlsPolicy::SkipVerify)
}

async fn with_connection(h: &Harness, name: &str) {
    h.engine.write_connection(lab(name)).await.unwrap();
    // Forget the probe calls
    h.factory.client(name).clear_history();
}

#[tokio::test]
async fn test_write_then_read_connection() {
    let h = harness();
    let written = h.engine.write_connection(lab("lab1")).await.unwrap();
    let read = h.engine.read_connection("lab1").await.unwrap();

    assert_eq!(written, read);
    assert_eq!(read.name, "lab1");
    assert_eq!(read.endpoint, "https://10.1.1.245");
    assert_eq!(read.tls_policy, TlsPolicy::SkipVerify);
    assert!(!serde_json::to_string(&read).unwrap().contains("hunter2"));
    assert_eq!(h.engine.list_connections().await.unwrap(), vec!["lab1"]);
}

#[tokio::test]
async fn test_unreachable_connection_is_not_stored() {
    let h = harness();
    h.factory
        .client("lab1")
        .fail_acquire(Some(MockFailure::Transport));

    let error = h.engine.write_connection(lab("lab1")).await.unwrap_err();
    assert!(matches!(
        error,
        BrokerError::Validation(ValidationError::ProbeFailed { .. })
    ));
    assert!(!h.engine.connection_exists("lab1").await.unwrap());
    assert!(h.engine.read_connection("lab1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_rejected_credentials_are_not_stored() {
    let h = harness();
    h.factory.client("lab1").fail_acquire(Some(MockFailure::Auth));

    let error = h.engine.write_connection(lab("lab1")).await.unwrap_err();
    assert!(matches!(
        error,
        BrokerError::Validation(ValidationError::ProbeFailed { .. })
    ));
    assert!(h.engine.list_connections().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_issue_sets_expiry_from_ttl() {
    let h = harness();
    with_connection(&h, "lab1").await;

    for ttl in [1, 5, 1200, 3600, 36000] {
        let issued = h
            .engine
            .issue(IssueRequest::new("lab1").ttl_secs(ttl))
            .await
            .unwrap();
        assert_eq!((issued.expires_at - issued.issued_at).num_seconds(), ttl as i64);
        assert!(issued.token().starts_with("mock-token-"));
        assert!(issued.token_id.starts_with("token_lab1_"));

        let summary = h.engine.read_token(&issued.token_id).await.unwrap();
        assert!(summary.active);
        assert_eq!(summary.state, TokenState::Active);
    }
}

#[tokio::test]
async fn test_issue_default_and_invalid_ttl() {
    let h = harness();
    with_connection(&h, "lab1").await;

    let issued = h.engine.issue(IssueRequest::new("lab1")).await.unwrap();
    assert_eq!(issued.ttl, Duration::from_secs(3600));

    for ttl in [0, 36001] {
        let error = h
            .engine
            .issue(IssueRequest::new("lab1").ttl_secs(ttl))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            BrokerError::Validation(ValidationError::InvalidTtl { .. })
        ));
    }
    // Rejected before any remote call
    assert_eq!(h.factory.client("lab1").get_acquire_history(), vec![3600]);
}

#[tokio::test]
async fn test_unrepresentable_expiry_rejected_before_login() {
    let factory = Arc::new(MockRemoteClientFactory::new());
    let config = BrokerConfig {
        max_ttl: Duration::from_secs(u64::MAX / 2),
        ..BrokerConfig::default()
    };
    let engine = LifecycleEngine::with_components(
        config,
        Arc::new(InMemoryStorage::new()),
        factory.clone(),
        Arc::new(MockClock::starting_now()),
        Arc::new(InMemoryMetrics::new()),
    );
    engine.write_connection(lab("lab1")).await.unwrap();
    factory.client("lab1").clear_history();

    let error = engine
        .issue(IssueRequest::new("lab1").ttl_secs(10_000_000_000_000))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        BrokerError::Validation(ValidationError::InvalidTtl { .. })
    ));
    assert!(factory.client("lab1").get_acquire_history().is_empty());
    assert!(engine.list_token_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_issue_unknown_connection_creates_nothing() {
    let h = harness();
    let error = h
        .engine
        .issue(IssueRequest::new("nope").ttl_secs(60))
        .await
        .unwrap_err();

    assert!(error.is_not_found());
    assert!(h.engine.list_token_ids().await.unwrap().is_empty());
    assert_eq!(
        h.metrics
            .sum_where("bigip_token_issues_total", "success", "false"),
        1.0
    );
}

#[tokio::test]
async fn test_expired_token_reconciled_with_one_revoke() {
    let h = harness();
    with_connection(&h, "lab1").await;

    let issued = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(5))
        .await
        .unwrap();
    h.clock.advance_secs(6);

    let report = h.engine.reconcile_now().await.unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            reconciled: 1,
            ..Default::default()
        }
    );

    let summary = h.engine.read_token(&issued.token_id).await.unwrap();
    assert!(!summary.active);
    assert_eq!(summary.state, TokenState::Reconciled);
    assert_eq!(
        h.factory.client("lab1").get_revoke_history(),
        vec![issued.token().to_string()]
    );
}

#[tokio::test]
async fn test_unexpired_token_left_alone() {
    let h = harness();
    with_connection(&h, "lab1").await;
    let issued = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(60))
        .await
        .unwrap();
    h.clock.advance_secs(59);

    assert!(h.engine.reconcile_now().await.unwrap().is_empty());
    assert!(h.engine.read_token(&issued.token_id).await.unwrap().active);
    assert!(h.factory.client("lab1").get_revoke_history().is_empty());
}

#[tokio::test]
async fn test_reconcile_twice_second_is_empty() {
    let h = harness();
    with_connection(&h, "lab1").await;
    for _ in 0..3 {
        h.engine
            .issue(IssueRequest::new("lab1").ttl_secs(5))
            .await
            .unwrap();
    }
    h.clock.advance_secs(10);

    assert_eq!(h.engine.reconcile_now().await.unwrap().reconciled, 3);
    assert!(h.engine.reconcile_now().await.unwrap().is_empty());
    assert_eq!(h.factory.client("lab1").get_revoke_history().len(), 3);
}

#[tokio::test]
async fn test_failed_timeout_update_fails_issue_and_revokes() {
    let h = harness();
    with_connection(&h, "lab1").await;
    h.factory.client("lab1").fail_adjust(Some(MockFailure::Auth));

    let error = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(3600))
        .await
        .unwrap_err();

    assert!(matches!(error, BrokerError::Auth(_)));
    assert_eq!(
        h.factory.client("lab1").get_revoke_history(),
        vec!["mock-token-2"]
    );
    assert!(h.engine.list_token_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_deleted_connection_is_skipped_not_fatal() {
    let h = harness();
    with_connection(&h, "lab1").await;
    with_connection(&h, "lab2").await;

    let orphan = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(5))
        .await
        .unwrap();
    let other = h
        .engine
        .issue(IssueRequest::new("lab2").ttl_secs(5))
        .await
        .unwrap();
    h.engine.delete_connection("lab1").await.unwrap();
    h.clock.advance_secs(6);

    let report = h.engine.reconcile_now().await.unwrap();
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.skipped, 1);

    assert!(h.engine.read_token(&orphan.token_id).await.unwrap().active);
    assert!(!h.engine.read_token(&other.token_id).await.unwrap().active);
    assert!(h.factory.client("lab1").get_revoke_history().is_empty());

    // The orphan is carried over to every later pass
    let again = h.engine.reconcile_now().await.unwrap();
    assert_eq!(again.skipped, 1);
    assert!(!again.is_empty());
    assert!(again.is_settled());
}

#[tokio::test]
async fn test_failed_remote_revoke_still_deactivates() {
    let h = harness();
    with_connection(&h, "lab1").await;
    let issued = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(5))
        .await
        .unwrap();
    h.factory
        .client("lab1")
        .fail_revoke(Some(MockFailure::Transport));
    h.clock.advance_secs(6);

    let report = h.engine.reconcile_now().await.unwrap();
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.revoke_failures, 1);
    assert!(!h.engine.read_token(&issued.token_id).await.unwrap().active);
}

#[tokio::test]
async fn test_unreadable_record_counted_and_pass_continues() {
    let storage = Arc::new(MockStorage::new());
    let h = harness_with_storage(storage.clone());
    with_connection(&h, "lab1").await;
    let issued = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(5))
        .await
        .unwrap();
    storage.insert_raw(format!("{}garbage", TOKEN_PREFIX), b"not json".to_vec());
    h.clock.advance_secs(6);

    let report = h.engine.reconcile_now().await.unwrap();
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.errored, 1);
    assert!(!h.engine.read_token(&issued.token_id).await.unwrap().active);
}

#[tokio::test]
async fn test_ledger_write_failure_revokes_remote_token() {
    let storage = Arc::new(MockStorage::new());
    let h = harness_with_storage(storage.clone());
    with_connection(&h, "lab1").await;
    storage.fail_puts_with_prefix(TOKEN_PREFIX);

    let error = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(60))
        .await
        .unwrap_err();

    assert!(matches!(error, BrokerError::Storage(_)));
    assert_eq!(
        h.factory.client("lab1").get_revoke_history(),
        vec!["mock-token-2"]
    );
    assert_eq!(
        h.metrics
            .sum_where("bigip_token_compensations_total", "success", "true"),
        1.0
    );
    storage.clear_failures();
    assert!(h.engine.list_token_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_explicit_revoke() {
    let h = harness();
    with_connection(&h, "lab1").await;
    let issued = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(600))
        .await
        .unwrap();

    assert_ok!(h.engine.revoke_token(&issued.token_id).await);
    let summary = h.engine.read_token(&issued.token_id).await.unwrap();
    assert_eq!(summary.state, TokenState::Revoked);

    // Second revoke is a no-op without a remote call
    assert_ok!(h.engine.revoke_token(&issued.token_id).await);
    assert_eq!(h.factory.client("lab1").get_revoke_history().len(), 1);

    // Reconciliation never flips it back or revokes again
    h.clock.advance_secs(601);
    assert!(h.engine.reconcile_now().await.unwrap().is_empty());
    assert_eq!(
        h.engine.read_token(&issued.token_id).await.unwrap().state,
        TokenState::Revoked
    );
}

#[tokio::test]
async fn test_explicit_revoke_failure_keeps_token_active() {
    let h = harness();
    with_connection(&h, "lab1").await;
    let issued = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(600))
        .await
        .unwrap();
    h.factory.client("lab1").fail_revoke(Some(MockFailure::Auth));

    assert_err!(h.engine.revoke_token(&issued.token_id).await);
    assert!(h.engine.read_token(&issued.token_id).await.unwrap().active);

    h.factory.client("lab1").fail_revoke(None);
    assert_ok!(h.engine.revoke_token(&issued.token_id).await);
    assert!(!h.engine.read_token(&issued.token_id).await.unwrap().active);
}

#[tokio::test]
async fn test_missing_token_is_not_found() {
    let h = harness();
    assert!(h.engine.read_token("token_x_1_00000000").await.unwrap_err().is_not_found());
    assert!(h.engine.revoke_token("token_x_1_00000000").await.unwrap_err().is_not_found());
    assert!(h.engine.validate_token("token_x_1_00000000").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_validate_token() {
    let h = harness();
    with_connection(&h, "lab1").await;
    let issued = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(30))
        .await
        .unwrap();

    assert!(h.engine.validate_token(&issued.token_id).await.unwrap());
    h.factory.client("lab1").set_valid(false);
    assert!(!h.engine.validate_token(&issued.token_id).await.unwrap());

    // Locally expired: no remote call
    h.clock.advance_secs(31);
    assert!(!h.engine.validate_token(&issued.token_id).await.unwrap());
    assert_eq!(h.factory.client("lab1").get_validate_history().len(), 2);
}

#[tokio::test]
async fn test_list_tokens_hides_expired_and_inactive() {
    let h = harness();
    with_connection(&h, "lab1").await;
    let short = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(5))
        .await
        .unwrap();
    let long = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(600))
        .await
        .unwrap();
    let revoked = h
        .engine
        .issue(IssueRequest::new("lab1").ttl_secs(600))
        .await
        .unwrap();
    h.engine.revoke_token(&revoked.token_id).await.unwrap();
    h.clock.advance_secs(6);

    let listed: Vec<String> = h
        .engine
        .list_tokens()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.token_id)
        .collect();
    assert_eq!(listed, vec![long.token_id.clone()]);

    // The expired record is still in the ledger until reconciled
    let ids = h.engine.list_token_ids().await.unwrap();
    assert!(ids.contains(&short.token_id));
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn test_concurrent_issue_and_reconcile() {
    let h = harness();
    with_connection(&h, "lab1").await;

    let mut handles = Vec::new();
    for i in 0..20u64 {
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .issue(IssueRequest::new("lab1").ttl_secs(1 + i % 3))
                .await
        }));
    }
    let reconciler = {
        let engine = h.engine.clone();
        tokio::spawn(async move { engine.reconcile_now().await })
    };

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    reconciler.await.unwrap().unwrap();

    h.clock.advance_secs(10);
    let (a, b) = tokio::join!(h.engine.reconcile_now(), h.engine.reconcile_now());
    assert_eq!(a.unwrap().reconciled + b.unwrap().reconciled, 20);
    assert_eq!(h.factory.client("lab1").get_revoke_history().len(), 20);
    assert!(h.engine.list_tokens().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_engine_over_wire_protocol() {
    let transport = Arc::new(MockHttpTransport::new());
    let config = BrokerConfig::default();
    let factory = BigIpClientFactory::with_transport(&config, transport.clone());
    let clock = Arc::new(MockClock::starting_now());
    let engine = LifecycleEngine::with_components(
        config,
        Arc::new(InMemoryStorage::new()),
        Arc::new(factory),
        clock.clone(),
        Arc::new(InMemoryMetrics::new()),
    );

    // Probe: login (60 s differs from 1200, so a timeout update) then revoke
    transport
        .queue_json_response(200, &serde_json::json!({"token": {"token": "PROBE", "timeout": 1200}}))
        .queue_status(200)
        .queue_status(200);
    engine.write_connection(lab("lab1")).await.unwrap();

    // Issue at the remote default: login only
    transport.queue_json_response(200, &serde_json::json!({"token": {"token": "REAL", "timeout": 1200}}));
    let issued = engine
        .issue(IssueRequest::new("lab1").ttl_secs(1200))
        .await
        .unwrap();
    assert_eq!(issued.token(), "REAL");

    clock.advance_secs(1201);
    transport.queue_status(204);
    let report = engine.reconcile_now().await.unwrap();
    assert_eq!(report.reconciled, 1);

    let deletes = transport.get_requests_by_method(HttpMethod::Delete);
    assert_eq!(deletes.len(), 2);
    assert_eq!(
        deletes[1].url,
        "https://10.1.1.245/mgmt/shared/authz/tokens/REAL"
    );
}
