//! Metrics
//!
//! Broker metrics interface and implementations.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::core::locks::lock;
use crate::types::ReconcileReport;

/// Metric labels.
pub type MetricLabels = HashMap<String, String>;

/// Token broker metrics interface.
pub trait BrokerMetrics: Send + Sync {
    /// Record a token issue attempt.
    fn record_issue(&self, connection: &str, success: bool);

    /// Record a remote revocation (explicit or during reconciliation).
    fn record_revocation(&self, connection: &str, success: bool);

    /// Record a best-effort revoke of a token the caller never received.
    fn record_compensation(&self, connection: &str, success: bool);

    /// Record a connectivity probe made while writing a connection.
    fn record_probe(&self, connection: &str, success: bool);

    /// Record a finished reconciliation pass.
    fn record_reconcile(&self, report: &ReconcileReport, duration_ms: f64);

    /// Record an error returned to a caller.
    fn record_error(&self, error_code: &str, operation: &str);
}

/// No-op metrics implementation.
pub struct NoOpMetrics;

impl BrokerMetrics for NoOpMetrics {
    fn record_issue(&self, _connection: &str, _success: bool) {}
    fn record_revocation(&self, _connection: &str, _success: bool) {}
    fn record_compensation(&self, _connection: &str, _success: bool) {}
    fn record_probe(&self, _connection: &str, _success: bool) {}
    fn record_reconcile(&self, _report: &ReconcileReport, _duration_ms: f64) {}
    fn record_error(&self, _error_code: &str, _operation: &str) {}
}

/// No-op metrics singleton.
pub fn no_op_metrics() -> NoOpMetrics {
    NoOpMetrics
}

/// One aggregated series: a metric name plus a label set.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEntry {
    pub name: String,
    pub labels: MetricLabels,
    /// Number of recordings.
    pub count: u64,
    /// Sum of recorded values.
    pub sum: f64,
}

type SeriesKey = (String, BTreeMap<String, String>);

/// In-memory metrics for testing.
///
/// Recordings are folded into one entry per series, so memory grows with
/// label cardinality only.
#[derive(Default)]
pub struct InMemoryMetrics {
    series: Mutex<BTreeMap<SeriesKey, (u64, f64)>>,
}

impl InMemoryMetrics {
    /// Create new in-memory metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every series, ordered by name then labels.
    pub fn snapshot(&self) -> Vec<MetricEntry> {
        lock(&self.series)
            .iter()
            .map(|((name, labels), (count, sum))| MetricEntry {
                name: name.clone(),
                labels: labels.clone().into_iter().collect(),
                count: *count,
                sum: *sum,
            })
            .collect()
    }

    /// Series recorded under `name`.
    pub fn get_entries_by_name(&self, name: &str) -> Vec<MetricEntry> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }

    /// Number of recordings under `name`, across all label sets.
    pub fn count(&self, name: &str) -> u64 {
        lock(&self.series)
            .iter()
            .filter(|((series, _), _)| series == name)
            .map(|(_, (count, _))| count)
            .sum()
    }

    /// Sum of values recorded under `name` whose `label` equals `value`.
    pub fn sum_where(&self, name: &str, label: &str, value: &str) -> f64 {
        lock(&self.series)
            .iter()
            .filter(|((series, labels), _)| {
                series == name && labels.get(label).map(String::as_str) == Some(value)
            })
            .map(|(_, (_, sum))| sum)
            .sum()
    }

    /// Clear all series.
    pub fn clear(&self) {
        lock(&self.series).clear();
    }

    fn record(&self, name: &str, value: f64, labels: MetricLabels) {
        let key = (name.to_string(), labels.into_iter().collect());
        let mut series = lock(&self.series);
        let entry = series.entry(key).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += value;
    }

    fn record_outcome(&self, name: &str, connection: &str, success: bool) {
        let mut labels = MetricLabels::new();
        labels.insert("connection".to_string(), connection.to_string());
        labels.insert("success".to_string(), success.to_string());
        self.record(name, 1.0, labels);
    }
}

impl BrokerMetrics for InMemoryMetrics {
    fn record_issue(&self, connection: &str, success: bool) {
        self.record_outcome("bigip_token_issues_total", connection, success);
    }

    fn record_revocation(&self, connection: &str, success: bool) {
        self.record_outcome("bigip_token_revocations_total", connection, success);
    }

    fn record_compensation(&self, connection: &str, success: bool) {
        self.record_outcome("bigip_token_compensations_total", connection, success);
    }

    fn record_probe(&self, connection: &str, success: bool) {
        self.record_outcome("bigip_connection_probes_total", connection, success);
    }

    fn record_reconcile(&self, report: &ReconcileReport, duration_ms: f64) {
        for (outcome, count) in [
            ("reconciled", report.reconciled),
            ("revoke_failed", report.revoke_failures),
            ("skipped", report.skipped),
            ("errored", report.errored),
        ] {
            let mut labels = MetricLabels::new();
            labels.insert("outcome".to_string(), outcome.to_string());
            self.record("bigip_reconcile_tokens_total", count as f64, labels);
        }
        self.record("bigip_reconcile_duration_ms", duration_ms, MetricLabels::new());
    }

    fn record_error(&self, error_code: &str, operation: &str) {
        let mut labels = MetricLabels::new();
        labels.insert("error_code".to_string(), error_code.to_string());
        labels.insert("operation".to_string(), operation.to_string());
        self.record("bigip_errors_total", 1.0, labels);
    }
}

/// Create in-memory metrics for testing.
pub fn create_in_memory_metrics() -> InMemoryMetrics {
    InMemoryMetrics::new()
}
