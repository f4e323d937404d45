//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//! Every [`Metrics`] owns its own registry, so several ledgers (and tests)
//! can live in one process without clashing on the default registry.
//!
//! # Metrics
//!
//! - `ledger_transfers_total{strategy,status}` - Transfer attempts by outcome
//! - `ledger_version_conflicts_total` - Version conflicts at commit
//! - `ledger_lock_wait_seconds` - Histogram of pessimistic lock waits
//! - `ledger_isolation_probes_total{level}` - Isolation probes run
//! - `ledger_sink_errors_total` - Records the durable sink failed to persist

use crate::types::{IsolationLevel, Strategy, TransactionStatus};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transfer attempts by strategy and status
    pub transfers_total: IntCounterVec,

    /// Version conflicts (atomic and optimistic commits)
    pub version_conflicts: IntCounter,

    /// Lock wait histogram
    pub lock_wait: Histogram,

    /// Isolation probes by level
    pub probes_total: IntCounterVec,

    /// Durable sink failures
    pub sink_errors: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transfers_total = IntCounterVec::new(
            Opts::new("ledger_transfers_total", "Transfer attempts by outcome"),
            &["strategy", "status"],
        )?;
        registry.register(Box::new(transfers_total.clone()))?;

        let version_conflicts = IntCounter::new(
            "ledger_version_conflicts_total",
            "Version conflicts detected at commit",
        )?;
        registry.register(Box::new(version_conflicts.clone()))?;

        let lock_wait = Histogram::with_opts(
            HistogramOpts::new("ledger_lock_wait_seconds", "Pessimistic lock wait time")
                .buckets(vec![0.001, 0.005, 0.010, 0.050, 0.100, 0.250, 0.500, 1.0, 5.0]),
        )?;
        registry.register(Box::new(lock_wait.clone()))?;

        let probes_total = IntCounterVec::new(
            Opts::new("ledger_isolation_probes_total", "Isolation probes run"),
            &["level"],
        )?;
        registry.register(Box::new(probes_total.clone()))?;

        let sink_errors = IntCounter::new(
            "ledger_sink_errors_total",
            "Records the durable sink failed to persist",
        )?;
        registry.register(Box::new(sink_errors.clone()))?;

        Ok(Self {
            transfers_total,
            version_conflicts,
            lock_wait,
            probes_total,
            sink_errors,
            registry,
        })
    }

    /// Record a finished transfer
    pub fn record_transfer(&self, strategy: Strategy, status: TransactionStatus) {
        self.transfers_total
            .with_label_values(&[strategy.as_str(), status.as_str()])
            .inc();
    }

    /// Count of transfers with the given labels
    pub fn transfers(&self, strategy: Strategy, status: TransactionStatus) -> u64 {
        self.transfers_total
            .with_label_values(&[strategy.as_str(), status.as_str()])
            .get()
    }

    /// Record a version conflict
    pub fn record_conflict(&self) {
        self.version_conflicts.inc();
    }

    /// Record time spent waiting for locks
    pub fn record_lock_wait(&self, waited: Duration) {
        self.lock_wait.observe(waited.as_secs_f64());
    }

    /// Record an isolation probe
    pub fn record_probe(&self, level: IsolationLevel) {
        self.probes_total.with_label_values(&[level.as_str()]).inc();
    }

    /// Record a durable sink failure
    pub fn record_sink_error(&self) {
        self.sink_errors.inc();
    }

    /// Render the registry in the text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.version_conflicts.get(), 0);
        assert_eq!(metrics.sink_errors.get(), 0);
    }

    #[test]
    fn test_independent_registries() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_conflict();
        assert_eq!(first.version_conflicts.get(), 1);
        assert_eq!(second.version_conflicts.get(), 0);
    }

    #[test]
    fn test_record_transfer() {
        let metrics = Metrics::new().unwrap();
        metrics.record_transfer(Strategy::Atomic, TransactionStatus::Success);
        metrics.record_transfer(Strategy::Atomic, TransactionStatus::Success);
        metrics.record_transfer(Strategy::Uncontrolled, TransactionStatus::RolledBack);

        assert_eq!(metrics.transfers(Strategy::Atomic, TransactionStatus::Success), 2);
        assert_eq!(
            metrics.transfers(Strategy::Uncontrolled, TransactionStatus::RolledBack),
            1
        );
    }

    #[test]
    fn test_render() {
        let metrics = Metrics::new().unwrap();
        metrics.record_probe(IsolationLevel::Serializable);
        metrics.record_lock_wait(Duration::from_millis(3));

        let text = metrics.render();
        assert!(text.contains("ledger_isolation_probes_total{level=\"serializable\"} 1"));
        assert!(text.contains("ledger_lock_wait_seconds_count 1"));
    }
}
