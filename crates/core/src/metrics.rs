//! Engine-wide counters (ambient observability, not a spec module in its
//! own right). Live counts are plain atomics, following the same pattern
//! `NonceManager`/`GasOracle` use for their hot-path counters; a point-in-
//! time snapshot is exposed the way `TrackerStats` summarises tiered
//! position counts for logging.
//!
//! [`MetricsSnapshot`] itself only carries what `EngineMetrics` tracks
//! directly (decode/scan/price/seed counters). `candidates_tracked`,
//! `reconnect_count`, and `drops_by_reason` come from the candidate set,
//! transport, and outbound channel respectively -- `Orchestrator::metrics`
//! folds all three in, the same way it already folds in `candidates_evicted`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live, lock-free counters updated from any component.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    blocks_processed: AtomicU64,
    logs_decoded: AtomicU64,
    logs_unrecognised: AtomicU64,
    scans_completed: AtomicU64,
    scans_failed: AtomicU64,
    hf_reads_total: AtomicU64,
    price_triggers_fired: AtomicU64,
    emissions_total: AtomicU64,
    candidates_seeded: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_block(&self) {
        self.blocks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_decoded(&self) {
        self.logs_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_unrecognised(&self) {
        self.logs_unrecognised.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scan(&self, succeeded: bool, hf_reads: u64) {
        if succeeded {
            self.scans_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.scans_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.hf_reads_total.fetch_add(hf_reads, Ordering::Relaxed);
    }

    pub fn record_price_trigger(&self) {
        self.price_triggers_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emission(&self) {
        self.emissions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_candidates_seeded(&self, count: u64) {
        self.candidates_seeded.fetch_add(count, Ordering::Relaxed);
    }

    /// Build the externally-visible snapshot. `candidates_tracked` and
    /// `reconnect_count` come from outside this struct (the candidate set
    /// and the transport respectively); `emission_drops` is the emission
    /// channel's overflow count. The caller -- `Orchestrator::metrics` --
    /// supplies all three, plus `candidates_evicted` afterwards.
    pub fn snapshot(
        &self,
        candidates_tracked: usize,
        reconnect_count: u64,
        emission_drops: u64,
    ) -> MetricsSnapshot {
        let mut drops_by_reason = HashMap::new();
        let unrecognised = self.logs_unrecognised.load(Ordering::Relaxed);
        if unrecognised > 0 {
            drops_by_reason.insert("unrecognised_log".to_string(), unrecognised);
        }
        if emission_drops > 0 {
            drops_by_reason.insert("emission_overflow".to_string(), emission_drops);
        }

        MetricsSnapshot {
            candidates_tracked,
            reconnect_count,
            drops_by_reason,
            scans_run: self.scans_completed.load(Ordering::Relaxed)
                + self.scans_failed.load(Ordering::Relaxed),
            scans_failed: self.scans_failed.load(Ordering::Relaxed),
            emissions_total: self.emissions_total.load(Ordering::Relaxed),
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            logs_decoded: self.logs_decoded.load(Ordering::Relaxed),
            hf_reads_total: self.hf_reads_total.load(Ordering::Relaxed),
            price_triggers_fired: self.price_triggers_fired.load(Ordering::Relaxed),
            candidates_seeded: self.candidates_seeded.load(Ordering::Relaxed),
            candidates_evicted: 0,
        }
    }
}

/// Point-in-time read of engine state, suitable for periodic logging or an
/// external status endpoint. No wire format (Prometheus, statsd) is
/// implemented here -- that exporter is out of scope; this is the plain
/// struct a diagnostic script or log line reads fields off of directly.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub candidates_tracked: usize,
    pub reconnect_count: u64,
    pub drops_by_reason: HashMap<String, u64>,
    pub scans_run: u64,
    pub emissions_total: u64,
    pub scans_failed: u64,
    pub blocks_processed: u64,
    pub logs_decoded: u64,
    pub hf_reads_total: u64,
    pub price_triggers_fired: u64,
    pub candidates_seeded: u64,
    pub candidates_evicted: u64,
}

impl MetricsSnapshot {
    pub fn scan_failure_rate(&self) -> f64 {
        if self.scans_run == 0 {
            0.0
        } else {
            self.scans_failed as f64 / self.scans_run as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = EngineMetrics::new();
        metrics.record_block();
        metrics.record_block();
        metrics.record_scan(true, 50);
        metrics.record_scan(false, 10);

        let snap = metrics.snapshot(3, 0, 0);
        assert_eq!(snap.blocks_processed, 2);
        assert_eq!(snap.scans_run, 2);
        assert_eq!(snap.scans_failed, 1);
        assert_eq!(snap.hf_reads_total, 60);
        assert_eq!(snap.candidates_tracked, 3);
    }

    #[test]
    fn test_scan_failure_rate() {
        let metrics = EngineMetrics::new();
        metrics.record_scan(true, 1);
        metrics.record_scan(true, 1);
        metrics.record_scan(false, 1);
        let snap = metrics.snapshot(0, 0, 0);
        assert!((snap.scan_failure_rate() - (1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_drops_by_reason_folds_unrecognised_and_overflow() {
        let metrics = EngineMetrics::new();
        metrics.record_log_unrecognised();
        metrics.record_log_unrecognised();

        let snap = metrics.snapshot(0, 0, 5);
        assert_eq!(snap.drops_by_reason.get("unrecognised_log"), Some(&2));
        assert_eq!(snap.drops_by_reason.get("emission_overflow"), Some(&5));
    }

    #[test]
    fn test_reconnect_count_passes_through() {
        let metrics = EngineMetrics::new();
        let snap = metrics.snapshot(0, 7, 0);
        assert_eq!(snap.reconnect_count, 7);
    }
}
