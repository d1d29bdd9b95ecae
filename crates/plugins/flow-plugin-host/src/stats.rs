//! Per-plugin call statistics

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default rolling-average window
pub const DEFAULT_STATS_WINDOW: usize = 100;

/// Snapshot of a plugin's call statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginStats {
    /// Total calls made
    pub call_count: u64,
    /// Calls that returned a success envelope
    pub success_count: u64,
    /// Calls that failed (error envelope, timeout, transport)
    pub failure_count: u64,
    /// Rolling average latency over the most recent calls, in milliseconds
    pub avg_latency_ms: f64,
}

/// Mutable counters behind the per-plugin lock
#[derive(Debug)]
pub(crate) struct RollingStats {
    calls: u64,
    successes: u64,
    failures: u64,
    window: VecDeque<u64>,
    window_size: usize,
}

impl RollingStats {
    pub(crate) fn new(window_size: usize) -> Self {
        Self {
            calls: 0,
            successes: 0,
            failures: 0,
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
        }
    }

    /// Record one call. Latency is send-to-receive inclusive and is
    /// recorded for successes and failures alike.
    pub(crate) fn record(&mut self, success: bool, latency_ms: u64) {
        self.calls += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(latency_ms);
    }

    pub(crate) fn snapshot(&self) -> PluginStats {
        let avg = if self.window.is_empty() {
            0.0
        } else {
            self.window.iter().sum::<u64>() as f64 / self.window.len() as f64
        };
        PluginStats {
            call_count: self.calls,
            success_count: self.successes,
            failure_count: self.failures,
            avg_latency_ms: avg,
        }
    }
}

impl Default for RollingStats {
    fn default() -> Self {
        Self::new(DEFAULT_STATS_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_split_by_outcome() {
        let mut stats = RollingStats::default();
        stats.record(true, 10);
        stats.record(false, 30);
        stats.record(true, 20);

        let snap = stats.snapshot();
        assert_eq!(snap.call_count, 3);
        assert_eq!(snap.success_count, 2);
        assert_eq!(snap.failure_count, 1);
        assert!((snap.avg_latency_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_rolling_window_evicts_oldest() {
        let mut stats = RollingStats::new(2);
        stats.record(true, 100);
        stats.record(true, 10);
        stats.record(true, 20);

        // 100 fell out of the window; counters keep the full history
        let snap = stats.snapshot();
        assert_eq!(snap.call_count, 3);
        assert!((snap.avg_latency_ms - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stats() {
        let stats = RollingStats::default();
        let snap = stats.snapshot();
        assert_eq!(snap.call_count, 0);
        assert_eq!(snap.avg_latency_ms, 0.0);
    }
}
