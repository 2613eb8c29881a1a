//! Metrics & Monitoring
//!
//! Rolling-window latency tracking for command handling and match
//! acquisition, with SLA flags against fixed thresholds. Purely
//! observational: nothing here blocks or alters control flow.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

/// Samples kept per rolling window.
const WINDOW_SIZE: usize = 100;

/// Rolling latency window.
struct Window {
    samples: RwLock<VecDeque<u64>>,
    total_recorded: AtomicU64,
}

impl Window {
    fn new() -> Self {
        Self {
            samples: RwLock::new(VecDeque::with_capacity(WINDOW_SIZE)),
            total_recorded: AtomicU64::new(0),
        }
    }

    fn record(&self, latency_ms: u64) {
        self.total_recorded.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut samples) = self.samples.write() {
            samples.push_back(latency_ms);
            while samples.len() > WINDOW_SIZE {
                samples.pop_front();
            }
        }
    }

    fn snapshot(&self) -> Vec<u64> {
        self.samples
            .read()
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    fn average_ms(&self) -> f64 {
        let samples = self.snapshot();
        if samples.is_empty() {
            return 0.0;
        }
        samples.iter().sum::<u64>() as f64 / samples.len() as f64
    }
}

/// Aggregate stats over the current windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub command_samples: usize,
    pub avg_command_ms: f64,
    pub command_sla_exceeded: bool,
    pub match_samples: usize,
    pub avg_match_ms: f64,
    pub match_sla_exceeded: bool,
}

/// Detailed report: averages plus match success rate, where success means
/// the match was acquired within the matching SLA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub snapshot: MetricsSnapshot,
    pub total_commands: u64,
    pub total_matches: u64,
    pub match_success_rate: f64,
}

/// Latency collector for the call engine.
pub struct CallMetrics {
    commands: Window,
    matches: Window,
    command_sla_ms: u64,
    matching_sla_ms: u64,
}

impl CallMetrics {
    pub fn new(command_sla: Duration, matching_sla: Duration) -> Self {
        Self {
            commands: Window::new(),
            matches: Window::new(),
            command_sla_ms: command_sla.as_millis() as u64,
            matching_sla_ms: matching_sla.as_millis() as u64,
        }
    }

    /// Record one command-handling latency sample.
    pub fn record_command(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        self.commands.record(ms);
        if ms > self.command_sla_ms {
            debug!("Command latency {}ms exceeded SLA ({}ms)", ms, self.command_sla_ms);
        }
    }

    /// Record one match-acquisition latency sample.
    pub fn record_match(&self, latency: Duration) {
        let ms = latency.as_millis() as u64;
        self.matches.record(ms);
        if ms > self.matching_sla_ms {
            debug!("Match latency {}ms exceeded SLA ({}ms)", ms, self.matching_sla_ms);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let command_samples = self.commands.snapshot();
        let match_samples = self.matches.snapshot();
        let avg_command_ms = self.commands.average_ms();
        let avg_match_ms = self.matches.average_ms();

        MetricsSnapshot {
            command_samples: command_samples.len(),
            avg_command_ms,
            command_sla_exceeded: avg_command_ms > self.command_sla_ms as f64,
            match_samples: match_samples.len(),
            avg_match_ms,
            match_sla_exceeded: avg_match_ms > self.matching_sla_ms as f64,
        }
    }

    pub fn detailed_report(&self) -> MetricsReport {
        let match_samples = self.matches.snapshot();
        let within_sla = match_samples
            .iter()
            .filter(|&&ms| ms <= self.matching_sla_ms)
            .count();

        let match_success_rate = if match_samples.is_empty() {
            100.0
        } else {
            within_sla as f64 / match_samples.len() as f64 * 100.0
        };

        MetricsReport {
            snapshot: self.snapshot(),
            total_commands: self.commands.total_recorded.load(Ordering::Relaxed),
            total_matches: self.matches.total_recorded.load(Ordering::Relaxed),
            match_success_rate,
        }
    }
}

impl Default for CallMetrics {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(10_000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_window_cap() {
        let metrics = CallMetrics::default();
        for i in 0..150 {
            metrics.record_command(Duration::from_millis(i));
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.command_samples, 100);
        // Window holds the most recent samples (50..150), average reflects that.
        assert!(snapshot.avg_command_ms > 49.0);

        let report = metrics.detailed_report();
        assert_eq!(report.total_commands, 150);
    }

    #[test]
    fn test_sla_flags() {
        let metrics = CallMetrics::new(Duration::from_millis(100), Duration::from_millis(200));

        metrics.record_command(Duration::from_millis(50));
        assert!(!metrics.snapshot().command_sla_exceeded);

        metrics.record_command(Duration::from_millis(500));
        metrics.record_command(Duration::from_millis(500));
        assert!(metrics.snapshot().command_sla_exceeded);

        metrics.record_match(Duration::from_millis(300));
        assert!(metrics.snapshot().match_sla_exceeded);
    }

    #[test]
    fn test_match_success_rate() {
        let metrics = CallMetrics::new(Duration::from_millis(1000), Duration::from_millis(200));

        metrics.record_match(Duration::from_millis(100));
        metrics.record_match(Duration::from_millis(150));
        metrics.record_match(Duration::from_millis(900));
        metrics.record_match(Duration::from_millis(50));

        let report = metrics.detailed_report();
        assert_eq!(report.total_matches, 4);
        assert_eq!(report.match_success_rate, 75.0);
    }

    #[test]
    fn test_empty_metrics() {
        let metrics = CallMetrics::default();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.command_samples, 0);
        assert_eq!(snapshot.avg_command_ms, 0.0);
        assert!(!snapshot.command_sla_exceeded);

        let report = metrics.detailed_report();
        assert_eq!(report.match_success_rate, 100.0);
    }
}
