//! Run metrics collection and reporting.
//!
//! Uses HDR histograms for per-signal wall time and likelihood cost.

use crate::config::MetricsConfig;
use crate::error::ConfigError;
use crate::utils::format_duration;
use hdrhistogram::Histogram;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Metrics for one batch run
#[derive(Debug)]
pub struct RunMetrics {
    /// Per-signal wall time histogram (milliseconds)
    signal_time_ms: Histogram<u64>,

    /// Likelihood evaluations per signal
    likelihood_evals: Histogram<u64>,

    /// Signals attempted
    attempted: AtomicU64,

    /// Signals that produced a result
    succeeded: AtomicU64,

    /// Signals that failed
    failed: AtomicU64,

    started: Instant,
}

/// Summary of key metrics for logging
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub signal_p50_ms: f64,
    pub signal_p95_ms: f64,
    pub signal_p99_ms: f64,

    /// Mean likelihood evaluations per successful signal
    pub mean_evaluations: f64,

    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,

    /// Success rate (0.0-1.0)
    pub success_rate: f64,

    pub elapsed_secs: f64,
}

impl RunMetrics {
    pub fn new(config: &MetricsConfig) -> Result<Self, ConfigError> {
        let invalid = |e: hdrhistogram::CreationError| ConfigError::ValidationFailed {
            reason: format!("invalid metrics histogram settings: {e:?}"),
        };
        let signal_time_ms = Histogram::new_with_bounds(1, config.histogram_max_ms.max(2), config.histogram_precision)
            .map_err(invalid)?;
        let likelihood_evals =
            Histogram::new_with_bounds(1, 1_000_000_000, config.histogram_precision).map_err(invalid)?;

        Ok(Self {
            signal_time_ms,
            likelihood_evals,
            attempted: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started: Instant::now(),
        })
    }

    /// Record one processed signal
    pub fn record_signal(&mut self, duration: Duration, evaluations: u64, success: bool) {
        let ms = (duration.as_millis() as u64).max(1);
        if let Err(e) = self.signal_time_ms.record(ms) {
            tracing::warn!("Failed to record signal time: {}", e);
        }

        self.attempted.fetch_add(1, Ordering::Relaxed);
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
            if evaluations > 0 {
                if let Err(e) = self.likelihood_evals.record(evaluations) {
                    tracing::warn!("Failed to record likelihood evaluations: {}", e);
                }
            }
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let attempted = self.attempted.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let success_rate = if attempted > 0 {
            succeeded as f64 / attempted as f64
        } else {
            0.0
        };

        MetricsSummary {
            signal_p50_ms: self.signal_time_ms.value_at_quantile(0.5) as f64,
            signal_p95_ms: self.signal_time_ms.value_at_quantile(0.95) as f64,
            signal_p99_ms: self.signal_time_ms.value_at_quantile(0.99) as f64,
            mean_evaluations: self.likelihood_evals.mean(),
            attempted,
            succeeded,
            failed: self.failed.load(Ordering::Relaxed),
            success_rate,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

impl MetricsSummary {
    /// Emit the summary as one structured log line
    pub fn log(&self) {
        tracing::info!(
            attempted = self.attempted,
            succeeded = self.succeeded,
            failed = self.failed,
            success_rate = %format!("{:.1}%", self.success_rate * 100.0),
            p50_ms = self.signal_p50_ms,
            p95_ms = self.signal_p95_ms,
            p99_ms = self.signal_p99_ms,
            mean_evaluations = self.mean_evaluations,
            elapsed = %format_duration(self.elapsed_secs),
            "Run metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_recording() {
        let mut metrics = RunMetrics::new(&MetricsConfig::default()).unwrap();

        metrics.record_signal(Duration::from_millis(1500), 40_000, true);
        metrics.record_signal(Duration::from_millis(2000), 60_000, true);
        metrics.record_signal(Duration::from_millis(10), 0, false);

        let summary = metrics.summary();
        assert_eq!(summary.attempted, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert!((summary.success_rate - 2.0 / 3.0).abs() < 0.01);
        assert!((summary.mean_evaluations - 50_000.0).abs() / 50_000.0 < 0.02);
        assert!(summary.signal_p99_ms >= 1900.0);
    }

    #[test]
    fn test_empty_summary() {
        let metrics = RunMetrics::new(&MetricsConfig::default()).unwrap();
        let summary = metrics.summary();
        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.success_rate, 0.0);
    }

    #[test]
    fn test_invalid_precision_rejected() {
        let config = MetricsConfig {
            histogram_precision: 9,
            ..MetricsConfig::default()
        };
        assert!(RunMetrics::new(&config).is_err());
    }
}
