use hdrhistogram::Histogram;
use serde::Serialize;
use std::time::Duration;

use crate::harness::WorkerResult;

/// Session-open latency collector
pub struct OpenLatencyStats {
    // Microsecond precision, 1us to 10min
    latency_hist: Histogram<u64>,
    connected: u64,
    failed: u64,
    warnings: u64,
}

impl Default for OpenLatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenLatencyStats {
    pub fn new() -> Self {
        Self {
            latency_hist: Histogram::new_with_bounds(1, 600_000_000, 3)
                .expect("static histogram bounds are valid"),
            connected: 0,
            failed: 0,
            warnings: 0,
        }
    }

    pub fn from_results(results: &[WorkerResult]) -> Self {
        let mut stats = Self::new();
        for r in results {
            stats.record(r);
        }
        stats
    }

    /// Record one worker outcome; only successful opens enter the histogram
    pub fn record(&mut self, result: &WorkerResult) {
        if result.close_error.is_some() {
            self.warnings += 1;
        }
        if !result.connected() {
            self.failed += 1;
            return;
        }
        self.connected += 1;
        let micros = duration_micros(result.elapsed_open).max(1);
        // saturating_record clamps values above the upper bound
        self.latency_hist.saturating_record(micros);
    }

    pub fn summary(&self) -> LatencySummary {
        let h = &self.latency_hist;
        let empty = h.is_empty();
        let at = |q: f64| if empty { Duration::ZERO } else { Duration::from_micros(h.value_at_quantile(q)) };
        LatencySummary {
            connected: self.connected,
            failed: self.failed,
            warnings: self.warnings,
            min: if empty { Duration::ZERO } else { Duration::from_micros(h.min()) },
            p50: at(0.5),
            p95: at(0.95),
            p99: at(0.99),
            max: if empty { Duration::ZERO } else { Duration::from_micros(h.max()) },
            mean: if empty { Duration::ZERO } else { Duration::from_secs_f64(h.mean() / 1_000_000.0) },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub connected: u64,
    pub failed: u64,
    pub warnings: u64,
    #[serde(serialize_with = "as_micros")]
    pub min: Duration,
    #[serde(serialize_with = "as_micros")]
    pub p50: Duration,
    #[serde(serialize_with = "as_micros")]
    pub p95: Duration,
    #[serde(serialize_with = "as_micros")]
    pub p99: Duration,
    #[serde(serialize_with = "as_micros")]
    pub max: Duration,
    #[serde(serialize_with = "as_micros")]
    pub mean: Duration,
}

/// Whole microseconds, saturating at `u64::MAX`.
pub fn duration_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

fn as_micros<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(duration_micros(*d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverError;

    fn ok(index: usize, ms: u64) -> WorkerResult {
        WorkerResult {
            index,
            elapsed_open: Duration::from_millis(ms),
            value: Some("4.0".into()),
            rows: 1,
            open_error: None,
            close_error: None,
        }
    }

    #[test]
    fn percentiles_over_successful_opens() {
        let mut results: Vec<_> = (1..=100).map(|i| ok(i as usize - 1, i)).collect();
        results.push(WorkerResult {
            open_error: Some(DriverError::Connect("refused".into())),
            ..ok(100, 9_999)
        });
        results[0].close_error = Some(DriverError::Close("reset".into()));

        let s = OpenLatencyStats::from_results(&results).summary();
        assert_eq!(s.connected, 100);
        assert_eq!(s.failed, 1);
        assert_eq!(s.warnings, 1);
        assert_eq!(s.min, Duration::from_millis(1));
        // 3 significant digits
        assert!(s.max >= Duration::from_millis(100) && s.max < Duration::from_millis(101));
        assert!(s.p50 >= Duration::from_millis(50) && s.p50 < Duration::from_millis(51));
    }

    #[test]
    fn micros_saturate() {
        assert_eq!(duration_micros(Duration::from_millis(3)), 3_000);
        assert_eq!(duration_micros(Duration::MAX), u64::MAX);
    }

    #[test]
    fn empty_summary_is_zero() {
        let s = OpenLatencyStats::new().summary();
        assert_eq!(s.connected, 0);
        assert_eq!(s.p99, Duration::ZERO);
        assert_eq!(s.mean, Duration::ZERO);
    }
}
