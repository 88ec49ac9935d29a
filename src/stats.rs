//! Running I/O statistics of a client session.

use std::time::Duration;

/// Counters and latency figures for every exchange a client has attempted.
///
/// Latency figures only include exchanges which completed, so a failing line does not skew
/// them. Average uses the running form `avg = (avg * (n - 1) + dt) / n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IoStats {
    /// Exchanges attempted, retries included.
    pub count: u64,
    /// Exchanges which failed.
    pub error_count: u64,
    /// Completed exchanges, the `n` of the average.
    pub samples: u64,
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
}

impl Default for IoStats {
    fn default() -> Self {
        IoStats {
            count: 0,
            error_count: 0,
            samples: 0,
            min: Duration::MAX,
            max: Duration::ZERO,
            avg: Duration::ZERO,
        }
    }
}

impl IoStats {
    /// Record a completed exchange which took `dt`.
    pub fn record(&mut self, dt: Duration) {
        self.count += 1;
        self.samples += 1;
        self.min = self.min.min(dt);
        self.max = self.max.max(dt);
        let n = self.samples as f64;
        let avg = (self.avg.as_secs_f64() * (n - 1.0) + dt.as_secs_f64()) / n;
        self.avg = Duration::from_secs_f64(avg);
    }

    /// Record a failed exchange. Latency figures are left as they were.
    pub fn record_error(&mut self) {
        self.count += 1;
        self.error_count += 1;
    }
}
