use serde::{Deserialize, Serialize};

use crate::outcome::{CallOutcome, OutcomeStatus};

/// Width of one latency histogram bucket.
pub const BUCKET_WIDTH_MS: u64 = 10;
/// Buckets cover 0..10s; slower calls land in the last one.
const BUCKET_COUNT: usize = 1_000;

/// Snapshot handed to observers and reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub total: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub average_duration_ms: f64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
    pub latency_p99_ms: u64,
}

/// Running statistics, updated once per arriving outcome without
/// recomputing over history.
pub struct StatsAccumulator {
    stats: RunningStats,
    latency_buckets: Vec<u64>,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self {
            stats: RunningStats::default(),
            latency_buckets: vec![0; BUCKET_COUNT],
        }
    }

    /// Fold one outcome in and return the updated snapshot. Cancelled
    /// outcomes leave everything untouched.
    pub fn record(&mut self, outcome: &CallOutcome) -> RunningStats {
        match outcome.status {
            OutcomeStatus::Cancelled => return self.snapshot(),
            OutcomeStatus::Success => self.stats.success_count += 1,
            OutcomeStatus::Error => self.stats.error_count += 1,
        }
        self.stats.total += 1;

        let duration = outcome.duration_ms;
        let delta = duration as f64 - self.stats.average_duration_ms;
        self.stats.average_duration_ms += delta / self.stats.total as f64;

        if self.stats.total == 1 {
            self.stats.min_duration_ms = duration;
            self.stats.max_duration_ms = duration;
        } else {
            self.stats.min_duration_ms = self.stats.min_duration_ms.min(duration);
            self.stats.max_duration_ms = self.stats.max_duration_ms.max(duration);
        }

        let bucket_idx = ((duration / BUCKET_WIDTH_MS) as usize).min(BUCKET_COUNT - 1);
        self.latency_buckets[bucket_idx] += 1;

        self.snapshot()
    }

    pub fn reset(&mut self) {
        self.stats = RunningStats::default();
        self.latency_buckets.iter_mut().for_each(|b| *b = 0);
    }

    /// Upper edge of the bucket holding the p-th percentile (integer ms).
    pub fn percentile(&self, p: u64) -> u64 {
        let total = self.stats.total;
        if total == 0 {
            return 0;
        }

        let target = ((total * p) / 100).max(1);
        let mut cumulative = 0u64;

        for (bucket_idx, &count) in self.latency_buckets.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                if bucket_idx == BUCKET_COUNT - 1 {
                    break;
                }
                let upper = (bucket_idx as u64 + 1) * BUCKET_WIDTH_MS;
                return upper.min(self.stats.max_duration_ms);
            }
        }

        self.stats.max_duration_ms
    }

    pub fn snapshot(&self) -> RunningStats {
        RunningStats {
            latency_p50_ms: self.percentile(50),
            latency_p95_ms: self.percentile(95),
            latency_p99_ms: self.percentile(99),
            ..self.stats.clone()
        }
    }
}

impl Default for StatsAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
