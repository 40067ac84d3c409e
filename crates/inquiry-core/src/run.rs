use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{RunMode, UpdateConfig};
use crate::outcome::CallOutcome;
use crate::params::{CallParams, ParamPlan};
use crate::series::{OutcomeLog, TimeSeriesBuffer, TimeSeriesPoint};
use crate::stats::{RunningStats, StatsAccumulator};
use crate::updates::{RunObserver, UpdateBatcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Lifecycle record of one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRun {
    pub mode: RunMode,
    pub target_count: u64,
    /// Only meaningful in parallel mode
    pub concurrency: Option<usize>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
}

/// Final summary returned when a run's task completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: BatchRun,
    pub phase: RunPhase,
    pub stats: RunningStats,
    pub series: Vec<TimeSeriesPoint>,
    pub recent_outcomes: Vec<CallOutcome>,
    /// Calls that were handed an id, cancelled ones included
    pub issued: u64,
    pub total_duration_ms: u64,
}

/// Hands out (id, params) pairs in issue order until the target is reached.
#[derive(Debug)]
pub struct WorkQueue {
    plan: ParamPlan,
    issued: u64,
    target: u64,
}

impl WorkQueue {
    pub fn new(plan: ParamPlan, target: u64) -> Self {
        Self {
            plan,
            issued: 0,
            target,
        }
    }

    pub fn next_job(&mut self) -> Option<(u64, CallParams)> {
        if self.is_exhausted() {
            return None;
        }
        self.issued += 1;
        let id = self.issued;
        Some((id, self.plan.params_for(id)))
    }

    pub fn is_exhausted(&self) -> bool {
        self.issued >= self.target
    }

    pub fn issued(&self) -> u64 {
        self.issued
    }
}

/// Aggregates owned by a single run. Every outcome goes through `record`,
/// which feeds the accumulator, the series and the batcher in that order.
pub struct RunState {
    stats: StatsAccumulator,
    series: TimeSeriesBuffer,
    log: OutcomeLog,
    batcher: UpdateBatcher,
    last_stats: RunningStats,
}

impl RunState {
    pub fn new(
        series_capacity: usize,
        log_capacity: usize,
        updates: &UpdateConfig,
        observer: Arc<dyn RunObserver>,
    ) -> Self {
        Self {
            stats: StatsAccumulator::new(),
            series: TimeSeriesBuffer::new(series_capacity),
            log: OutcomeLog::new(log_capacity),
            batcher: UpdateBatcher::new(observer, updates),
            last_stats: RunningStats::default(),
        }
    }

    pub fn record(&mut self, outcome: CallOutcome) {
        self.last_stats = self.stats.record(&outcome);
        self.series.append(&outcome);
        self.log.push(outcome.clone());
        self.batcher.notify(&self.last_stats, &self.series, outcome);
    }

    pub fn tick(&mut self) {
        self.batcher.tick(&self.last_stats, &self.series);
    }

    pub fn finish(&mut self) {
        self.batcher.finish(&self.last_stats, &self.series);
    }

    pub fn flush_interval(&self) -> std::time::Duration {
        self.batcher.interval()
    }

    pub fn stats(&self) -> &RunningStats {
        &self.last_stats
    }

    pub fn series(&self) -> &TimeSeriesBuffer {
        &self.series
    }

    pub fn recent_outcomes(&self) -> Vec<CallOutcome> {
        self.log.to_vec()
    }
}
