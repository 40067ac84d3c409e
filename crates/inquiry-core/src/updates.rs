use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::UpdateConfig;
use crate::error::SchedulerError;
use crate::outcome::CallOutcome;
use crate::series::{TimeSeriesBuffer, TimeSeriesPoint};
use crate::stats::RunningStats;

/// One coalesced delivery to the observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushUpdate {
    pub stats: RunningStats,
    pub series: Vec<TimeSeriesPoint>,
    /// Outcomes recorded since the previous flush, in record order
    pub outcomes: Vec<CallOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFinished {
    pub completed: bool,
    pub cancelled: bool,
    pub total_duration_ms: u64,
}

/// Consumer of run progress, typically a UI. Callbacks run on the
/// scheduler's task and should return quickly.
pub trait RunObserver: Send + Sync {
    fn on_flush(&self, update: FlushUpdate);

    fn on_finished(&self, finished: RunFinished);

    fn on_start_failed(&self, _error: &SchedulerError) {}
}

#[derive(Debug, Clone)]
pub enum ObserverEvent {
    Flush(FlushUpdate),
    Finished(RunFinished),
    StartFailed(SchedulerError),
}

/// Forwards every callback into an unbounded channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ObserverEvent>,
}

impl ChannelObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ObserverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RunObserver for ChannelObserver {
    fn on_flush(&self, update: FlushUpdate) {
        // Receiver gone means nobody is watching; the run carries on.
        let _ = self.tx.send(ObserverEvent::Flush(update));
    }

    fn on_finished(&self, finished: RunFinished) {
        let _ = self.tx.send(ObserverEvent::Finished(finished));
    }

    fn on_start_failed(&self, error: &SchedulerError) {
        let _ = self.tx.send(ObserverEvent::StartFailed(error.clone()));
    }
}

/// Coalesces per-outcome notifications into periodic flushes. Flushes as
/// soon as `flush_threshold` outcomes are pending, or on the next timer
/// tick, whichever comes first.
pub struct UpdateBatcher {
    observer: Arc<dyn RunObserver>,
    threshold: usize,
    interval: Duration,
    pending: Vec<CallOutcome>,
    flushes: u64,
}

impl UpdateBatcher {
    pub fn new(observer: Arc<dyn RunObserver>, config: &UpdateConfig) -> Self {
        let threshold = config.flush_threshold.max(1);
        Self {
            observer,
            threshold,
            interval: Duration::from_millis(config.flush_interval_ms.max(1)),
            pending: Vec::with_capacity(threshold),
            flushes: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Returns true when this notification triggered a flush.
    pub fn notify(&mut self, stats: &RunningStats, series: &TimeSeriesBuffer, outcome: CallOutcome) -> bool {
        self.pending.push(outcome);
        if self.pending.len() >= self.threshold {
            self.flush(stats, series);
            true
        } else {
            false
        }
    }

    /// Timer tick: deliver whatever is pending.
    pub fn tick(&mut self, stats: &RunningStats, series: &TimeSeriesBuffer) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        self.flush(stats, series);
        true
    }

    /// Terminal flush. Always delivers, so the observer sees final stats
    /// even for runs that recorded nothing.
    pub fn finish(&mut self, stats: &RunningStats, series: &TimeSeriesBuffer) {
        self.flush(stats, series);
    }

    fn flush(&mut self, stats: &RunningStats, series: &TimeSeriesBuffer) {
        let outcomes = std::mem::replace(&mut self.pending, Vec::with_capacity(self.threshold));
        self.flushes += 1;
        self.observer.on_flush(FlushUpdate {
            stats: stats.clone(),
            series: series.snapshot(),
            outcomes,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{OutcomeStatus, Payload};
    use crate::params::CallParams;
    use chrono::Utc;

    fn outcome(id: u64) -> CallOutcome {
        CallOutcome {
            id,
            params: CallParams::new("1403-05", "123456789"),
            status: OutcomeStatus::Error,
            status_code: 404,
            duration_ms: 5,
            payload: Payload::None,
            issued_at: Utc::now(),
        }
    }

    fn batcher(threshold: usize) -> (UpdateBatcher, mpsc::UnboundedReceiver<ObserverEvent>) {
        let (observer, rx) = ChannelObserver::channel();
        let config = UpdateConfig {
            flush_threshold: threshold,
            flush_interval_ms: 500,
        };
        (UpdateBatcher::new(Arc::new(observer), &config), rx)
    }

    fn drain_flushes(rx: &mut mpsc::UnboundedReceiver<ObserverEvent>) -> Vec<FlushUpdate> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ObserverEvent::Flush(update) = event {
                out.push(update);
            }
        }
        out
    }

    #[test]
    fn test_threshold_triggers_flush() {
        let (mut batcher, mut rx) = batcher(3);
        let stats = RunningStats::default();
        let series = TimeSeriesBuffer::new(10);

        assert!(!batcher.notify(&stats, &series, outcome(1)));
        assert!(!batcher.notify(&stats, &series, outcome(2)));
        assert!(drain_flushes(&mut rx).is_empty());

        assert!(batcher.notify(&stats, &series, outcome(3)));
        let flushes = drain_flushes(&mut rx);
        assert_eq!(flushes.len(), 1);
        let ids: Vec<u64> = flushes[0].outcomes.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(batcher.pending(), 0);
    }

    #[test]
    fn test_tick_flushes_only_when_pending() {
        let (mut batcher, mut rx) = batcher(10);
        let stats = RunningStats::default();
        let series = TimeSeriesBuffer::new(10);

        assert!(!batcher.tick(&stats, &series));
        batcher.notify(&stats, &series, outcome(1));
        assert!(batcher.tick(&stats, &series));
        assert_eq!(drain_flushes(&mut rx)[0].outcomes.len(), 1);
        assert_eq!(batcher.flushes(), 1);
    }

    #[test]
    fn test_finish_always_flushes_everything() {
        let (mut batcher, mut rx) = batcher(10);
        let stats = RunningStats::default();
        let series = TimeSeriesBuffer::new(10);

        batcher.notify(&stats, &series, outcome(1));
        batcher.notify(&stats, &series, outcome(2));
        batcher.finish(&stats, &series);
        batcher.finish(&stats, &series);

        let flushes = drain_flushes(&mut rx);
        assert_eq!(flushes.len(), 2);
        assert_eq!(flushes[0].outcomes.len(), 2);
        assert!(flushes[1].outcomes.is_empty());
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (mut batcher, rx) = batcher(1);
        drop(rx);
        let stats = RunningStats::default();
        let series = TimeSeriesBuffer::new(10);
        assert!(batcher.notify(&stats, &series, outcome(1)));
    }
}
