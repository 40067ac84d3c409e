use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::outcome::CallOutcome;

pub const DEFAULT_SERIES_CAPACITY: usize = 100;
pub const DEFAULT_LOG_CAPACITY: usize = 1_000;

/// FIFO with a fixed capacity; the oldest entries fall off the front.
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> SlidingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Record order, independent of the call id
    pub sequence_index: u64,
    pub duration_ms: u64,
    pub is_success: bool,
}

/// Latency series for graphing. Points are numbered in the order they are
/// appended, which in parallel mode is completion order.
#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer {
    window: SlidingWindow<TimeSeriesPoint>,
    next_index: u64,
}

impl TimeSeriesBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: SlidingWindow::new(capacity),
            next_index: 0,
        }
    }

    pub fn append(&mut self, outcome: &CallOutcome) {
        if outcome.is_cancelled() {
            return;
        }
        self.next_index += 1;
        self.window.push(TimeSeriesPoint {
            sequence_index: self.next_index,
            duration_ms: outcome.duration_ms,
            is_success: outcome.is_success(),
        });
    }

    pub fn snapshot(&self) -> Vec<TimeSeriesPoint> {
        self.window.to_vec()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.window.capacity()
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.next_index = 0;
    }
}

/// Most recent outcomes of a run, cancelled ones included.
pub type OutcomeLog = SlidingWindow<CallOutcome>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{OutcomeStatus, Payload};
    use crate::params::CallParams;
    use chrono::Utc;

    fn outcome(id: u64, status: OutcomeStatus, duration_ms: u64) -> CallOutcome {
        CallOutcome {
            id,
            params: CallParams::new("1403-05", "123456789"),
            status,
            status_code: 0,
            duration_ms,
            payload: Payload::None,
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn test_capacity_three_keeps_last_three() {
        let mut buffer = TimeSeriesBuffer::new(3);
        for i in 1..=5 {
            buffer.append(&outcome(i, OutcomeStatus::Success, i * 10));
            assert!(buffer.len() <= 3);
        }

        let indices: Vec<u64> = buffer.snapshot().iter().map(|p| p.sequence_index).collect();
        assert_eq!(indices, vec![3, 4, 5]);
        let durations: Vec<u64> = buffer.snapshot().iter().map(|p| p.duration_ms).collect();
        assert_eq!(durations, vec![30, 40, 50]);
    }

    #[test]
    fn test_sequence_index_ignores_call_id() {
        let mut buffer = TimeSeriesBuffer::new(10);
        buffer.append(&outcome(7, OutcomeStatus::Success, 1));
        buffer.append(&outcome(2, OutcomeStatus::Error, 2));

        let points = buffer.snapshot();
        assert_eq!(points[0].sequence_index, 1);
        assert!(points[0].is_success);
        assert_eq!(points[1].sequence_index, 2);
        assert!(!points[1].is_success);
    }

    #[test]
    fn test_cancelled_outcomes_are_skipped() {
        let mut buffer = TimeSeriesBuffer::new(10);
        buffer.append(&outcome(1, OutcomeStatus::Cancelled, 0));
        assert!(buffer.is_empty());
        buffer.append(&outcome(2, OutcomeStatus::Error, 5));
        assert_eq!(buffer.snapshot()[0].sequence_index, 1);
    }

    #[test]
    fn test_reset_restarts_numbering() {
        let mut buffer = TimeSeriesBuffer::new(2);
        for i in 1..=4 {
            buffer.append(&outcome(i, OutcomeStatus::Success, 1));
        }
        buffer.reset();
        assert!(buffer.is_empty());
        buffer.append(&outcome(9, OutcomeStatus::Success, 1));
        assert_eq!(buffer.snapshot()[0].sequence_index, 1);
    }

    #[test]
    fn test_window_after_capacity_plus_k() {
        let capacity = 4;
        let mut window = SlidingWindow::new(capacity);
        for i in 0..(capacity + 6) {
            window.push(i);
        }
        assert_eq!(window.to_vec(), vec![6, 7, 8, 9]);
        assert_eq!(SlidingWindow::<u8>::new(0).capacity(), 1);
    }
}
