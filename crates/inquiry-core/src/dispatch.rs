use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::executor::CallExecutor;
use crate::outcome::CallOutcome;
use crate::run::{RunState, WorkQueue};

/// Everything a strategy needs to drive one run.
pub struct RunContext {
    pub executor: CallExecutor,
    pub queue: WorkQueue,
    pub cancel: CancelToken,
    pub state: RunState,
}

impl RunContext {
    /// True when the token is set and work is still left to issue.
    fn should_stop(&self) -> bool {
        if self.cancel.is_cancelled() && !self.queue.is_exhausted() {
            info!(issued = self.queue.issued(), "cancellation observed, no further calls");
            return true;
        }
        false
    }
}

pub type DispatchFuture<'a> = Pin<Box<dyn Future<Output = DispatchEnd> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEnd {
    /// Every call up to the target was issued and recorded.
    Exhausted,
    /// Cancellation stopped issuing; everything in flight was still recorded.
    Cancelled,
}

/// How calls get issued. Canary ordering and outcome recording live in
/// `RunContext`, so strategies only decide when the next call goes out.
pub trait DispatchStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn dispatch<'a>(&'a self, ctx: &'a mut RunContext) -> DispatchFuture<'a>;
}

/// One call in flight; call i+1 goes out only after call i is recorded.
pub struct Sequential;

impl DispatchStrategy for Sequential {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn dispatch<'a>(&'a self, ctx: &'a mut RunContext) -> DispatchFuture<'a> {
        Box::pin(async move {
            let mut ticker = interval(ctx.state.flush_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if ctx.should_stop() {
                    return DispatchEnd::Cancelled;
                }
                let Some((id, params)) = ctx.queue.next_job() else {
                    return DispatchEnd::Exhausted;
                };

                let call = ctx.executor.execute(id, params, &ctx.cancel);
                tokio::pin!(call);
                let outcome = loop {
                    tokio::select! {
                        biased;
                        outcome = &mut call => break outcome,
                        _ = ticker.tick() => ctx.state.tick(),
                    }
                };
                ctx.state.record(outcome);
            }
        })
    }
}

/// Keeps exactly `concurrency` calls in flight while work remains. A slot
/// frees up only once its outcome has been recorded.
pub struct Parallel {
    concurrency: usize,
}

impl Parallel {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

type Completed = (CallOutcome, OwnedSemaphorePermit);

impl DispatchStrategy for Parallel {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn dispatch<'a>(&'a self, ctx: &'a mut RunContext) -> DispatchFuture<'a> {
        Box::pin(async move {
            let semaphore = Arc::new(Semaphore::new(self.concurrency));
            let (result_tx, mut result_rx) = mpsc::channel::<Completed>(self.concurrency);
            let mut calls = JoinSet::new();
            let mut ticker = interval(ctx.state.flush_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let cancel = ctx.cancel.clone();

            let end = loop {
                if ctx.queue.is_exhausted() {
                    break DispatchEnd::Exhausted;
                }

                // Wait for a free slot, recording whatever finishes meanwhile.
                // A cancel while every slot is busy stops waiting right away.
                let permit = tokio::select! {
                    biased;
                    Some((outcome, permit)) = result_rx.recv() => {
                        ctx.state.record(outcome);
                        drop(permit);
                        continue;
                    }
                    _ = cancel.cancelled() => None,
                    permit = semaphore.clone().acquire_owned() => permit.ok(),
                    _ = ticker.tick() => {
                        ctx.state.tick();
                        continue;
                    }
                };

                if ctx.should_stop() {
                    break DispatchEnd::Cancelled;
                }
                let Some(permit) = permit else {
                    break DispatchEnd::Exhausted;
                };
                let Some((id, params)) = ctx.queue.next_job() else {
                    break DispatchEnd::Exhausted;
                };

                debug!(id, in_flight = self.concurrency - semaphore.available_permits(), "dispatching");
                let executor = ctx.executor.clone();
                let cancel = ctx.cancel.clone();
                let result_tx = result_tx.clone();
                calls.spawn(async move {
                    let outcome = executor.execute(id, params, &cancel).await;
                    // Receiver lives until every sender is gone.
                    let _ = result_tx.send((outcome, permit)).await;
                });
            };

            // Drain: in-flight calls always finish and get recorded.
            drop(result_tx);
            loop {
                tokio::select! {
                    biased;
                    received = result_rx.recv() => match received {
                        Some((outcome, permit)) => {
                            ctx.state.record(outcome);
                            drop(permit);
                        }
                        None => break,
                    },
                    _ = ticker.tick() => ctx.state.tick(),
                }
            }

            while let Some(joined) = calls.join_next().await {
                if let Err(e) = joined {
                    warn!("call task failed: {}", e);
                }
            }

            end
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpdateConfig;
    use crate::params::{CallParams, ParamPlan, ParamStrategy};
    use crate::transport::MockTransport;
    use crate::updates::ChannelObserver;

    fn context(target: u64) -> RunContext {
        context_with_delay(target, 1)
    }

    fn context_with_delay(target: u64, delay_ms: u64) -> RunContext {
        let canary = CallParams::new("1403-05", "0012345678");
        let (observer, _rx) = ChannelObserver::channel();
        RunContext {
            executor: CallExecutor::new(Arc::new(MockTransport::new(delay_ms, "0012345678"))),
            queue: WorkQueue::new(ParamPlan::new(canary, ParamStrategy::Randomized, Some(9)), target),
            cancel: CancelToken::new(),
            state: RunState::new(100, 100, &UpdateConfig::default(), Arc::new(observer)),
        }
    }

    #[tokio::test]
    async fn test_sequential_records_in_issue_order() {
        let mut ctx = context(6);
        assert_eq!(Sequential.dispatch(&mut ctx).await, DispatchEnd::Exhausted);

        let ids: Vec<u64> = ctx.state.recent_outcomes().iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(ctx.state.stats().success_count, 1);
        assert_eq!(ctx.state.stats().error_count, 5);
    }

    #[tokio::test]
    async fn test_parallel_records_every_call() {
        let mut ctx = context(20);
        let strategy = Parallel::new(4);
        assert_eq!(strategy.concurrency(), 4);
        assert_eq!(strategy.dispatch(&mut ctx).await, DispatchEnd::Exhausted);

        let mut ids: Vec<u64> = ctx.state.recent_outcomes().iter().map(|o| o.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=20).collect::<Vec<_>>());
        assert_eq!(ctx.state.stats().total, 20);
    }

    #[tokio::test]
    async fn test_pre_cancelled_dispatches_nothing() {
        for strategy in [&Sequential as &dyn DispatchStrategy, &Parallel::new(3)] {
            let mut ctx = context(5);
            ctx.cancel.cancel();
            assert_eq!(strategy.dispatch(&mut ctx).await, DispatchEnd::Cancelled, "{}", strategy.name());
            assert_eq!(ctx.queue.issued(), 0);
            assert_eq!(ctx.state.stats().total, 0);
        }
    }

    #[tokio::test]
    async fn test_parallel_cancel_while_slots_busy() {
        let mut ctx = context_with_delay(50, 40);
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            cancel.cancel();
        });

        assert_eq!(Parallel::new(3).dispatch(&mut ctx).await, DispatchEnd::Cancelled);
        // Only the first three went out; all of them were still recorded.
        assert_eq!(ctx.queue.issued(), 3);
        assert_eq!(ctx.state.stats().total, 3);
        assert_eq!(ctx.state.recent_outcomes().len(), 3);
    }
}
