use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::config::{Config, RunMode, UpdateConfig};
use crate::dispatch::{DispatchEnd, DispatchStrategy, Parallel, RunContext, Sequential};
use crate::error::SchedulerError;
use crate::executor::CallExecutor;
use crate::params::{CallParams, ParamPlan, ParamStrategy};
use crate::run::{BatchRun, RunPhase, RunReport, RunState, WorkQueue};
use crate::series::{DEFAULT_LOG_CAPACITY, DEFAULT_SERIES_CAPACITY};
use crate::updates::{RunFinished, RunObserver};

/// Upper bound on parallel pool size.
pub const MAX_CONCURRENCY: usize = 50;

/// Supplies the known-good parameters for call #1, once per run.
pub trait CanarySource: Send + Sync {
    fn canary_params(&self) -> Option<CallParams>;
}

impl CanarySource for Option<CallParams> {
    fn canary_params(&self) -> Option<CallParams> {
        self.clone()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub series_capacity: usize,
    pub log_capacity: usize,
    pub updates: UpdateConfig,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            series_capacity: DEFAULT_SERIES_CAPACITY,
            log_capacity: DEFAULT_LOG_CAPACITY,
            updates: UpdateConfig::default(),
        }
    }
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            series_capacity: config.series.capacity,
            log_capacity: config.log.capacity,
            updates: config.updates.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub target_count: u64,
    pub mode: RunMode,
    /// Ignored in sequential mode
    pub concurrency: usize,
    pub params: ParamStrategy,
    pub seed: Option<u64>,
}

impl RunRequest {
    pub fn sequential(target_count: u64) -> Self {
        Self {
            target_count,
            mode: RunMode::Sequential,
            concurrency: 1,
            params: ParamStrategy::Randomized,
            seed: None,
        }
    }

    pub fn parallel(target_count: u64, concurrency: usize) -> Self {
        Self {
            target_count,
            mode: RunMode::Parallel,
            concurrency,
            params: ParamStrategy::Randomized,
            seed: None,
        }
    }

    fn strategy(&self) -> Box<dyn DispatchStrategy> {
        match self.mode {
            RunMode::Sequential => Box::new(Sequential),
            RunMode::Parallel => Box::new(Parallel::new(self.concurrency)),
        }
    }
}

impl From<&Config> for RunRequest {
    fn from(config: &Config) -> Self {
        Self {
            target_count: config.batch.count,
            mode: config.batch.mode,
            concurrency: config.batch.concurrency,
            params: config.batch.params,
            seed: config.batch.seed,
        }
    }
}

struct Shared {
    phase: RunPhase,
    active: Option<CancelToken>,
}

/// Runs batches of lookup calls, one at a time. All per-run state lives in
/// the spawned run task, so independent schedulers never share anything.
pub struct BatchScheduler {
    executor: CallExecutor,
    canary: Arc<dyn CanarySource>,
    settings: SchedulerSettings,
    shared: Arc<Mutex<Shared>>,
}

impl BatchScheduler {
    pub fn new(executor: CallExecutor, canary: Arc<dyn CanarySource>, settings: SchedulerSettings) -> Self {
        Self {
            executor,
            canary,
            settings,
            shared: Arc::new(Mutex::new(Shared {
                phase: RunPhase::Idle,
                active: None,
            })),
        }
    }

    pub fn phase(&self) -> RunPhase {
        lock(&self.shared).phase
    }

    /// Stop the active run after its in-flight calls. No-op when idle.
    pub fn cancel(&self) {
        if let Some(token) = lock(&self.shared).active.as_ref() {
            token.cancel();
        }
    }

    /// Start a run in the background. Fails without side effects when a run
    /// is already active or the canary is missing or malformed; the observer
    /// hears about those failures too.
    pub fn start(&self, request: RunRequest, observer: Arc<dyn RunObserver>) -> Result<RunHandle, SchedulerError> {
        match self.prepare(&request) {
            Ok((canary, cancel)) => Ok(self.launch(request, canary, cancel, observer)),
            Err(e) => {
                warn!("run not started: {}", e);
                observer.on_start_failed(&e);
                Err(e)
            }
        }
    }

    fn prepare(&self, request: &RunRequest) -> Result<(CallParams, CancelToken), SchedulerError> {
        if request.mode == RunMode::Parallel && !(1..=MAX_CONCURRENCY).contains(&request.concurrency) {
            return Err(SchedulerError::InvalidConcurrency {
                requested: request.concurrency,
                max: MAX_CONCURRENCY,
            });
        }

        let canary = self.canary.canary_params().ok_or(SchedulerError::MissingCanary)?;
        canary.validate()?;

        let mut shared = lock(&self.shared);
        if shared.phase == RunPhase::Running {
            return Err(SchedulerError::AlreadyRunning);
        }
        let cancel = CancelToken::new();
        shared.phase = RunPhase::Running;
        shared.active = Some(cancel.clone());
        Ok((canary, cancel))
    }

    fn launch(
        &self,
        request: RunRequest,
        canary: CallParams,
        cancel: CancelToken,
        observer: Arc<dyn RunObserver>,
    ) -> RunHandle {
        let run = BatchRun {
            mode: request.mode,
            target_count: request.target_count,
            concurrency: (request.mode == RunMode::Parallel).then_some(request.concurrency),
            started_at: Utc::now(),
            ended_at: None,
            cancelled: false,
        };
        let ctx = RunContext {
            executor: self.executor.clone(),
            queue: WorkQueue::new(
                ParamPlan::new(canary, request.params, request.seed),
                request.target_count,
            ),
            cancel: cancel.clone(),
            state: RunState::new(
                self.settings.series_capacity,
                self.settings.log_capacity,
                &self.settings.updates,
                observer.clone(),
            ),
        };

        let strategy = request.strategy();
        info!(
            mode = strategy.name(),
            target = request.target_count,
            concurrency = ?run.concurrency,
            transport = self.executor.transport_name(),
            "starting run"
        );

        let shared = self.shared.clone();
        let task = tokio::spawn(drive(run, ctx, strategy, observer, shared));
        RunHandle { cancel, task }
    }
}

async fn drive(
    mut run: BatchRun,
    mut ctx: RunContext,
    strategy: Box<dyn DispatchStrategy>,
    observer: Arc<dyn RunObserver>,
    shared: Arc<Mutex<Shared>>,
) -> RunReport {
    let start = Instant::now();
    let mut release = ReleaseOnExit {
        shared,
        cancel: ctx.cancel.clone(),
        phase: None,
    };

    let end = if run.target_count == 0 {
        DispatchEnd::Exhausted
    } else {
        strategy.dispatch(&mut ctx).await
    };

    ctx.state.finish();

    let cancelled = end == DispatchEnd::Cancelled;
    let phase = if cancelled {
        RunPhase::Cancelled
    } else {
        RunPhase::Completed
    };
    let total_duration_ms = start.elapsed().as_millis() as u64;
    run.ended_at = Some(Utc::now());
    run.cancelled = cancelled;

    release.phase = Some(phase);
    drop(release);

    let stats = ctx.state.stats().clone();
    info!(
        phase = ?phase,
        total = stats.total,
        success = stats.success_count,
        errors = stats.error_count,
        avg_ms = stats.average_duration_ms,
        duration_ms = total_duration_ms,
        "run finished"
    );

    observer.on_finished(RunFinished {
        completed: !cancelled,
        cancelled,
        total_duration_ms,
    });

    RunReport {
        run,
        phase,
        stats,
        series: ctx.state.series().snapshot(),
        recent_outcomes: ctx.state.recent_outcomes(),
        issued: ctx.queue.issued(),
        total_duration_ms,
    }
}

/// Puts the scheduler back into a terminal phase however the run task ends.
/// A task torn down mid-run (a panicking observer, say) counts as cancelled.
struct ReleaseOnExit {
    shared: Arc<Mutex<Shared>>,
    cancel: CancelToken,
    phase: Option<RunPhase>,
}

impl Drop for ReleaseOnExit {
    fn drop(&mut self) {
        let phase = self.phase.unwrap_or_else(|| {
            warn!("run task aborted before finishing, releasing scheduler");
            self.cancel.cancel();
            RunPhase::Cancelled
        });
        let mut shared = lock(&self.shared);
        shared.phase = phase;
        shared.active = None;
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to a started run.
pub struct RunHandle {
    cancel: CancelToken,
    task: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn wait(self) -> Result<RunReport, SchedulerError> {
        self.task
            .await
            .map_err(|e| SchedulerError::Aborted(e.to_string()))
    }
}
