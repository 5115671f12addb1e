//! Orchestrator — starts and drives workflow executions.
//!
//! `start` claims the job with a compare-and-set `submitted → scaling_up`
//! and spawns the execution; the caller gets an execution id back right
//! away. Each execution is an independent task that only suspends while
//! polling for readiness or waiting on the executor. Every transition is
//! checkpointed to the job record and the execution record before the
//! next step begins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use burstgrid_capacity::{CapacityController, Readiness, ReadinessPoller};
use burstgrid_executor::{ExecutionError, JobExecutor};
use burstgrid_state::{
    CapacityTarget, ExecutionId, ExecutionRecord, Job, JobId, JobStatus, JobUpdate, StateStore,
    epoch_secs,
};

use crate::config::WorkflowConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::state::{WorkflowEvent, WorkflowState};

/// Fire-and-forget handle to a running execution.
///
/// Dropping it detaches the execution; it keeps running.
#[derive(Debug)]
pub struct ExecutionHandle {
    pub execution_id: ExecutionId,
    pub job_id: JobId,
    join: JoinHandle<WorkflowOutcome>,
}

impl ExecutionHandle {
    /// Wait for the execution to reach a terminal state.
    pub async fn wait(self) -> Result<WorkflowOutcome, JoinError> {
        self.join.await
    }
}

/// Final verdict of an execution.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowOutcome {
    pub execution_id: ExecutionId,
    pub job_id: JobId,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub scale_down_error: Option<String>,
}

struct Inner {
    state: StateStore,
    capacity: CapacityController,
    poller: ReadinessPoller,
    executor: Arc<dyn JobExecutor>,
    config: WorkflowConfig,
    /// Executions running in this process, by job id.
    active: Mutex<HashMap<JobId, ActiveExecution>>,
}

struct ActiveExecution {
    cancel: watch::Sender<bool>,
    /// Cleared once the execution is committed to releasing capacity.
    cancellable: bool,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        state: StateStore,
        capacity: CapacityController,
        executor: Arc<dyn JobExecutor>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                poller: ReadinessPoller::new(capacity.clone()),
                capacity,
                executor,
                config,
                active: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.inner.config
    }

    /// Start processing a submitted job.
    ///
    /// Fails with `InvalidTarget` before touching the store if the
    /// configured high target is malformed, `NotFound` if the job is
    /// missing, and `Conflict` if the job is not in `submitted` (already
    /// running or already finished).
    pub fn start(&self, job_id: &str) -> WorkflowResult<ExecutionHandle> {
        let target = self.inner.config.high_target;
        if !target.is_valid() {
            return Err(WorkflowError::InvalidTarget {
                pool_id: self.inner.config.pool_id.clone(),
                target,
            });
        }
        if self.inner.state.get_job(job_id)?.is_none() {
            return Err(WorkflowError::NotFound(format!("job {job_id}")));
        }

        let state = WorkflowState::Submitted.on(WorkflowEvent::ScaleUpRequested)?;
        let execution_id = Uuid::new_v4().to_string();
        let job = self.inner.state.transition_job(
            job_id,
            JobStatus::ScalingUp,
            JobUpdate {
                execution_id: Some(execution_id.clone()),
                ..Default::default()
            },
        )?;

        let mut record = ExecutionRecord::new(&execution_id, job_id, &job.pool_id);
        record.phase = state.phase();
        if let Err(e) = self.inner.state.put_execution(&record) {
            warn!(%execution_id, error = %e, "failed to checkpoint new execution");
        }

        info!(job_id = %job_id, %execution_id, pool = %job.pool_id, "execution started");
        Ok(self.spawn(job, record, state))
    }

    /// Signal cancellation to the job's running execution.
    ///
    /// Returns `false` if no execution for the job is running in this
    /// process, or if it has already moved on to releasing capacity. A
    /// `true` return means the job will end `failed`. An in-flight executor
    /// call is not interrupted; its result is discarded when it arrives.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.active().get(job_id) {
            Some(execution) if execution.cancellable => {
                info!(%job_id, "cancelling execution");
                execution.cancel.send(true).is_ok()
            }
            Some(_) => {
                debug!(%job_id, "execution is releasing capacity, ignoring cancel");
                false
            }
            None => false,
        }
    }

    /// Whether an execution for the job is running in this process.
    pub fn is_active(&self, job_id: &str) -> bool {
        self.active().contains_key(job_id)
    }

    /// Read an execution checkpoint.
    pub fn execution(&self, execution_id: &str) -> WorkflowResult<ExecutionRecord> {
        self.inner
            .state
            .get_execution(execution_id)?
            .ok_or_else(|| WorkflowError::NotFound(format!("execution {execution_id}")))
    }

    /// Resume executions left mid-flight by a previous process.
    ///
    /// Jobs in `scaling_up` go back to polling under a fresh deadline.
    /// Jobs in `processing` lost their executor call and its stages are not
    /// safe to re-run, so they go straight to compensation and fail.
    pub fn recover(&self) -> WorkflowResult<Vec<ExecutionHandle>> {
        let mut handles = Vec::new();

        for (status, resume_at) in [
            (JobStatus::ScalingUp, ResumeAt::ScalingUp),
            (JobStatus::Processing, ResumeAt::Compensation),
        ] {
            for job in self.inner.state.query_jobs_by_status(status)? {
                if self.is_active(&job.id) {
                    continue;
                }
                let record = self.recovered_record(&job)?;
                let state = match resume_at {
                    ResumeAt::ScalingUp => WorkflowState::ScalingUp,
                    ResumeAt::Compensation => WorkflowState::CompensatingScaleDown {
                        cause: WorkflowError::Interrupted,
                    },
                };
                warn!(
                    job_id = %job.id,
                    execution_id = %record.id,
                    resume_at = state.name(),
                    "resuming interrupted execution"
                );
                handles.push(self.spawn(job, record, state));
            }
        }

        Ok(handles)
    }

    fn recovered_record(&self, job: &Job) -> WorkflowResult<ExecutionRecord> {
        if let Some(id) = &job.execution_id
            && let Some(record) = self.inner.state.get_execution(id)?
        {
            return Ok(record);
        }
        // Job predates checkpointing or the record was lost.
        let execution_id = Uuid::new_v4().to_string();
        self.inner.state.update_job(
            &job.id,
            JobUpdate {
                execution_id: Some(execution_id.clone()),
                ..Default::default()
            },
        )?;
        Ok(ExecutionRecord::new(&execution_id, &job.id, &job.pool_id))
    }

    fn active(&self) -> MutexGuard<'_, HashMap<JobId, ActiveExecution>> {
        self.inner.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop accepting cancellation for the job's execution. Returns whether
    /// a cancel was accepted before that.
    fn close_cancellation(&self, job_id: &str) -> bool {
        match self.active().get_mut(job_id) {
            Some(execution) => {
                execution.cancellable = false;
                *execution.cancel.borrow()
            }
            None => false,
        }
    }

    fn spawn(&self, job: Job, record: ExecutionRecord, state: WorkflowState) -> ExecutionHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active().insert(
            job.id.clone(),
            ActiveExecution {
                cancel: cancel_tx,
                cancellable: !state.is_release() && !state.is_terminal(),
            },
        );

        let execution_id = record.id.clone();
        let job_id = job.id.clone();
        let this = self.clone();
        let join = tokio::spawn(async move {
            let outcome = this.drive(job, record, state, cancel_rx).await;
            this.active().remove(&outcome.job_id);
            outcome
        });

        ExecutionHandle {
            execution_id,
            job_id,
            join,
        }
    }

    /// Run the state machine until it reaches a terminal state.
    async fn drive(
        &self,
        job: Job,
        mut record: ExecutionRecord,
        mut state: WorkflowState,
        mut cancel: watch::Receiver<bool>,
    ) -> WorkflowOutcome {
        let started = Instant::now();
        let mut scale_down_error: Option<String> = None;

        while !state.is_terminal() {
            let mut event = match &state {
                WorkflowState::Submitted => WorkflowEvent::ScaleUpRequested,
                WorkflowState::ScalingUp => self.scale_up_round(&job, started, &mut cancel).await,
                WorkflowState::Executing => self.execute(&job, &mut cancel).await,
                WorkflowState::ScalingDown { .. } | WorkflowState::CompensatingScaleDown { .. } => {
                    if let Err(e) = self.release_capacity(&job).await {
                        scale_down_error = Some(e.to_string());
                    }
                    WorkflowEvent::CapacityReleased
                }
                WorkflowState::Succeeded { .. } | WorkflowState::Failed { .. } => break,
            };

            // A result that races an accepted cancel loses to it.
            let leaving = !matches!(
                event,
                WorkflowEvent::ReadinessConfirmed | WorkflowEvent::ReadinessTimedOut
            );
            if leaving
                && matches!(state, WorkflowState::ScalingUp | WorkflowState::Executing)
                && self.close_cancellation(&job.id)
                && matches!(event, WorkflowEvent::ExecutionSucceeded(_))
            {
                info!(job_id = %job.id, "cancelled before the result was recorded, discarding result");
                event = WorkflowEvent::Aborted(WorkflowError::Cancelled);
            }

            let from = state.name();
            state = match state.on(event) {
                Ok(next) => next,
                Err(e) => {
                    error!(job_id = %job.id, from, error = %e, "workflow bug, compensating");
                    WorkflowState::CompensatingScaleDown { cause: e }
                }
            };
            if state.name() != from {
                debug!(job_id = %job.id, from, to = state.name(), "workflow transition");
            }

            if let Err(e) = self.checkpoint(&job.id, &mut record, &state, &scale_down_error) {
                match state {
                    // The job never made it to processing; release what was requested.
                    WorkflowState::Executing => {
                        warn!(job_id = %job.id, error = %e, "could not enter executing, compensating");
                        self.close_cancellation(&job.id);
                        state = WorkflowState::CompensatingScaleDown { cause: e };
                    }
                    WorkflowState::Succeeded { .. } => {
                        warn!(
                            job_id = %job.id,
                            error = %e,
                            "job left processing before its result arrived, discarding result"
                        );
                    }
                    _ => {
                        error!(job_id = %job.id, state = state.name(), error = %e, "checkpoint failed");
                    }
                }
            }
        }

        let (status, result, error) = match state {
            WorkflowState::Succeeded { result } => (JobStatus::Completed, Some(result), None),
            WorkflowState::Failed { cause } => (JobStatus::Failed, None, Some(cause.to_string())),
            other => (JobStatus::Failed, None, Some(format!("stopped in {}", other.name()))),
        };
        match &error {
            None => info!(job_id = %job.id, execution_id = %record.id, "execution succeeded"),
            Some(e) => warn!(job_id = %job.id, execution_id = %record.id, error = %e, "execution failed"),
        }

        WorkflowOutcome {
            execution_id: record.id,
            job_id: job.id,
            status,
            result,
            error,
            scale_down_error,
        }
    }

    /// Write the job status for `state` (if it has one) and the execution
    /// checkpoint.
    fn checkpoint(
        &self,
        job_id: &str,
        record: &mut ExecutionRecord,
        state: &WorkflowState,
        scale_down_error: &Option<String>,
    ) -> WorkflowResult<()> {
        let now = epoch_secs();
        match state {
            WorkflowState::Executing => {
                self.inner.state.transition_job(
                    job_id,
                    JobStatus::Processing,
                    JobUpdate {
                        started_at: Some(now),
                        ..Default::default()
                    },
                )?;
            }
            WorkflowState::Succeeded { result } => {
                self.inner.state.transition_job(
                    job_id,
                    JobStatus::Completed,
                    JobUpdate {
                        completed_at: Some(now),
                        result: Some(result.clone()),
                        ..Default::default()
                    },
                )?;
            }
            WorkflowState::Failed { cause } => {
                self.inner.state.transition_job(
                    job_id,
                    JobStatus::Failed,
                    JobUpdate {
                        failed_at: Some(now),
                        error: Some(cause.to_string()),
                        ..Default::default()
                    },
                )?;
            }
            _ => {}
        }

        record.phase = state.phase();
        record.updated_at = now;
        record.scale_down_error = scale_down_error.clone();
        if let WorkflowState::Failed { cause } = state {
            record.error = Some(cause.to_string());
        }
        if state.is_terminal() {
            record.finished_at = Some(now);
        }
        self.inner.state.put_execution(record)?;
        Ok(())
    }

    /// One round of `ScalingUp`: (re-)request the high target and poll.
    async fn scale_up_round(
        &self,
        job: &Job,
        started: Instant,
        cancel: &mut watch::Receiver<bool>,
    ) -> WorkflowEvent {
        let config = &self.inner.config;
        let target = config.high_target;

        if *cancel.borrow() {
            return WorkflowEvent::Aborted(WorkflowError::Cancelled);
        }
        let remaining = config.deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return WorkflowEvent::Aborted(self.readiness_timeout(job, started));
        }

        // Re-issued every round: another job sharing the pool may have
        // released it since the last request.
        if let Err(e) = self.inner.capacity.request_target(&job.pool_id, target).await {
            return WorkflowEvent::Aborted(e.into());
        }

        let round = remaining.min(config.poll_timeout);
        tokio::select! {
            readiness = self.inner.poller.await_ready(&job.pool_id, target, config.poll_interval, round) => {
                match readiness {
                    Readiness::Ready(_) => WorkflowEvent::ReadinessConfirmed,
                    Readiness::TimedOut { last_applied, polls } => {
                        if started.elapsed() >= config.deadline {
                            WorkflowEvent::Aborted(self.readiness_timeout(job, started))
                        } else {
                            info!(
                                job_id = %job.id,
                                pool = %job.pool_id,
                                ?last_applied,
                                polls,
                                "pool not ready yet, re-polling"
                            );
                            WorkflowEvent::ReadinessTimedOut
                        }
                    }
                }
            }
            _ = cancelled(cancel) => WorkflowEvent::Aborted(WorkflowError::Cancelled),
        }
    }

    fn readiness_timeout(&self, job: &Job, started: Instant) -> WorkflowError {
        WorkflowError::ReadinessTimeout {
            pool_id: job.pool_id.clone(),
            target: self.inner.config.high_target,
            waited: started.elapsed(),
        }
    }

    /// Run the executor in its own task and wait for it, a timeout, or
    /// cancellation, whichever comes first.
    async fn execute(&self, job: &Job, cancel: &mut watch::Receiver<bool>) -> WorkflowEvent {
        if *cancel.borrow() {
            return WorkflowEvent::Aborted(WorkflowError::Cancelled);
        }

        let (tx, rx) = oneshot::channel();
        let executor = self.inner.executor.clone();
        let job_owned = job.clone();
        tokio::spawn(async move {
            let result = executor.execute(&job_owned).await;
            if tx.send(result).is_err() {
                info!(job_id = %job_owned.id, "execution finished after the workflow gave up, discarding result");
            }
        });

        let timeout = self.inner.config.execution_timeout;
        let expired = async {
            match timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = rx => match result {
                Ok(Ok(value)) => WorkflowEvent::ExecutionSucceeded(value),
                Ok(Err(e)) => WorkflowEvent::ExecutionFailed(e.into()),
                Err(_) => WorkflowEvent::ExecutionFailed(
                    ExecutionError::new("executor", "executor task ended without a result").into(),
                ),
            },
            _ = expired => WorkflowEvent::Aborted(WorkflowError::ExecutionTimeout(timeout.unwrap_or_default())),
            _ = cancelled(cancel) => WorkflowEvent::Aborted(WorkflowError::Cancelled),
        }
    }

    /// Request the idle target. The single finalizer for both outcomes.
    async fn release_capacity(&self, job: &Job) -> WorkflowResult<()> {
        match self
            .inner
            .capacity
            .request_target(&job.pool_id, CapacityTarget::IDLE)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(
                    alarm = "capacity_leak",
                    job_id = %job.id,
                    pool = %job.pool_id,
                    error = %e,
                    "idle scale-down failed, pool capacity may be leaking"
                );
                Err(WorkflowError::ScaleDown {
                    pool_id: job.pool_id.clone(),
                    message: e.to_string(),
                })
            }
        }
    }
}

#[derive(Clone, Copy)]
enum ResumeAt {
    ScalingUp,
    Compensation,
}

/// Resolves once cancellation is signalled. Never resolves if the sender
/// is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|c| *c).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use burstgrid_capacity::{CapacityBackend, CapacityError, CapacityResult};
    use burstgrid_state::ExecutionPhase;
    use serde_json::json;

    #[derive(Clone, Copy)]
    enum ApplyMode {
        Immediate,
        Never,
        AfterReads(u32),
    }

    #[derive(Default)]
    struct Recorded {
        requested: HashMap<String, CapacityTarget>,
        reads: u32,
        requests: Vec<CapacityTarget>,
        /// Job statuses observed at the moment each idle request arrived.
        statuses_at_idle: Vec<Vec<JobStatus>>,
    }

    struct FakeBackend {
        mode: ApplyMode,
        fail_idle: bool,
        /// How long each idle request takes to return.
        idle_delay: Duration,
        store: StateStore,
        recorded: Mutex<Recorded>,
    }

    impl FakeBackend {
        fn new(mode: ApplyMode, store: StateStore) -> Self {
            Self {
                mode,
                fail_idle: false,
                idle_delay: Duration::ZERO,
                store,
                recorded: Mutex::new(Recorded::default()),
            }
        }

        fn requests(&self) -> Vec<CapacityTarget> {
            self.recorded.lock().unwrap().requests.clone()
        }

        fn idle_requests(&self) -> usize {
            self.requests().iter().filter(|t| t.is_idle()).count()
        }
    }

    #[async_trait]
    impl CapacityBackend for FakeBackend {
        async fn request(&self, pool_id: &str, target: CapacityTarget) -> CapacityResult<()> {
            {
                let mut recorded = self.recorded.lock().unwrap();
                recorded.requests.push(target);
                if target.is_idle() {
                    let statuses = self
                        .store
                        .list_jobs()
                        .unwrap()
                        .into_iter()
                        .map(|j| j.status)
                        .collect();
                    recorded.statuses_at_idle.push(statuses);
                }
            }
            if target.is_idle() {
                tokio::time::sleep(self.idle_delay).await;
                if self.fail_idle {
                    return Err(CapacityError::Backend("control plane unavailable".into()));
                }
            }
            self.recorded
                .lock()
                .unwrap()
                .requested
                .insert(pool_id.to_string(), target);
            Ok(())
        }

        async fn applied(&self, pool_id: &str) -> CapacityResult<CapacityTarget> {
            let mut recorded = self.recorded.lock().unwrap();
            recorded.reads += 1;
            let requested = recorded
                .requested
                .get(pool_id)
                .copied()
                .unwrap_or(CapacityTarget::IDLE);
            Ok(match self.mode {
                ApplyMode::Immediate => requested,
                ApplyMode::Never => CapacityTarget::IDLE,
                ApplyMode::AfterReads(n) if recorded.reads > n => requested,
                ApplyMode::AfterReads(_) => CapacityTarget::IDLE,
            })
        }
    }

    struct FakeExecutor {
        delay: Duration,
        outcome: Result<Value, ExecutionError>,
        runs: AtomicU32,
        finished: AtomicU32,
    }

    impl FakeExecutor {
        fn ok(delay: Duration) -> Self {
            Self {
                delay,
                outcome: Ok(json!({ "frames": 240 })),
                runs: AtomicU32::new(0),
                finished: AtomicU32::new(0),
            }
        }

        fn failing(stage: &str, message: &str) -> Self {
            Self {
                outcome: Err(ExecutionError::new(stage, message)),
                ..Self::ok(Duration::ZERO)
            }
        }
    }

    #[async_trait]
    impl JobExecutor for FakeExecutor {
        async fn execute(&self, _job: &Job) -> Result<Value, ExecutionError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    struct Harness {
        store: StateStore,
        backend: Arc<FakeBackend>,
        executor: Arc<FakeExecutor>,
        orchestrator: Orchestrator,
    }

    fn fast_config() -> WorkflowConfig {
        WorkflowConfig {
            pool_id: "media-pool".to_string(),
            high_target: CapacityTarget::new(2, 5),
            poll_interval: Duration::from_millis(10),
            poll_timeout: Duration::from_millis(50),
            deadline: Duration::from_millis(300),
            execution_timeout: None,
        }
    }

    fn harness_with(
        mode: ApplyMode,
        fail_idle: bool,
        executor: FakeExecutor,
        config: WorkflowConfig,
    ) -> Harness {
        harness_from(executor, config, |backend| {
            backend.mode = mode;
            backend.fail_idle = fail_idle;
        })
    }

    fn harness_from(
        executor: FakeExecutor,
        config: WorkflowConfig,
        tune: impl FnOnce(&mut FakeBackend),
    ) -> Harness {
        let store = StateStore::open_in_memory().unwrap();
        let mut backend = FakeBackend::new(ApplyMode::Immediate, store.clone());
        tune(&mut backend);
        let backend = Arc::new(backend);
        let executor = Arc::new(executor);
        let orchestrator = Orchestrator::new(
            store.clone(),
            CapacityController::new(backend.clone()),
            executor.clone(),
            config,
        );
        Harness {
            store,
            backend,
            executor,
            orchestrator,
        }
    }

    fn harness(mode: ApplyMode, executor: FakeExecutor) -> Harness {
        harness_with(mode, false, executor, fast_config())
    }

    fn submit(store: &StateStore, id: &str) {
        store
            .put_job(&Job::new(id, "media-pool", json!({ "media_uri": "s3://b/clip.mp4" })))
            .unwrap();
    }

    async fn wait_for_status(store: &StateStore, id: &str, status: JobStatus) {
        for _ in 0..200 {
            if store.get_job(id).unwrap().map(|j| j.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached {status}");
    }

    // ── Scenarios ──────────────────────────────────────────────────

    #[tokio::test]
    async fn happy_path_completes_and_releases() {
        let h = harness(ApplyMode::AfterReads(2), FakeExecutor::ok(Duration::ZERO));
        submit(&h.store, "job-1");

        let handle = h.orchestrator.start("job-1").unwrap();
        let execution_id = handle.execution_id.clone();
        let outcome = handle.wait().await.unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.result, Some(json!({ "frames": 240 })));
        assert_eq!(outcome.scale_down_error, None);

        let job = h.store.get_job("job-1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({ "frames": 240 })));
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert!(job.failed_at.is_none());
        assert_eq!(job.execution_id.as_deref(), Some(execution_id.as_str()));

        let requests = h.backend.requests();
        assert_eq!(requests.first(), Some(&CapacityTarget::new(2, 5)));
        assert_eq!(requests.last(), Some(&CapacityTarget::IDLE));
        assert_eq!(h.backend.idle_requests(), 1);

        let record = h.orchestrator.execution(&execution_id).unwrap();
        assert_eq!(record.phase, ExecutionPhase::Succeeded);
        assert!(record.finished_at.is_some());
        assert!(!h.orchestrator.is_active("job-1"));
    }

    #[tokio::test]
    async fn readiness_timeout_compensates_and_fails() {
        let h = harness(ApplyMode::Never, FakeExecutor::ok(Duration::ZERO));
        submit(&h.store, "job-1");

        let outcome = h.orchestrator.start("job-1").unwrap().wait().await.unwrap();

        assert_eq!(outcome.status, JobStatus::Failed);
        let job = h.store.get_job("job-1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("did not reach {2,5}"));
        assert!(job.failed_at.is_some());
        assert!(job.started_at.is_none());

        assert_eq!(h.backend.requests().last(), Some(&CapacityTarget::IDLE));
        assert_eq!(h.backend.idle_requests(), 1);
        assert_eq!(h.executor.runs.load(Ordering::SeqCst), 0);
        // Released while the job still read scaling_up.
        assert_eq!(
            h.backend.recorded.lock().unwrap().statuses_at_idle,
            vec![vec![JobStatus::ScalingUp]]
        );
    }

    #[tokio::test]
    async fn executor_failure_attaches_stage_error() {
        let h = harness(ApplyMode::Immediate, FakeExecutor::failing("transcode", "codec blew up"));
        submit(&h.store, "job-1");

        let outcome = h.orchestrator.start("job-1").unwrap().wait().await.unwrap();

        assert_eq!(outcome.status, JobStatus::Failed);
        let job = h.store.get_job("job-1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.error.as_deref(),
            Some("stage `transcode` failed: codec blew up")
        );
        assert!(job.result.is_none());
        assert!(job.started_at.is_some());
        assert_eq!(h.backend.idle_requests(), 1);
    }

    #[tokio::test]
    async fn compensation_precedes_failed_status() {
        let h = harness(ApplyMode::Immediate, FakeExecutor::failing("analyze", "oom"));
        submit(&h.store, "job-1");

        h.orchestrator.start("job-1").unwrap().wait().await.unwrap();

        let recorded = h.backend.recorded.lock().unwrap();
        assert_eq!(recorded.statuses_at_idle, vec![vec![JobStatus::Processing]]);
    }

    #[tokio::test]
    async fn re_polls_until_ready_within_deadline() {
        // Ready only after several poll rounds have timed out.
        let config = WorkflowConfig {
            poll_timeout: Duration::from_millis(25),
            deadline: Duration::from_secs(2),
            ..fast_config()
        };
        let h = harness_with(
            ApplyMode::AfterReads(8),
            false,
            FakeExecutor::ok(Duration::ZERO),
            config,
        );
        submit(&h.store, "job-1");

        let outcome = h.orchestrator.start("job-1").unwrap().wait().await.unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        let high = h
            .backend
            .requests()
            .iter()
            .filter(|t| **t == CapacityTarget::new(2, 5))
            .count();
        assert!(high > 1, "high target requested {high} times");
    }

    // ── At most one execution ──────────────────────────────────────

    #[tokio::test]
    async fn second_start_conflicts() {
        let h = harness(ApplyMode::Immediate, FakeExecutor::ok(Duration::from_millis(200)));
        submit(&h.store, "job-1");

        let first = h.orchestrator.start("job-1").unwrap();
        let err = h.orchestrator.start("job-1").unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict { status: JobStatus::ScalingUp, .. }));

        wait_for_status(&h.store, "job-1", JobStatus::Processing).await;
        let err = h.orchestrator.start("job-1").unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict { status: JobStatus::Processing, .. }));

        let outcome = first.wait().await.unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(h.executor.runs.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.list_executions_for_job("job-1").unwrap().len(), 1);

        // Finished jobs cannot be started again either.
        let err = h.orchestrator.start("job-1").unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict { status: JobStatus::Completed, .. }));
    }

    #[tokio::test]
    async fn concurrent_jobs_run_independently() {
        let h = harness(ApplyMode::Immediate, FakeExecutor::ok(Duration::from_millis(20)));
        for id in ["a", "b", "c"] {
            submit(&h.store, id);
        }

        let handles: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| h.orchestrator.start(id).unwrap())
            .collect();
        for handle in handles {
            assert_eq!(handle.wait().await.unwrap().status, JobStatus::Completed);
        }

        assert_eq!(h.store.query_jobs_by_status(JobStatus::Completed).unwrap().len(), 3);
        assert_eq!(h.backend.idle_requests(), 3);
    }

    #[tokio::test]
    async fn start_missing_job_is_not_found() {
        let h = harness(ApplyMode::Immediate, FakeExecutor::ok(Duration::ZERO));
        let err = h.orchestrator.start("ghost").unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
        assert!(h.backend.requests().is_empty());
    }

    #[tokio::test]
    async fn invalid_high_target_rejected_before_any_call() {
        let config = WorkflowConfig {
            high_target: CapacityTarget::new(5, 2),
            ..fast_config()
        };
        let h = harness_with(ApplyMode::Immediate, false, FakeExecutor::ok(Duration::ZERO), config);
        submit(&h.store, "job-1");

        let err = h.orchestrator.start("job-1").unwrap_err();

        assert!(matches!(err, WorkflowError::InvalidTarget { .. }));
        assert!(h.backend.requests().is_empty());
        assert_eq!(
            h.store.get_job("job-1").unwrap().unwrap().status,
            JobStatus::Submitted
        );
    }

    #[tokio::test]
    async fn invalid_high_target_checked_before_job_lookup() {
        let config = WorkflowConfig {
            pool_id: "gpu-pool".to_string(),
            high_target: CapacityTarget::new(5, 2),
            ..fast_config()
        };
        let h = harness_with(ApplyMode::Immediate, false, FakeExecutor::ok(Duration::ZERO), config);

        let err = h.orchestrator.start("ghost").unwrap_err();

        match err {
            WorkflowError::InvalidTarget { pool_id, target } => {
                assert_eq!(pool_id, "gpu-pool");
                assert_eq!(target, CapacityTarget::new(5, 2));
            }
            other => panic!("expected InvalidTarget, got {other:?}"),
        }
        assert!(h.backend.requests().is_empty());
        assert!(h.store.get_job("ghost").unwrap().is_none());
    }

    // ── Scale-down failures ────────────────────────────────────────

    #[tokio::test]
    async fn scale_down_failure_does_not_override_success() {
        let h = harness_with(
            ApplyMode::Immediate,
            true,
            FakeExecutor::ok(Duration::ZERO),
            fast_config(),
        );
        submit(&h.store, "job-1");

        let handle = h.orchestrator.start("job-1").unwrap();
        let execution_id = handle.execution_id.clone();
        let outcome = handle.wait().await.unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert!(outcome.scale_down_error.is_some());
        assert_eq!(
            h.store.get_job("job-1").unwrap().unwrap().status,
            JobStatus::Completed
        );
        let record = h.orchestrator.execution(&execution_id).unwrap();
        assert!(record.scale_down_error.unwrap().contains("control plane unavailable"));
        assert_eq!(h.backend.idle_requests(), 1);
    }

    #[tokio::test]
    async fn scale_down_failure_keeps_original_error() {
        let h = harness_with(
            ApplyMode::Immediate,
            true,
            FakeExecutor::failing("thumbnail", "corrupt input"),
            fast_config(),
        );
        submit(&h.store, "job-1");

        let outcome = h.orchestrator.start("job-1").unwrap().wait().await.unwrap();

        assert_eq!(
            outcome.error.as_deref(),
            Some("stage `thumbnail` failed: corrupt input")
        );
        assert!(outcome.scale_down_error.is_some());
        assert_eq!(
            h.store.get_job("job-1").unwrap().unwrap().error.as_deref(),
            Some("stage `thumbnail` failed: corrupt input")
        );
    }

    // ── Cancellation and late results ──────────────────────────────

    #[tokio::test]
    async fn cancel_while_scaling_up() {
        let config = WorkflowConfig {
            deadline: Duration::from_secs(30),
            ..fast_config()
        };
        let h = harness_with(ApplyMode::Never, false, FakeExecutor::ok(Duration::ZERO), config);
        submit(&h.store, "job-1");

        let handle = h.orchestrator.start("job-1").unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(h.orchestrator.cancel("job-1"));

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("execution cancelled"));
        assert_eq!(h.backend.idle_requests(), 1);
        assert_eq!(
            h.backend.recorded.lock().unwrap().statuses_at_idle,
            vec![vec![JobStatus::ScalingUp]]
        );
        assert!(!h.orchestrator.cancel("job-1"));
    }

    #[tokio::test]
    async fn cancel_while_executing_discards_result() {
        let h = harness(ApplyMode::Immediate, FakeExecutor::ok(Duration::from_millis(150)));
        submit(&h.store, "job-1");

        let handle = h.orchestrator.start("job-1").unwrap();
        wait_for_status(&h.store, "job-1", JobStatus::Processing).await;
        assert!(h.orchestrator.cancel("job-1"));

        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(outcome.error.as_deref(), Some("execution cancelled"));
        assert_eq!(
            h.backend.recorded.lock().unwrap().statuses_at_idle,
            vec![vec![JobStatus::Processing]]
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.executor.finished.load(Ordering::SeqCst), 1);
        assert!(h.store.get_job("job-1").unwrap().unwrap().result.is_none());
    }

    #[tokio::test]
    async fn cancel_while_releasing_is_refused() {
        let h = harness_from(FakeExecutor::ok(Duration::ZERO), fast_config(), |backend| {
            backend.idle_delay = Duration::from_millis(150);
        });
        submit(&h.store, "job-1");

        let handle = h.orchestrator.start("job-1").unwrap();
        for _ in 0..200 {
            if h.backend.idle_requests() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(h.backend.idle_requests(), 1);
        assert!(h.orchestrator.is_active("job-1"));

        assert!(!h.orchestrator.cancel("job-1"));

        let outcome = handle.wait().await.unwrap();
        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(outcome.result, Some(json!({ "frames": 240 })));
        assert_eq!(
            h.store.get_job("job-1").unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn late_result_after_timeout_is_discarded() {
        let config = WorkflowConfig {
            execution_timeout: Some(Duration::from_millis(30)),
            ..fast_config()
        };
        let h = harness_with(
            ApplyMode::Immediate,
            false,
            FakeExecutor::ok(Duration::from_millis(150)),
            config,
        );
        submit(&h.store, "job-1");

        let outcome = h.orchestrator.start("job-1").unwrap().wait().await.unwrap();
        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(outcome.error.unwrap().contains("execution exceeded"));

        // Let the executor run to completion.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.executor.finished.load(Ordering::SeqCst), 1);

        let job = h.store.get_job("job-1").unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.result.is_none());
        assert_eq!(h.backend.idle_requests(), 1);
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_false() {
        let h = harness(ApplyMode::Immediate, FakeExecutor::ok(Duration::ZERO));
        assert!(!h.orchestrator.cancel("nope"));
    }

    // ── Recovery ───────────────────────────────────────────────────

    #[tokio::test]
    async fn recover_resumes_scaling_up_and_fails_processing() {
        let h = harness(ApplyMode::Immediate, FakeExecutor::ok(Duration::ZERO));
        for (id, status) in [
            ("scaling", JobStatus::ScalingUp),
            ("processing", JobStatus::Processing),
            ("done", JobStatus::Completed),
        ] {
            let mut job = Job::new(id, "media-pool", Value::Null);
            job.status = status;
            h.store.put_job(&job).unwrap();
        }

        let handles = h.orchestrator.recover().unwrap();
        assert_eq!(handles.len(), 2);

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.wait().await.unwrap());
        }
        outcomes.sort_by(|a, b| a.job_id.cmp(&b.job_id));

        assert_eq!(outcomes[0].job_id, "processing");
        assert_eq!(outcomes[0].status, JobStatus::Failed);
        assert!(outcomes[0].error.as_deref().unwrap().contains("interrupted"));
        assert_eq!(outcomes[1].job_id, "scaling");
        assert_eq!(outcomes[1].status, JobStatus::Completed);

        // Only the resumed scale-up reached the executor.
        assert_eq!(h.executor.runs.load(Ordering::SeqCst), 1);
        assert_eq!(h.backend.idle_requests(), 2);
        assert_eq!(
            h.store.get_job("done").unwrap().unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn recover_reuses_checkpointed_execution_id() {
        let h = harness(ApplyMode::Immediate, FakeExecutor::ok(Duration::ZERO));
        let mut job = Job::new("job-1", "media-pool", Value::Null);
        job.status = JobStatus::ScalingUp;
        job.execution_id = Some("exec-before-crash".to_string());
        h.store.put_job(&job).unwrap();
        let mut record = ExecutionRecord::new("exec-before-crash", "job-1", "media-pool");
        record.phase = ExecutionPhase::ScalingUp;
        h.store.put_execution(&record).unwrap();

        let handles = h.orchestrator.recover().unwrap();
        assert_eq!(handles[0].execution_id, "exec-before-crash");
        let outcome = handles.into_iter().next().unwrap().wait().await.unwrap();

        assert_eq!(outcome.status, JobStatus::Completed);
        assert_eq!(
            h.orchestrator.execution("exec-before-crash").unwrap().phase,
            ExecutionPhase::Succeeded
        );
    }
}
