//! Tracking of a single backend job
//!
//! A tracker runs two sources side by side: a push subscription and a poll
//! loop. Both feed the same reconciliation point, which is serialized by the
//! tracker's state lock:
//!
//! 1. the snapshot passes through the ordering filter,
//! 2. accepted changes are published to subscribers,
//! 3. the first terminal state retires the tracker. Sources are shut down
//!    before the terminal update is published, and anything that arrives
//!    afterwards is dropped.
//!
//! Cancellation takes the same lock, so a snapshot that is in flight while
//! `cancel` runs can never be published after it.

use super::backoff::AttemptCounter;
use super::config::TrackerConfig;
use super::poll_worker::{PollHandle, PollWorker};
use super::push_channel::{PushChannel, PushHandle};
use super::sink::{SnapshotSink, SourceEvent};
use super::subscription::JobSubscription;
use crate::modules::jobs::domain::backend::{JobBackend, PushSource};
use crate::modules::jobs::domain::entities::{
    ErrorDetail, FailureKind, JobId, JobKind, JobRecord, JobSnapshot, JobUpdate, SnapshotSource,
};
use crate::modules::jobs::domain::state_machine::{StateMachine, Transition};
use crate::modules::jobs::domain::value_objects::JobState;
use crate::shared::errors::{AppError, AppResult};
use crate::{log_debug, log_info, log_warn};
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Collaborators shared by all trackers of a registry
#[derive(Clone)]
pub struct TrackerContext {
    pub backend: Arc<dyn JobBackend>,
    pub push: Arc<dyn PushSource>,
    pub config: TrackerConfig,
}

impl TrackerContext {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        push: Arc<dyn PushSource>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            backend,
            push,
            config,
        }
    }
}

/// Why a tracker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "failure", rename_all = "snake_case")]
pub enum Retirement {
    Done,
    Failed(FailureKind),
    Cancelled,
}

impl Retirement {
    /// Failed and cancelled runs can be resubmitted.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Retirement::Done)
    }
}

/// Called once every time a tracker retires, after its lock is released
pub type RetireHook = Arc<dyn Fn(&JobId, Retirement) + Send + Sync>;

/// Running sources of one tracking run. Dropping it stops both.
struct ActiveSources {
    token: CancellationToken,
    _poll: PollHandle,
    _push: PushHandle,
}

impl Drop for ActiveSources {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

enum Phase {
    Active(ActiveSources),
    Retired(Retirement),
}

struct TrackerState {
    record: JobRecord,
    phase: Phase,
    /// Bumped on retry so sources of an earlier run cannot touch the new one
    generation: u64,
    last_update: JobUpdate,
}

impl TrackerState {
    fn retirement(&self) -> Option<Retirement> {
        match self.phase {
            Phase::Active(_) => None,
            Phase::Retired(retirement) => Some(retirement),
        }
    }
}

struct TrackerInner {
    backend: Arc<dyn JobBackend>,
    push: Arc<dyn PushSource>,
    config: TrackerConfig,
    attempts: AttemptCounter,
    updates: broadcast::Sender<JobUpdate>,
    state: Mutex<TrackerState>,
    on_retired: Option<RetireHook>,
}

/// Handle to a tracked job. Cheap to clone; all clones share one tracker.
#[derive(Clone)]
pub struct JobTracker {
    inner: Arc<TrackerInner>,
}

impl JobTracker {
    /// Start tracking `job_id`. The initial `Queued` update is available to
    /// subscribers right away.
    pub fn start(context: &TrackerContext, job_id: JobId, kind: JobKind) -> Self {
        Self::start_with_hook(context, job_id, kind, None)
    }

    pub fn start_with_hook(
        context: &TrackerContext,
        job_id: JobId,
        kind: JobKind,
        on_retired: Option<RetireHook>,
    ) -> Self {
        let record = JobRecord::new(job_id, kind);
        let last_update = JobUpdate::from_record(&record);
        let (updates, _) = broadcast::channel(context.config.update_buffer.max(1));

        let inner = Arc::new(TrackerInner {
            backend: Arc::clone(&context.backend),
            push: Arc::clone(&context.push),
            config: context.config.clone(),
            attempts: AttemptCounter::new(),
            updates,
            // Placeholder until the first run is launched below.
            state: Mutex::new(TrackerState {
                record,
                phase: Phase::Retired(Retirement::Cancelled),
                generation: 0,
                last_update,
            }),
            on_retired,
        });

        let tracker = Self { inner };
        {
            let mut state = tracker.inner.lock_state();
            tracker.launch(&mut state);
            log_info!(
                "Tracking {} job {}",
                state.record.kind,
                state.record.id
            );
        }
        tracker
    }

    pub fn id(&self) -> JobId {
        self.inner.lock_state().record.id.clone()
    }

    pub fn kind(&self) -> JobKind {
        self.inner.lock_state().record.kind
    }

    /// Current record with live attempt count
    pub fn record(&self) -> JobRecord {
        let mut state = self.inner.lock_state();
        self.inner.refresh_counters(&mut state);
        state.record.clone()
    }

    /// Last published update
    pub fn current(&self) -> JobUpdate {
        self.inner.lock_state().last_update.clone()
    }

    /// Whether both handles point at the same tracker
    pub fn ptr_eq(&self, other: &JobTracker) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_retired(&self) -> bool {
        self.retirement().is_some()
    }

    pub fn retirement(&self) -> Option<Retirement> {
        self.inner.lock_state().retirement()
    }

    pub fn subscribe(&self) -> JobSubscription {
        let state = self.inner.lock_state();
        JobSubscription::new(state.last_update.clone(), self.inner.updates.subscribe())
    }

    /// Stop tracking without touching the backend job. Publishes a one-shot
    /// cancelled update.
    pub fn cancel(&self) -> AppResult<()> {
        let (job_id, retirement) = {
            let mut state = self.inner.lock_state();
            if let Some(retirement) = state.retirement() {
                return Err(AppError::InvalidOperation(format!(
                    "Job {} is no longer tracked ({:?})",
                    state.record.id, retirement
                )));
            }

            self.inner.refresh_counters(&mut state);
            state.phase = Phase::Retired(Retirement::Cancelled);
            let update = JobUpdate::cancelled(&state.record);
            self.inner.publish(&mut state, update);
            log_info!("Stopped tracking job {}", state.record.id);
            (state.record.id.clone(), Retirement::Cancelled)
        };

        self.inner.notify_retired(&job_id, retirement);
        Ok(())
    }

    /// Resubmit a failed or cancelled job and track the new run from
    /// `Queued`. Returns the new backend id.
    pub async fn retry(&self) -> AppResult<JobId> {
        let (old_id, kind, generation) = {
            let state = self.inner.lock_state();
            match state.retirement() {
                Some(retirement) if retirement.is_retryable() => {}
                Some(_) => {
                    return Err(AppError::InvalidOperation(format!(
                        "Job {} already completed",
                        state.record.id
                    )))
                }
                None => {
                    return Err(AppError::InvalidOperation(format!(
                        "Job {} is still being tracked",
                        state.record.id
                    )))
                }
            }
            (
                state.record.id.clone(),
                state.record.kind,
                state.generation,
            )
        };

        let new_id = self.inner.backend.resubmit(&old_id, kind).await?;

        let mut state = self.inner.lock_state();
        if state.generation != generation || state.retirement().is_none() {
            return Err(AppError::InvalidOperation(format!(
                "Job {} was retried concurrently",
                old_id
            )));
        }

        state.record = JobRecord::new(new_id.clone(), kind);
        self.inner.attempts.reset();
        self.launch(&mut state);
        log_info!("Retrying job {} as {}", old_id, new_id);

        Ok(new_id)
    }

    /// Fetch the job once, outside the poll schedule. The attempt counter is
    /// left alone. Transport errors go back to the caller; they never change
    /// the job state.
    pub async fn refresh_now(&self) -> AppResult<JobUpdate> {
        let (job_id, generation) = {
            let state = self.inner.lock_state();
            if state.retirement().is_some() {
                return Err(AppError::InvalidOperation(format!(
                    "Job {} is no longer tracked",
                    state.record.id
                )));
            }
            (state.record.id.clone(), state.generation)
        };

        let event = match self.inner.backend.fetch_snapshot(&job_id).await {
            Ok(snapshot) => SourceEvent::Snapshot {
                source: SnapshotSource::Manual,
                snapshot,
            },
            Err(error) if error.is_transient() => return Err(error),
            Err(error) => SourceEvent::Fatal {
                source: SnapshotSource::Manual,
                error,
            },
        };

        self.inner.handle_event(generation, event);
        Ok(self.current())
    }

    /// Start sources for the current record and publish its initial update.
    fn launch(&self, state: &mut TrackerState) {
        state.generation += 1;

        let sink: Arc<dyn SnapshotSink> = Arc::new(TrackerSink {
            tracker: Arc::downgrade(&self.inner),
            generation: state.generation,
        });

        let token = CancellationToken::new();
        let job_id = state.record.id.clone();

        let poll = PollWorker::new(
            Arc::clone(&self.inner.backend),
            self.inner.config.scheduler.clone(),
            self.inner.attempts.clone(),
        )
        .start(job_id.clone(), Arc::clone(&sink), token.child_token());

        let push = PushChannel::new(Arc::clone(&self.inner.push)).open(
            job_id,
            sink,
            token.child_token(),
        );

        state.phase = Phase::Active(ActiveSources {
            token,
            _poll: poll,
            _push: push,
        });

        self.inner.refresh_counters(state);
        let update = JobUpdate::from_record(&state.record);
        self.inner.publish(state, update);
    }
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("JobTracker")
            .field("id", &state.record.id)
            .field("kind", &state.record.kind)
            .field("state", &state.record.state)
            .field("retirement", &state.retirement())
            .finish()
    }
}

impl TrackerInner {
    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh_counters(&self, state: &mut TrackerState) {
        if state.retirement().is_none() {
            let attempt = self.attempts.current();
            state.record.attempt = attempt;
            state.record.taking_long = self.config.is_taking_long(attempt);
        }
    }

    fn publish(&self, state: &mut TrackerState, update: JobUpdate) {
        state.last_update = update.clone();
        // No receivers is fine; late subscribers replay `last_update`.
        let _ = self.updates.send(update);
    }

    fn notify_retired(&self, job_id: &JobId, retirement: Retirement) {
        if let Some(hook) = &self.on_retired {
            hook(job_id, retirement);
        }
    }

    /// The reconciliation point. Every source event for every run goes
    /// through here, one at a time.
    fn handle_event(&self, generation: u64, event: SourceEvent) -> ControlFlow<()> {
        let (flow, retired) = {
            let mut state = self.lock_state();
            if state.generation != generation || state.retirement().is_some() {
                return ControlFlow::Break(());
            }

            match event {
                SourceEvent::Snapshot { source, snapshot } => {
                    self.apply(&mut state, source, snapshot)
                }
                SourceEvent::PollFailed { attempt, error } => {
                    log_debug!(
                        "Job {}: poll {} failed transiently: {}",
                        state.record.id,
                        attempt,
                        error
                    );
                    (ControlFlow::Continue(()), None)
                }
                SourceEvent::ChannelError(error) => {
                    log_warn!(
                        "Job {}: push channel unavailable ({}), continuing with polling",
                        state.record.id,
                        error
                    );
                    (ControlFlow::Break(()), None)
                }
                SourceEvent::Fatal { source, error } => {
                    match ErrorDetail::from_error(&state.record.id, &error) {
                        Some(detail) => {
                            let snapshot = JobSnapshot::failed(state.record.id.clone(), detail);
                            self.apply(&mut state, source, snapshot)
                        }
                        None => {
                            log_warn!(
                                "Job {}: ignoring {} error: {}",
                                state.record.id,
                                source,
                                error
                            );
                            (ControlFlow::Continue(()), None)
                        }
                    }
                }
                SourceEvent::CeilingReached { attempts } => {
                    let snapshot =
                        JobSnapshot::failed(state.record.id.clone(), ErrorDetail::timeout(attempts));
                    self.apply(&mut state, SnapshotSource::Poll, snapshot)
                }
            }
        };

        if let Some((job_id, retirement)) = retired {
            self.notify_retired(&job_id, retirement);
        }
        flow
    }

    fn apply(
        &self,
        state: &mut TrackerState,
        source: SnapshotSource,
        snapshot: JobSnapshot,
    ) -> (ControlFlow<()>, Option<(JobId, Retirement)>) {
        if snapshot.job_id != state.record.id {
            log_debug!(
                "Job {}: dropping {} snapshot for {}",
                state.record.id,
                source,
                snapshot.job_id
            );
            return (ControlFlow::Continue(()), None);
        }

        let transition = StateMachine::accept(&mut state.record, snapshot);
        if source == SnapshotSource::Push && transition.confirms_liveness() {
            self.attempts.reset();
        }

        match transition {
            Transition::Advanced { from, to } => {
                log_debug!(
                    "Job {}: {} -> {} (via {})",
                    state.record.id,
                    from,
                    to,
                    source
                );
                self.refresh_counters(state);
                let update = JobUpdate::from_record(&state.record);

                if !to.is_terminal() {
                    self.publish(state, update);
                    return (ControlFlow::Continue(()), None);
                }

                let retirement = match (to, &state.record.error) {
                    (JobState::Done, _) => Retirement::Done,
                    (_, Some(error)) => Retirement::Failed(error.kind),
                    (_, None) => Retirement::Failed(FailureKind::JobReportedFailure),
                };
                // Replacing the phase drops the sources before anyone hears
                // about the terminal state.
                state.phase = Phase::Retired(retirement);
                self.publish(state, update);
                log_info!("Job {} finished: {:?}", state.record.id, retirement);

                (
                    ControlFlow::Break(()),
                    Some((state.record.id.clone(), retirement)),
                )
            }
            Transition::Stale { current, offered } => {
                log_debug!(
                    "Job {}: discarding stale {} snapshot ({} after {})",
                    state.record.id,
                    source,
                    offered,
                    current
                );
                (ControlFlow::Continue(()), None)
            }
            Transition::Unchanged => (ControlFlow::Continue(()), None),
            Transition::Closed => (ControlFlow::Break(()), None),
        }
    }
}

/// Routes source events of one run into its tracker
struct TrackerSink {
    tracker: Weak<TrackerInner>,
    generation: u64,
}

impl SnapshotSink for TrackerSink {
    fn on_event(&self, event: SourceEvent) -> ControlFlow<()> {
        match self.tracker.upgrade() {
            Some(inner) => inner.handle_event(self.generation, event),
            None => ControlFlow::Break(()),
        }
    }
}
