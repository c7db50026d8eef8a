use super::subscription::JobSubscription;
use super::tracker::{JobTracker, RetireHook, Retirement, TrackerContext};
use crate::modules::jobs::domain::entities::{JobId, JobKind, JobRecord};
use crate::modules::jobs::domain::value_objects::JobState;
use crate::shared::errors::{AppError, AppResult};
use crate::{log_debug, log_info, log_warn};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::{Arc, Weak};

type TrackerMap = DashMap<JobId, JobTracker>;

/// Set of concurrently tracked jobs, one tracker per job id
///
/// Live trackers are removed as soon as they retire. Failed and cancelled
/// ones are parked so they can be retried until `forget` is called.
pub struct TrackerRegistry {
    context: TrackerContext,
    live: Arc<TrackerMap>,
    retryable: Arc<TrackerMap>,
}

impl TrackerRegistry {
    pub fn new(context: TrackerContext) -> Self {
        Self {
            context,
            live: Arc::new(DashMap::new()),
            retryable: Arc::new(DashMap::new()),
        }
    }

    pub fn context(&self) -> &TrackerContext {
        &self.context
    }

    /// Start tracking a job, or return the tracker already following it.
    pub fn track(&self, job_id: JobId, kind: JobKind) -> JobTracker {
        let tracker = match self.live.entry(job_id.clone()) {
            // Retired but not yet settled by its hook: replace it.
            Entry::Occupied(mut entry) if entry.get().is_retired() => {
                log_debug!("Job {} retired while still listed, tracking again", job_id);
                let tracker = self.start_tracker(job_id.clone(), kind);
                entry.insert(tracker.clone());
                tracker
            }
            Entry::Occupied(entry) => {
                log_debug!("Job {} is already tracked", job_id);
                return entry.get().clone();
            }
            Entry::Vacant(entry) => {
                let tracker = self.start_tracker(job_id.clone(), kind);
                entry.insert(tracker.clone());
                tracker
            }
        };

        self.retryable.remove(&job_id);
        tracker
    }

    /// Track a job and subscribe to it in one step.
    pub fn watch(&self, job_id: JobId, kind: JobKind) -> JobSubscription {
        self.track(job_id, kind).subscribe()
    }

    /// Submit new work to the backend and track it.
    pub async fn start_and_track(
        &self,
        kind: JobKind,
        params: serde_json::Value,
    ) -> AppResult<JobTracker> {
        let job_id = self.context.backend.start_job(kind, params).await?;
        log_info!("Started {} job {}", kind, job_id);
        Ok(self.track(job_id, kind))
    }

    /// Live or retryable tracker for `job_id`
    pub fn get(&self, job_id: &JobId) -> Option<JobTracker> {
        self.live
            .get(job_id)
            .or_else(|| self.retryable.get(job_id))
            .map(|entry| entry.value().clone())
    }

    pub fn is_tracked(&self, job_id: &JobId) -> bool {
        self.live.contains_key(job_id)
    }

    /// Stop tracking locally. The backend job keeps running.
    pub fn cancel(&self, job_id: &JobId) -> AppResult<()> {
        self.live_tracker(job_id)?.cancel()
    }

    /// Ask the backend to cancel the job, then stop tracking it.
    pub async fn cancel_on_backend(&self, job_id: &JobId) -> AppResult<()> {
        let tracker = self.live_tracker(job_id)?;
        self.context.backend.request_cancellation(job_id).await?;

        match tracker.cancel() {
            Err(AppError::InvalidOperation(_)) => {
                log_debug!("Job {} retired before the local cancel", job_id);
                Ok(())
            }
            result => result,
        }
    }

    /// Cancel every live tracker. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let trackers: Vec<JobTracker> = self
            .live
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let cancelled = trackers
            .iter()
            .filter(|tracker| tracker.cancel().is_ok())
            .count();

        if cancelled > 0 {
            log_info!("Cancelled {} tracked jobs", cancelled);
        }
        cancelled
    }

    /// Resubmit a failed or cancelled job and track the new run. Returns the
    /// new job id.
    pub async fn retry(&self, job_id: &JobId) -> AppResult<JobId> {
        let (_, tracker) = self.retryable.remove(job_id).ok_or_else(|| {
            if self.live.contains_key(job_id) {
                AppError::InvalidOperation(format!("Job {} is still being tracked", job_id))
            } else {
                AppError::NotFound(format!("No failed or cancelled job {}", job_id))
            }
        })?;

        match tracker.retry().await {
            Ok(new_id) => {
                self.live.insert(new_id.clone(), tracker.clone());
                // The new run may already have finished before it was listed.
                settle(&self.live, &self.retryable, &new_id);
                Ok(new_id)
            }
            Err(error) => {
                log_warn!("Retry of job {} failed: {}", job_id, error);
                if tracker.is_retired() {
                    self.retryable.insert(job_id.clone(), tracker);
                }
                Err(error)
            }
        }
    }

    /// Drop a parked failed or cancelled job.
    pub fn forget(&self, job_id: &JobId) -> bool {
        self.retryable.remove(job_id).is_some()
    }

    /// Records of all live jobs, oldest first
    pub fn list(&self) -> Vec<JobRecord> {
        let trackers: Vec<JobTracker> = self
            .live
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut records: Vec<JobRecord> = trackers.iter().map(JobTracker::record).collect();
        records.sort_by(|a, b| {
            a.tracked_since
                .cmp(&b.tracked_since)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        records
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let mut stats = RegistryStatistics {
            retryable_jobs: self.retryable.len(),
            ..RegistryStatistics::default()
        };

        for record in self.list() {
            stats.live_jobs += 1;
            match record.state {
                JobState::Queued => stats.queued_jobs += 1,
                JobState::Processing => stats.processing_jobs += 1,
                JobState::Transcribing => stats.transcribing_jobs += 1,
                JobState::Done | JobState::Failed => {}
            }
            if record.taking_long {
                stats.taking_long_jobs += 1;
            }
        }

        stats
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn live_tracker(&self, job_id: &JobId) -> AppResult<JobTracker> {
        self.live
            .get(job_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::NotFound(format!("Job {} is not being tracked", job_id)))
    }

    fn start_tracker(&self, job_id: JobId, kind: JobKind) -> JobTracker {
        JobTracker::start_with_hook(&self.context, job_id, kind, Some(self.retire_hook()))
    }

    fn retire_hook(&self) -> RetireHook {
        let live: Weak<TrackerMap> = Arc::downgrade(&self.live);
        let retryable: Weak<TrackerMap> = Arc::downgrade(&self.retryable);

        Arc::new(move |job_id: &JobId, _retirement: Retirement| {
            if let (Some(live), Some(retryable)) = (live.upgrade(), retryable.upgrade()) {
                settle(&live, &retryable, job_id);
            }
        })
    }
}

impl Drop for TrackerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Move a retired tracker out of the live map. Safe to call more than once,
/// and a live tracker that replaced the retired one under the same id stays.
fn settle(live: &TrackerMap, retryable: &TrackerMap, job_id: &JobId) {
    if let Some((id, tracker)) = live.remove_if(job_id, |_, tracker| tracker.is_retired()) {
        let retirement = tracker.retirement();
        if retirement.map_or(false, |r| r.is_retryable()) {
            retryable.insert(id, tracker);
        }
        log_debug!("Job {} deregistered ({:?})", job_id, retirement);
    }
}

/// Snapshot of the registry for dashboards
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistryStatistics {
    pub live_jobs: usize,
    pub queued_jobs: usize,
    pub processing_jobs: usize,
    pub transcribing_jobs: usize,
    pub taking_long_jobs: usize,
    pub retryable_jobs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::jobs::application::config::TrackerConfig;
    use crate::modules::jobs::domain::backend::{MockJobBackend, MockPushSource};
    use crate::modules::jobs::domain::entities::JobSnapshot;
    use mockall::predicate::eq;
    use std::time::Duration;

    fn registry(backend: MockJobBackend) -> TrackerRegistry {
        let mut push = MockPushSource::new();
        push.expect_subscribe()
            .returning(|_| Err(AppError::BackendUnavailable("no push".into())));
        TrackerRegistry::new(TrackerContext::new(
            Arc::new(backend),
            Arc::new(push),
            TrackerConfig::default(),
        ))
    }

    fn processing_backend() -> MockJobBackend {
        let mut backend = MockJobBackend::new();
        backend
            .expect_fetch_snapshot()
            .returning(|id| Ok(JobSnapshot::new(id.clone(), JobState::Processing)));
        backend
    }

    fn job_id(raw: &str) -> JobId {
        JobId::new(raw).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_on_backend_calls_backend_then_cancels() {
        let mut backend = processing_backend();
        backend
            .expect_request_cancellation()
            .with(eq(job_id("v-1")))
            .times(1)
            .returning(|_| Ok(()));

        let registry = registry(backend);
        let tracker = registry.track(job_id("v-1"), JobKind::VideoGeneration);

        registry.cancel_on_backend(&job_id("v-1")).await.unwrap();
        assert_eq!(tracker.retirement(), Some(Retirement::Cancelled));
        assert!(!registry.is_tracked(&job_id("v-1")));
        assert!(registry.get(&job_id("v-1")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_on_backend_failure_keeps_tracking() {
        let mut backend = processing_backend();
        backend
            .expect_request_cancellation()
            .returning(|_| Err(AppError::ApiError("cannot cancel a published video".into())));

        let registry = registry(backend);
        let tracker = registry.track(job_id("v-2"), JobKind::VideoGeneration);

        let err = registry.cancel_on_backend(&job_id("v-2")).await.unwrap_err();
        assert!(matches!(err, AppError::ApiError(_)));
        assert!(!tracker.is_retired());
        assert!(registry.is_tracked(&job_id("v-2")));
        registry.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_ids_are_not_found() {
        let registry = registry(MockJobBackend::new());
        assert!(matches!(
            registry.cancel(&job_id("nope")),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            registry.retry(&job_id("nope")).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_of_live_job_is_rejected() {
        let registry = registry(processing_backend());
        registry.track(job_id("a-1"), JobKind::Analysis);

        assert!(matches!(
            registry.retry(&job_id("a-1")).await,
            Err(AppError::InvalidOperation(_))
        ));
        registry.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_track() {
        let mut backend = processing_backend();
        backend
            .expect_start_job()
            .times(1)
            .returning(|_, _| Ok(JobId::new("t-9").unwrap()));

        let registry = registry(backend);
        let tracker = registry
            .start_and_track(JobKind::Transcription, serde_json::json!({"media": "a.mp3"}))
            .await
            .unwrap();

        assert_eq!(tracker.id(), job_id("t-9"));
        assert!(registry.is_tracked(&job_id("t-9")));
        registry.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_replaces_retired_tracker_not_yet_settled() {
        let registry = registry(processing_backend());
        let id = job_id("r-1");

        // A tracker that retired before its hook moved it out of the live map.
        let stale = JobTracker::start(registry.context(), id.clone(), JobKind::Analysis);
        stale.cancel().unwrap();
        registry.live.insert(id.clone(), stale.clone());

        let fresh = registry.track(id.clone(), JobKind::Analysis);
        assert!(!fresh.ptr_eq(&stale));
        assert!(!fresh.is_retired());

        // The stale hook firing late must not evict the fresh tracker.
        settle(&registry.live, &registry.retryable, &id);
        assert!(registry.get(&id).unwrap().ptr_eq(&fresh));
        assert!(registry.is_tracked(&id));
        assert_eq!(registry.statistics().retryable_jobs, 0);
        registry.cancel_all();
    }

    #[tokio::test(start_paused = true)]
    async fn test_statistics_and_forget() {
        let registry = registry(processing_backend());
        registry.track(job_id("s-1"), JobKind::Analysis);
        registry.track(job_id("s-2"), JobKind::Analysis);
        tokio::time::sleep(Duration::from_secs(1)).await;

        registry.cancel(&job_id("s-2")).unwrap();
        let stats = registry.statistics();
        assert_eq!(stats.live_jobs, 1);
        assert_eq!(stats.processing_jobs, 1);
        assert_eq!(stats.retryable_jobs, 1);

        assert!(registry.forget(&job_id("s-2")));
        assert!(registry.get(&job_id("s-2")).is_none());
        registry.cancel_all();
    }
}
