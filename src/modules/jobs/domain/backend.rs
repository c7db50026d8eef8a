/// Ports to the job backend
///
/// The tracker never looks inside a job. Everything it knows comes through
/// these two traits: request/response reads and an optional change feed.
use super::entities::{JobId, JobKind, JobSnapshot};
use crate::shared::errors::AppResult;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Request/response operations against the backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Fetch the authoritative state of a job
    async fn fetch_snapshot(&self, job_id: &JobId) -> AppResult<JobSnapshot>;

    /// Ask the backend to stop working on a job
    async fn request_cancellation(&self, job_id: &JobId) -> AppResult<()>;

    /// Resubmit a failed or abandoned job. Returns the id of the new run.
    async fn resubmit(&self, job_id: &JobId, kind: JobKind) -> AppResult<JobId>;

    /// Submit new work
    async fn start_job(&self, kind: JobKind, params: serde_json::Value) -> AppResult<JobId>;
}

/// Stream of pushed snapshots. An `Err` item means the channel broke.
pub type PushStream = BoxStream<'static, AppResult<JobSnapshot>>;

/// Subscribe-by-id change notifications
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushSource: Send + Sync {
    /// Open a subscription. Fails if the backend does not acknowledge it.
    async fn subscribe(&self, job_id: &JobId) -> AppResult<PushStream>;
}
