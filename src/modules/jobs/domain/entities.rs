/// Domain entities for job tracking
///
/// A job lives on a backend we do not control. These types describe what the
/// client knows about it: the identity it was given, the latest accepted
/// state, and whatever result or error the backend reported.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::value_objects::JobState;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::Validator;

/// Opaque backend-assigned job identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> AppResult<Self> {
        let id = id.into();
        Validator::validate_job_id(&id)?;
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobId {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        JobId::new(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which backend feature produced the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Transcription,
    Analysis,
    VideoGeneration,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Transcription => write!(f, "transcription"),
            JobKind::Analysis => write!(f, "analysis"),
            JobKind::VideoGeneration => write!(f, "video_generation"),
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "transcription" => Ok(JobKind::Transcription),
            "analysis" => Ok(JobKind::Analysis),
            "video_generation" | "video" => Ok(JobKind::VideoGeneration),
            _ => Err(format!("Invalid job kind: {}", s)),
        }
    }
}

/// Failure categories that can end a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    JobReportedFailure,
    Timeout,
    NotFound,
}

/// Structured error carried by a failed job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: FailureKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn reported(message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.trim().is_empty() {
            "The job failed without giving a reason".to_string()
        } else {
            message
        };
        Self {
            kind: FailureKind::JobReportedFailure,
            message,
        }
    }

    pub fn timeout(attempts: u32) -> Self {
        Self {
            kind: FailureKind::Timeout,
            message: format!(
                "This job is taking unusually long (no result after {} status checks). \
                 It may still finish; you can retry or check back later.",
                attempts
            ),
        }
    }

    pub fn not_found(job_id: &JobId) -> Self {
        Self {
            kind: FailureKind::NotFound,
            message: format!("Job {} no longer exists on the server", job_id),
        }
    }

    /// Build the detail for an error that ends a job. Errors that never end a
    /// job (transport failures and the like) return `None`.
    pub fn from_error(job_id: &JobId, error: &AppError) -> Option<Self> {
        match error.failure_kind()? {
            FailureKind::NotFound => Some(Self::not_found(job_id)),
            FailureKind::JobReportedFailure | FailureKind::Timeout => None,
        }
    }
}

/// Where a snapshot came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    Push,
    Poll,
    Manual,
}

impl std::fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotSource::Push => write!(f, "push"),
            SnapshotSource::Poll => write!(f, "poll"),
            SnapshotSource::Manual => write!(f, "manual"),
        }
    }
}

/// One authoritative reading of a job's state from the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub state: JobState,
    pub error: Option<ErrorDetail>,
    pub result: Option<serde_json::Value>,
    pub observed_at: DateTime<Utc>,
}

impl JobSnapshot {
    pub fn new(job_id: JobId, state: JobState) -> Self {
        let error = (state == JobState::Failed).then(|| ErrorDetail::reported(""));
        Self {
            job_id,
            state,
            error,
            result: None,
            observed_at: Utc::now(),
        }
    }

    pub fn done(job_id: JobId, result: Option<serde_json::Value>) -> Self {
        Self {
            result,
            ..Self::new(job_id, JobState::Done)
        }
    }

    pub fn failed(job_id: JobId, error: ErrorDetail) -> Self {
        Self {
            error: Some(error),
            ..Self::new(job_id, JobState::Failed)
        }
    }

    /// Drop fields that do not belong to the snapshot's state, and make sure
    /// a failure always has a message.
    pub fn normalized(mut self) -> Self {
        match self.state {
            JobState::Done => self.error = None,
            JobState::Failed => {
                self.result = None;
                if self.error.is_none() {
                    self.error = Some(ErrorDetail::reported(""));
                }
            }
            _ => {
                self.error = None;
                self.result = None;
            }
        }
        self
    }
}

/// Client-side view of one tracked job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub attempt: u32,
    pub taking_long: bool,
    pub tracked_since: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
    pub error: Option<ErrorDetail>,
    pub result: Option<serde_json::Value>,
}

impl JobRecord {
    pub fn new(id: JobId, kind: JobKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            state: JobState::Queued,
            attempt: 0,
            taking_long: false,
            tracked_since: now,
            last_observed_at: now,
            error: None,
            result: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// What accompanies a published update besides the state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum UpdateDetail {
    None,
    Result(Option<serde_json::Value>),
    Error(ErrorDetail),
    /// Tracking stopped on request; the job itself may still be running.
    Cancelled,
}

/// A status change delivered to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub job_id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub attempt: u32,
    pub taking_long: bool,
    pub detail: UpdateDetail,
    pub observed_at: DateTime<Utc>,
}

impl JobUpdate {
    pub fn from_record(record: &JobRecord) -> Self {
        let detail = match record.state {
            JobState::Done => UpdateDetail::Result(record.result.clone()),
            JobState::Failed => match &record.error {
                Some(error) => UpdateDetail::Error(error.clone()),
                None => UpdateDetail::Error(ErrorDetail::reported("")),
            },
            _ => UpdateDetail::None,
        };

        Self {
            job_id: record.id.clone(),
            kind: record.kind,
            state: record.state,
            attempt: record.attempt,
            taking_long: record.taking_long,
            detail,
            observed_at: record.last_observed_at,
        }
    }

    pub fn cancelled(record: &JobRecord) -> Self {
        Self {
            detail: UpdateDetail::Cancelled,
            observed_at: Utc::now(),
            ..Self::from_record(record)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.detail, UpdateDetail::Cancelled)
    }

    /// Terminal or cancelled: nothing else will be published for this run.
    pub fn is_final(&self) -> bool {
        self.state.is_terminal() || self.is_cancelled()
    }

    pub fn error(&self) -> Option<&ErrorDetail> {
        match &self.detail {
            UpdateDetail::Error(error) => Some(error),
            _ => None,
        }
    }
}
