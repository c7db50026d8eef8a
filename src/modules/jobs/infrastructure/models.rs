/// Wire models for the job REST API and the push socket
use crate::modules::jobs::domain::entities::{ErrorDetail, JobId, JobKind, JobSnapshot};
use crate::modules::jobs::domain::value_objects::{JobState, StatusVocabulary};
use crate::shared::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Job status as reported by the backend, over HTTP or in a push frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusDto {
    #[serde(alias = "job_id", default)]
    pub id: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(alias = "state")]
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result: Option<JsonValue>,
}

impl JobStatusDto {
    /// Convert to a domain snapshot. Unknown labels are a decoding error, so
    /// the poll loop treats them as a failed attempt rather than a state.
    pub fn into_snapshot(self, vocabulary: &StatusVocabulary) -> AppResult<JobSnapshot> {
        let state = vocabulary.resolve(&self.status).ok_or_else(|| {
            AppError::SerializationError(format!(
                "Unknown status '{}' for job {}",
                self.status, self.id
            ))
        })?;
        let job_id = JobId::new(self.id)?;

        let snapshot = match state {
            JobState::Done => JobSnapshot::done(job_id, self.result),
            JobState::Failed => {
                let message = self.error_message.or(self.error).unwrap_or_default();
                JobSnapshot::failed(job_id, ErrorDetail::reported(message))
            }
            state => JobSnapshot::new(job_id, state),
        };

        Ok(snapshot)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartJobRequestDto {
    pub kind: JobKind,
    pub params: JsonValue,
}

/// Response to job creation and resubmission
#[derive(Debug, Clone, Deserialize)]
pub struct JobCreatedDto {
    #[serde(alias = "job_id")]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushClientMessage {
    Subscribe {
        job_id: String,
        #[serde(rename = "ref")]
        reference: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushServerMessage {
    Subscribed {
        #[serde(rename = "ref", default)]
        reference: Option<String>,
    },
    JobUpdate(JobStatusDto),
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(alias = "ping")]
    Heartbeat,
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::jobs::domain::entities::FailureKind;

    #[test]
    fn test_status_aliases_resolve() {
        let vocabulary = StatusVocabulary::default();
        let dto: JobStatusDto =
            serde_json::from_str(r#"{"job_id": "v-1", "state": "published", "result": {"url": "x"}}"#)
                .unwrap();

        let snapshot = dto.into_snapshot(&vocabulary).unwrap();
        assert_eq!(snapshot.state, JobState::Done);
        assert_eq!(snapshot.result, Some(serde_json::json!({"url": "x"})));
    }

    #[test]
    fn test_failed_prefers_error_message() {
        let vocabulary = StatusVocabulary::default();
        let dto: JobStatusDto = serde_json::from_str(
            r#"{"id": "a-1", "status": "error", "error": "E42", "error_message": "Model overloaded"}"#,
        )
        .unwrap();

        let snapshot = dto.into_snapshot(&vocabulary).unwrap();
        assert_eq!(snapshot.state, JobState::Failed);
        let error = snapshot.error.unwrap();
        assert_eq!(error.kind, FailureKind::JobReportedFailure);
        assert_eq!(error.message, "Model overloaded");
    }

    #[test]
    fn test_unknown_status_is_transient_error() {
        let dto: JobStatusDto =
            serde_json::from_str(r#"{"id": "a-1", "status": "rendering"}"#).unwrap();
        let err = dto.into_snapshot(&StatusVocabulary::default()).unwrap_err();
        assert!(matches!(err, AppError::SerializationError(_)));
        assert!(err.is_transient());

        let dto: JobStatusDto =
            serde_json::from_str(r#"{"id": "a-1", "status": "rendering"}"#).unwrap();
        let vocabulary = StatusVocabulary::default().with_alias("rendering", JobState::Processing);
        assert_eq!(
            dto.into_snapshot(&vocabulary).unwrap().state,
            JobState::Processing
        );
    }

    #[test]
    fn test_push_frames() {
        let subscribe = PushClientMessage::Subscribe {
            job_id: "t-1".into(),
            reference: "r1".into(),
        };
        assert_eq!(
            serde_json::to_value(&subscribe).unwrap(),
            serde_json::json!({"type": "subscribe", "job_id": "t-1", "ref": "r1"})
        );

        let ack: PushServerMessage =
            serde_json::from_str(r#"{"type": "subscribed", "ref": "r1"}"#).unwrap();
        assert_eq!(
            ack,
            PushServerMessage::Subscribed {
                reference: Some("r1".into())
            }
        );

        let update: PushServerMessage =
            serde_json::from_str(r#"{"type": "job_update", "job_id": "t-1", "status": "transcribing"}"#)
                .unwrap();
        assert!(matches!(update, PushServerMessage::JobUpdate(dto) if dto.status == "transcribing"));

        let other: PushServerMessage = serde_json::from_str(r#"{"type": "presence"}"#).unwrap();
        assert_eq!(other, PushServerMessage::Unknown);
    }
}
