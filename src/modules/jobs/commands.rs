use super::application::registry::{RegistryStatistics, TrackerRegistry};
use super::application::subscription::JobSubscription;
use super::domain::entities::{JobId, JobKind, JobRecord, JobUpdate};

use crate::{log_debug, log_error, log_info};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackJobRequest {
    pub job_id: String,
    pub kind: JobKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIdRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartJobRequest {
    pub kind: JobKind,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryJobResponse {
    pub previous_job_id: JobId,
    pub job_id: JobId,
}

fn parse_job_id(raw: &str) -> Result<JobId, String> {
    JobId::new(raw).map_err(|e| e.to_string())
}

/// Start tracking a job and return its current update.
pub async fn track_job(
    request: TrackJobRequest,
    registry: &TrackerRegistry,
) -> Result<JobUpdate, String> {
    let job_id = parse_job_id(&request.job_id)?;
    log_debug!("track_job command called - job: {}, kind: {}", job_id, request.kind);

    Ok(registry.track(job_id, request.kind).current())
}

/// Start tracking a job and hand back its update stream.
pub async fn subscribe_job(
    request: TrackJobRequest,
    registry: &TrackerRegistry,
) -> Result<JobSubscription, String> {
    let job_id = parse_job_id(&request.job_id)?;
    Ok(registry.watch(job_id, request.kind))
}

pub async fn start_job(
    request: StartJobRequest,
    registry: &TrackerRegistry,
) -> Result<JobUpdate, String> {
    registry
        .start_and_track(request.kind, request.params)
        .await
        .map(|tracker| tracker.current())
        .map_err(|e| e.to_string())
}

/// Stop tracking a job. The backend keeps working on it.
pub async fn cancel_job(request: JobIdRequest, registry: &TrackerRegistry) -> Result<(), String> {
    let job_id = parse_job_id(&request.job_id)?;
    registry.cancel(&job_id).map_err(|e| e.to_string())
}

/// Cancel the job on the backend, then stop tracking it.
pub async fn cancel_job_on_backend(
    request: JobIdRequest,
    registry: &TrackerRegistry,
) -> Result<(), String> {
    let job_id = parse_job_id(&request.job_id)?;

    let result = registry
        .cancel_on_backend(&job_id)
        .await
        .map_err(|e| e.to_string());

    match &result {
        Ok(_) => log_info!("Job {} cancelled on backend", job_id),
        Err(e) => log_error!("Failed to cancel job {} on backend: {}", job_id, e),
    }

    result
}

pub async fn retry_job(
    request: JobIdRequest,
    registry: &TrackerRegistry,
) -> Result<RetryJobResponse, String> {
    let previous_job_id = parse_job_id(&request.job_id)?;

    let job_id = registry
        .retry(&previous_job_id)
        .await
        .map_err(|e| e.to_string())?;

    Ok(RetryJobResponse {
        previous_job_id,
        job_id,
    })
}

/// Fetch the job's state right away, outside its poll schedule.
pub async fn refresh_job(
    request: JobIdRequest,
    registry: &TrackerRegistry,
) -> Result<JobUpdate, String> {
    let job_id = parse_job_id(&request.job_id)?;

    let tracker = registry
        .get(&job_id)
        .ok_or_else(|| format!("Job {} is not being tracked", job_id))?;

    tracker.refresh_now().await.map_err(|e| e.to_string())
}

pub async fn list_jobs(registry: &TrackerRegistry) -> Result<Vec<JobRecord>, String> {
    Ok(registry.list())
}

pub async fn get_job_statistics(registry: &TrackerRegistry) -> Result<RegistryStatistics, String> {
    Ok(registry.statistics())
}
