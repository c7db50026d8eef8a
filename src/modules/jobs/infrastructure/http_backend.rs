//! REST implementation of the job backend
//!
//! All trackers share one client and one rate limiter, so a registry with
//! many live jobs cannot flood the API no matter how their poll schedules
//! line up.

use super::models::{JobCreatedDto, JobStatusDto, StartJobRequestDto};
use crate::modules::jobs::domain::backend::JobBackend;
use crate::modules::jobs::domain::entities::{JobId, JobKind, JobSnapshot};
use crate::modules::jobs::domain::value_objects::StatusVocabulary;
use crate::shared::config::AppConfig;
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::logger::{LogContext, TimedOperation};
use async_trait::async_trait;
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use reqwest::{Client, RequestBuilder, Response};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectRateLimiter = GovernorRateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
    governor::middleware::NoOpMiddleware,
>;

pub struct HttpJobBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_limiter: DirectRateLimiter,
    vocabulary: Arc<StatusVocabulary>,
}

impl HttpJobBackend {
    pub fn new(config: &AppConfig, vocabulary: Arc<StatusVocabulary>) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("jobwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::InternalError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            rate_limiter: Self::create_rate_limiter(config.requests_per_second)?,
            vocabulary,
        })
    }

    /// Steady rate with a burst of the same size, so a batch of freshly
    /// tracked jobs gets its first fetch without queueing.
    fn create_rate_limiter(requests_per_second: u32) -> AppResult<DirectRateLimiter> {
        let rate = NonZeroU32::new(requests_per_second).ok_or_else(|| {
            AppError::InvalidInput("Request rate must be greater than zero".to_string())
        })?;
        Ok(GovernorRateLimiter::direct(Quota::per_second(rate)))
    }

    fn job_url(&self, job_id: &JobId, action: Option<&str>) -> String {
        let id = urlencoding::encode(job_id.as_str());
        match action {
            Some(action) => format!("{}/jobs/{}/{}", self.base_url, id, action),
            None => format!("{}/jobs/{}", self.base_url, id),
        }
    }

    async fn send(&self, request: RequestBuilder) -> AppResult<Response> {
        self.rate_limiter.until_ready().await;

        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };

        let response = request.send().await?;
        Ok(response.error_for_status()?)
    }

    fn created_id(dto: JobCreatedDto) -> AppResult<JobId> {
        JobId::new(dto.id)
            .map_err(|e| AppError::ApiError(format!("Backend returned an unusable job id: {}", e)))
    }
}

#[async_trait]
impl JobBackend for HttpJobBackend {
    async fn fetch_snapshot(&self, job_id: &JobId) -> AppResult<JobSnapshot> {
        let timer = TimedOperation::new("fetch_job_snapshot");
        LogContext::backend_call("fetch", job_id.as_str(), "started", None);

        let response = self.send(self.client.get(self.job_url(job_id, None))).await;
        let mut dto: JobStatusDto = match response {
            Ok(response) => response.json().await?,
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "status fetch failed");
                return Err(e);
            }
        };

        if dto.id.is_empty() {
            dto.id = job_id.to_string();
        }
        let snapshot = dto.into_snapshot(&self.vocabulary)?;

        let elapsed = timer.finish_with_info(job_id.as_str());
        LogContext::backend_call("fetch", job_id.as_str(), &snapshot.state.to_string(), Some(elapsed));
        Ok(snapshot)
    }

    async fn request_cancellation(&self, job_id: &JobId) -> AppResult<()> {
        self.send(self.client.post(self.job_url(job_id, Some("cancel"))))
            .await?;
        tracing::info!(job_id = %job_id, "backend cancellation requested");
        Ok(())
    }

    async fn resubmit(&self, job_id: &JobId, kind: JobKind) -> AppResult<JobId> {
        let body = serde_json::json!({ "kind": kind });
        let dto: JobCreatedDto = self
            .send(self.client.post(self.job_url(job_id, Some("retry"))).json(&body))
            .await?
            .json()
            .await?;

        let new_id = Self::created_id(dto)?;
        tracing::info!(job_id = %job_id, new_job_id = %new_id, "job resubmitted");
        Ok(new_id)
    }

    async fn start_job(&self, kind: JobKind, params: serde_json::Value) -> AppResult<JobId> {
        let body = StartJobRequestDto { kind, params };
        let dto: JobCreatedDto = self
            .send(self.client.post(format!("{}/jobs", self.base_url)).json(&body))
            .await?
            .json()
            .await?;

        Self::created_id(dto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(api_url: &str) -> HttpJobBackend {
        HttpJobBackend::new(
            &AppConfig::defaults(api_url),
            Arc::new(StatusVocabulary::default()),
        )
        .unwrap()
    }

    #[test]
    fn test_job_urls() {
        let backend = backend("https://api.example.com/v1/");
        let id = JobId::new("video 7/a").unwrap();
        assert_eq!(
            backend.job_url(&id, None),
            "https://api.example.com/v1/jobs/video%207%2Fa"
        );
        assert_eq!(
            backend.job_url(&id, Some("cancel")),
            "https://api.example.com/v1/jobs/video%207%2Fa/cancel"
        );
    }

    #[test]
    fn test_zero_rate_is_rejected() {
        let mut config = AppConfig::defaults("http://localhost");
        config.requests_per_second = 0;
        let result = HttpJobBackend::new(&config, Arc::new(StatusVocabulary::default()));
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_transient() {
        let backend = backend("http://127.0.0.1:9");
        let err = backend
            .fetch_snapshot(&JobId::new("a-1").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
