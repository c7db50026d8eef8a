/// Application configuration loaded from the environment
///
/// Values come from process environment variables, with a `.env` file
/// picked up by `dotenvy` when present.
use crate::shared::errors::{AppError, AppResult};
use crate::shared::utils::Validator;
use std::time::Duration;

pub const ENV_API_URL: &str = "JOBWATCH_API_URL";
pub const ENV_PUSH_URL: &str = "JOBWATCH_PUSH_URL";
pub const ENV_API_KEY: &str = "JOBWATCH_API_KEY";
pub const ENV_MAX_POLL_ATTEMPTS: &str = "JOBWATCH_MAX_POLL_ATTEMPTS";
pub const ENV_SLOW_AFTER_ATTEMPTS: &str = "JOBWATCH_SLOW_AFTER_ATTEMPTS";
pub const ENV_REQUESTS_PER_SECOND: &str = "JOBWATCH_REQUESTS_PER_SECOND";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "JOBWATCH_REQUEST_TIMEOUT_SECS";
pub const ENV_PUSH_ACK_TIMEOUT_SECS: &str = "JOBWATCH_PUSH_ACK_TIMEOUT_SECS";
pub const ENV_UPDATE_BUFFER: &str = "JOBWATCH_UPDATE_BUFFER";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Base URL of the job REST API
    pub api_url: String,
    /// WebSocket endpoint for job change notifications. Poll-only when unset.
    pub push_url: Option<String>,
    /// Bearer token sent with every backend request
    pub api_key: Option<String>,
    pub max_poll_attempts: u32,
    /// Attempts after which a job is flagged as taking long
    pub slow_after_attempts: u32,
    /// Shared request budget for all trackers
    pub requests_per_second: u32,
    pub request_timeout: Duration,
    pub push_ack_timeout: Duration,
    /// Per-tracker buffer of undelivered updates
    pub update_buffer: usize,
}

impl AppConfig {
    pub fn from_env() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_url = get(ENV_API_URL).ok_or_else(|| {
            AppError::InvalidInput(format!("{} must be set", ENV_API_URL))
        })?;
        Validator::validate_base_url(ENV_API_URL, &api_url)?;

        let push_url = get(ENV_PUSH_URL);
        if let Some(url) = &push_url {
            Validator::validate_base_url(ENV_PUSH_URL, url)?;
        }

        let defaults = Self::defaults(api_url);
        let config = Self {
            push_url,
            api_key: get(ENV_API_KEY),
            max_poll_attempts: parse_or(get(ENV_MAX_POLL_ATTEMPTS), ENV_MAX_POLL_ATTEMPTS, defaults.max_poll_attempts)?,
            slow_after_attempts: parse_or(get(ENV_SLOW_AFTER_ATTEMPTS), ENV_SLOW_AFTER_ATTEMPTS, defaults.slow_after_attempts)?,
            requests_per_second: parse_or(get(ENV_REQUESTS_PER_SECOND), ENV_REQUESTS_PER_SECOND, defaults.requests_per_second)?,
            request_timeout: Duration::from_secs(parse_or(
                get(ENV_REQUEST_TIMEOUT_SECS),
                ENV_REQUEST_TIMEOUT_SECS,
                defaults.request_timeout.as_secs(),
            )?),
            push_ack_timeout: Duration::from_secs(parse_or(
                get(ENV_PUSH_ACK_TIMEOUT_SECS),
                ENV_PUSH_ACK_TIMEOUT_SECS,
                defaults.push_ack_timeout.as_secs(),
            )?),
            update_buffer: parse_or(get(ENV_UPDATE_BUFFER), ENV_UPDATE_BUFFER, defaults.update_buffer)?,
            ..defaults
        };

        Validator::validate_positive(ENV_MAX_POLL_ATTEMPTS, config.max_poll_attempts)?;
        Validator::validate_positive(ENV_REQUESTS_PER_SECOND, config.requests_per_second)?;
        if config.update_buffer == 0 {
            return Err(AppError::InvalidInput(format!(
                "{} must be greater than zero",
                ENV_UPDATE_BUFFER
            )));
        }

        Ok(config)
    }

    /// Defaults for everything except the API URL
    pub fn defaults(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            push_url: None,
            api_key: None,
            max_poll_attempts: 60,
            slow_after_attempts: 15,
            requests_per_second: 5,
            request_timeout: Duration::from_secs(15),
            push_ack_timeout: Duration::from_secs(10),
            update_buffer: 64,
        }
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw
            .parse()
            .map_err(|e| AppError::InvalidInput(format!("{}='{}': {}", key, raw, e))),
        None => Ok(default),
    }
}
