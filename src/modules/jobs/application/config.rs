use super::backoff::BackoffScheduler;
use crate::shared::config::AppConfig;
use crate::shared::errors::AppResult;

/// Tuning shared by every tracker of a registry
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub scheduler: BackoffScheduler,
    /// Attempt count from which updates carry the taking-long hint
    pub slow_after_attempts: u32,
    /// Capacity of each tracker's update channel
    pub update_buffer: usize,
}

impl TrackerConfig {
    pub fn from_app_config(config: &AppConfig) -> AppResult<Self> {
        Ok(Self {
            scheduler: BackoffScheduler::standard().with_max_attempts(config.max_poll_attempts)?,
            slow_after_attempts: config.slow_after_attempts,
            update_buffer: config.update_buffer.max(1),
        })
    }

    pub fn is_taking_long(&self, attempt: u32) -> bool {
        self.slow_after_attempts > 0 && attempt >= self.slow_after_attempts
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            scheduler: BackoffScheduler::standard(),
            slow_after_attempts: 15,
            update_buffer: 64,
        }
    }
}
