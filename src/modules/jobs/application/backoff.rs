//! Poll pacing for tracked jobs
//!
//! Delays grow in tiers as a job keeps running, and a hard attempt ceiling
//! turns a backend that never finishes into a bounded failure.

use crate::shared::errors::{AppError, AppResult};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Delay used for every attempt below `until_attempt`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffTier {
    pub until_attempt: u32,
    pub delay: Duration,
}

/// Tiered delay schedule plus the attempt ceiling
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    /// Sorted by `until_attempt`, delays non-decreasing
    tiers: Vec<BackoffTier>,
    /// Delay once every tier is exhausted
    max_delay: Duration,
    /// Poll attempts allowed before giving up
    max_attempts: u32,
}

impl BackoffScheduler {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;

    /// 5s for attempts 0-4, 10s for 5-14, 30s for 15-29, then 60s.
    pub fn standard() -> Self {
        Self {
            tiers: vec![
                BackoffTier {
                    until_attempt: 5,
                    delay: Duration::from_secs(5),
                },
                BackoffTier {
                    until_attempt: 15,
                    delay: Duration::from_secs(10),
                },
                BackoffTier {
                    until_attempt: 30,
                    delay: Duration::from_secs(30),
                },
            ],
            max_delay: Duration::from_secs(60),
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Build a custom schedule. Tiers must be ordered and their delays must
    /// not shrink, so the schedule stays monotonic.
    pub fn new(tiers: Vec<BackoffTier>, max_delay: Duration, max_attempts: u32) -> AppResult<Self> {
        if max_attempts == 0 {
            return Err(AppError::InvalidInput(
                "max_attempts must be greater than zero".to_string(),
            ));
        }

        let mut previous: Option<&BackoffTier> = None;
        for tier in &tiers {
            if let Some(prev) = previous {
                if tier.until_attempt <= prev.until_attempt || tier.delay < prev.delay {
                    return Err(AppError::InvalidInput(format!(
                        "Backoff tiers must be increasing: {:?} follows {:?}",
                        tier, prev
                    )));
                }
            }
            previous = Some(tier);
        }

        if let Some(last) = tiers.last() {
            if max_delay < last.delay {
                return Err(AppError::InvalidInput(format!(
                    "max_delay {:?} is shorter than the last tier {:?}",
                    max_delay, last.delay
                )));
            }
        }

        Ok(Self {
            tiers,
            max_delay,
            max_attempts,
        })
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> AppResult<Self> {
        if max_attempts == 0 {
            return Err(AppError::InvalidInput(
                "max_attempts must be greater than zero".to_string(),
            ));
        }
        self.max_attempts = max_attempts;
        Ok(self)
    }

    /// Delay before the poll that follows `attempt`
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.tiers
            .iter()
            .find(|tier| attempt < tier.until_attempt)
            .map(|tier| tier.delay)
            .unwrap_or(self.max_delay)
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn ceiling_reached(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for BackoffScheduler {
    fn default() -> Self {
        Self::standard()
    }
}

/// Per-job poll counter shared by the tracker and its poll worker
#[derive(Debug, Clone, Default)]
pub struct AttemptCounter {
    inner: Arc<AtomicU32>,
}

impl AttemptCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one finished poll cycle and return the new total.
    pub fn record_poll(&self) -> u32 {
        self.inner.fetch_add(1, Ordering::SeqCst).saturating_add(1)
    }

    pub fn current(&self) -> u32 {
        self.inner.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.inner.store(0, Ordering::SeqCst);
    }
}
