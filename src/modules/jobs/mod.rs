/// Job status tracking
///
/// Follows jobs that run on a remote backend until they finish, merging a
/// push subscription and a polling fallback into one ordered update stream.
///
/// Architecture:
/// - Domain: job model, state ordering and the backend ports
/// - Application: trackers, their two sources and the registry
/// - Infrastructure: REST and WebSocket adapters for the ports
/// - Commands: the surface the UI layer calls
pub mod application;
pub mod commands;
pub mod domain;
pub mod infrastructure;

// Re-exports for easy access
pub use application::{
    BackoffScheduler, JobSubscription, JobTracker, RegistryStatistics, Retirement, TrackerConfig,
    TrackerContext, TrackerRegistry,
};
pub use domain::{
    entities::{
        ErrorDetail, FailureKind, JobId, JobKind, JobRecord, JobSnapshot, JobUpdate,
        UpdateDetail,
    },
    backend::{JobBackend, PushSource},
    value_objects::{JobState, StatusVocabulary},
};
pub use infrastructure::{DisabledPushSource, HttpJobBackend, WebSocketPushSource};
