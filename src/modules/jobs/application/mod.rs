pub mod backoff;
pub mod config;
pub mod poll_worker;
pub mod push_channel;
pub mod registry;
pub mod sink;
pub mod subscription;
pub mod tracker;

pub use backoff::{AttemptCounter, BackoffScheduler, BackoffTier};
pub use config::TrackerConfig;
pub use poll_worker::{PollHandle, PollWorker};
pub use push_channel::{PushChannel, PushHandle};
pub use registry::{RegistryStatistics, TrackerRegistry};
pub use sink::{SnapshotSink, SourceEvent};
pub use subscription::JobSubscription;
pub use tracker::{JobTracker, RetireHook, Retirement, TrackerContext};
