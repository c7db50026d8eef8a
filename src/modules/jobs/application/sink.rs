use crate::modules::jobs::domain::entities::{JobSnapshot, SnapshotSource};
use crate::shared::errors::AppError;
use std::ops::ControlFlow;

/// Everything a snapshot source can report to its tracker
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Snapshot {
        source: SnapshotSource,
        snapshot: JobSnapshot,
    },
    /// A poll cycle failed in a way the next cycle may fix.
    PollFailed { attempt: u32, error: AppError },
    /// The backend answered with an error that ends the job (e.g. unknown id).
    Fatal {
        source: SnapshotSource,
        error: AppError,
    },
    /// The push subscription could not be opened or broke. Sent at most once.
    ChannelError(AppError),
    /// The poll worker used up its attempts without seeing a terminal state.
    CeilingReached { attempts: u32 },
}

/// Receiver of source events. `Break` tells the source to stop.
pub trait SnapshotSink: Send + Sync + 'static {
    fn on_event(&self, event: SourceEvent) -> ControlFlow<()>;
}
