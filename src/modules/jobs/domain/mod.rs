pub mod backend;
pub mod entities;
pub mod state_machine;
pub mod value_objects;

pub use backend::{JobBackend, PushSource, PushStream};
pub use entities::{
    ErrorDetail, FailureKind, JobId, JobKind, JobRecord, JobSnapshot, JobUpdate, SnapshotSource,
    UpdateDetail,
};
pub use state_machine::{StateMachine, Transition};
pub use value_objects::{JobState, StatusVocabulary};
