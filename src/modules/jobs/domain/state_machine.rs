/// Ordering filter applied to every snapshot before it reaches subscribers.
///
/// The tracker keeps the most advanced state it has seen. A snapshot that
/// would move the job backwards is stale and gets dropped, which makes the
/// merge of push and poll deliveries independent of arrival order.
use super::entities::{JobKind, JobRecord, JobSnapshot};
use super::value_objects::JobState;

/// Outcome of offering a snapshot to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The state moved forward; the record was updated and must be published.
    Advanced { from: JobState, to: JobState },
    /// Same state as before; only the observation time was refreshed.
    Unchanged,
    /// Older than what was already observed; ignored.
    Stale { current: JobState, offered: JobState },
    /// The record is already terminal.
    Closed,
}

impl Transition {
    /// The snapshot confirmed the current state or moved past it.
    pub fn confirms_liveness(&self) -> bool {
        matches!(self, Transition::Advanced { .. } | Transition::Unchanged)
    }
}

pub struct StateMachine;

impl StateMachine {
    /// `Transcribing` only exists for transcription jobs; other kinds report
    /// it as plain processing.
    pub fn effective_state(kind: JobKind, state: JobState) -> JobState {
        match (kind, state) {
            (JobKind::Transcription, state) => state,
            (_, JobState::Transcribing) => JobState::Processing,
            (_, state) => state,
        }
    }

    /// Apply `snapshot` to `record` if it moves the job forward.
    pub fn accept(record: &mut JobRecord, snapshot: JobSnapshot) -> Transition {
        if record.is_terminal() {
            return Transition::Closed;
        }

        let snapshot = snapshot.normalized();
        let offered = Self::effective_state(record.kind, snapshot.state);
        let current = record.state;

        if offered.rank() < current.rank() {
            return Transition::Stale { current, offered };
        }

        record.last_observed_at = snapshot.observed_at.max(record.last_observed_at);

        if offered == current {
            return Transition::Unchanged;
        }

        record.state = offered;
        match offered {
            JobState::Done => {
                record.result = snapshot.result;
                record.error = None;
            }
            JobState::Failed => {
                record.result = None;
                record.error = snapshot.error;
            }
            _ => {}
        }

        Transition::Advanced {
            from: current,
            to: offered,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::jobs::domain::entities::{ErrorDetail, JobId};

    fn record(kind: JobKind) -> JobRecord {
        JobRecord::new(JobId::new("job-1").unwrap(), kind)
    }

    fn snapshot(state: JobState) -> JobSnapshot {
        JobSnapshot::new(JobId::new("job-1").unwrap(), state)
    }

    #[test]
    fn test_advances_forward() {
        let mut record = record(JobKind::Analysis);
        let transition = StateMachine::accept(&mut record, snapshot(JobState::Processing));
        assert_eq!(
            transition,
            Transition::Advanced {
                from: JobState::Queued,
                to: JobState::Processing
            }
        );
        assert_eq!(record.state, JobState::Processing);
    }

    #[test]
    fn test_discards_regression() {
        let mut record = record(JobKind::Analysis);
        StateMachine::accept(&mut record, snapshot(JobState::Processing));
        let transition = StateMachine::accept(&mut record, snapshot(JobState::Queued));
        assert_eq!(
            transition,
            Transition::Stale {
                current: JobState::Processing,
                offered: JobState::Queued
            }
        );
        assert_eq!(record.state, JobState::Processing);
    }

    #[test]
    fn test_same_state_is_unchanged() {
        let mut record = record(JobKind::Analysis);
        assert_eq!(
            StateMachine::accept(&mut record, snapshot(JobState::Queued)),
            Transition::Unchanged
        );
    }

    #[test]
    fn test_skipping_states_is_allowed() {
        let mut record = record(JobKind::VideoGeneration);
        let transition = StateMachine::accept(
            &mut record,
            JobSnapshot::done(JobId::new("job-1").unwrap(), Some(serde_json::json!("v.mp4"))),
        );
        assert!(matches!(transition, Transition::Advanced { .. }));
        assert_eq!(record.result, Some(serde_json::json!("v.mp4")));
        assert!(record.error.is_none());
    }

    #[test]
    fn test_terminal_record_is_closed() {
        let mut record = record(JobKind::Analysis);
        StateMachine::accept(
            &mut record,
            JobSnapshot::failed(JobId::new("job-1").unwrap(), ErrorDetail::reported("bad input")),
        );
        assert_eq!(record.state, JobState::Failed);
        assert_eq!(
            StateMachine::accept(&mut record, snapshot(JobState::Done)),
            Transition::Closed
        );
        assert_eq!(record.state, JobState::Failed);
        assert!(record.result.is_none());
    }

    #[test]
    fn test_transcribing_only_for_transcription_jobs() {
        let mut analysis = record(JobKind::Analysis);
        StateMachine::accept(&mut analysis, snapshot(JobState::Transcribing));
        assert_eq!(analysis.state, JobState::Processing);

        let mut transcription = record(JobKind::Transcription);
        StateMachine::accept(&mut transcription, snapshot(JobState::Processing));
        StateMachine::accept(&mut transcription, snapshot(JobState::Transcribing));
        assert_eq!(transcription.state, JobState::Transcribing);
        assert!(matches!(
            StateMachine::accept(&mut transcription, snapshot(JobState::Processing)),
            Transition::Stale { .. }
        ));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let states = [
            JobState::Processing,
            JobState::Queued,
            JobState::Transcribing,
            JobState::Processing,
        ];

        // Every rotation of the same deliveries ends in the same state, and
        // the accepted states never go backwards.
        for offset in 0..states.len() {
            let mut record = record(JobKind::Transcription);
            let mut last_rank = record.state.rank();
            for i in 0..states.len() {
                let state = states[(i + offset) % states.len()];
                let transition = StateMachine::accept(&mut record, snapshot(state));
                if matches!(transition, Transition::Advanced { .. }) {
                    assert!(record.state.rank() > last_rank);
                    last_rank = record.state.rank();
                }
            }
            assert_eq!(record.state, JobState::Transcribing);
        }
    }
}
