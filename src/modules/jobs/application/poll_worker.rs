/// Polling fallback for one tracked job
///
/// Runs for as long as the job is tracked, whether or not the push channel
/// works. Each cycle fetches the authoritative snapshot, hands it to the
/// sink, then sleeps for the delay the backoff schedule gives for the
/// current attempt count.
use super::backoff::{AttemptCounter, BackoffScheduler};
use super::sink::{SnapshotSink, SourceEvent};
use crate::modules::jobs::domain::backend::JobBackend;
use crate::modules::jobs::domain::entities::{JobId, SnapshotSource};
use crate::{log_debug, log_warn};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct PollWorker {
    backend: Arc<dyn JobBackend>,
    scheduler: BackoffScheduler,
    attempts: AttemptCounter,
}

impl PollWorker {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        scheduler: BackoffScheduler,
        attempts: AttemptCounter,
    ) -> Self {
        Self {
            backend,
            scheduler,
            attempts,
        }
    }

    /// Spawn the poll loop. It stops when `token` is cancelled, when the sink
    /// answers `Break`, or when the attempt ceiling is reached.
    pub fn start(
        self,
        job_id: JobId,
        sink: Arc<dyn SnapshotSink>,
        token: CancellationToken,
    ) -> PollHandle {
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            self.run(job_id, sink, task_token).await;
        });

        PollHandle { token, task }
    }

    async fn run(self, job_id: JobId, sink: Arc<dyn SnapshotSink>, token: CancellationToken) {
        log_debug!("Poll worker started for job {}", job_id);

        loop {
            let fetched = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = self.backend.fetch_snapshot(&job_id) => result,
            };

            let attempt = self.attempts.record_poll();
            let event = match fetched {
                Ok(snapshot) => SourceEvent::Snapshot {
                    source: SnapshotSource::Poll,
                    snapshot,
                },
                Err(error) if error.is_transient() => {
                    log_warn!(
                        "Poll {} for job {} failed ({}), retrying on schedule",
                        attempt,
                        job_id,
                        error
                    );
                    SourceEvent::PollFailed { attempt, error }
                }
                Err(error) => SourceEvent::Fatal {
                    source: SnapshotSource::Poll,
                    error,
                },
            };

            if token.is_cancelled() || sink.on_event(event).is_break() {
                break;
            }

            // Push deliveries may have reset the counter while we were busy.
            let attempts = self.attempts.current();
            if self.scheduler.ceiling_reached(attempts) {
                log_warn!(
                    "Job {} still running after {} polls, giving up",
                    job_id,
                    attempts
                );
                let _ = sink.on_event(SourceEvent::CeilingReached { attempts });
                break;
            }

            // The delay is picked for the attempt just made, before it counted.
            let delay = self.scheduler.next_delay(attempts.saturating_sub(1));
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        log_debug!("Poll worker stopped for job {}", job_id);
    }
}

/// Handle to a running poll loop. Dropping it stops the loop.
pub struct PollHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
