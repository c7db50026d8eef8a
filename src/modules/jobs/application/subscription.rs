use crate::log_warn;
use crate::modules::jobs::domain::entities::JobUpdate;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Observer of one tracker's updates
///
/// Yields the update that was current when it was created, then every later
/// one, and ends after the first final update (terminal or cancelled).
pub struct JobSubscription {
    pending: Option<JobUpdate>,
    receiver: broadcast::Receiver<JobUpdate>,
    finished: bool,
}

impl JobSubscription {
    pub(crate) fn new(current: JobUpdate, receiver: broadcast::Receiver<JobUpdate>) -> Self {
        Self {
            pending: Some(current),
            receiver,
            finished: false,
        }
    }

    pub async fn next(&mut self) -> Option<JobUpdate> {
        if self.finished {
            return None;
        }

        if let Some(update) = self.pending.take() {
            self.finished = update.is_final();
            return Some(update);
        }

        loop {
            match self.receiver.recv().await {
                Ok(update) => {
                    self.finished = update.is_final();
                    return Some(update);
                }
                Err(RecvError::Lagged(skipped)) => {
                    log_warn!("Job subscriber fell behind, skipped {} updates", skipped);
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Collect every remaining update, ending with the final one.
    pub async fn collect_until_final(mut self) -> Vec<JobUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = self.next().await {
            updates.push(update);
        }
        updates
    }

    pub fn into_stream(self) -> impl Stream<Item = JobUpdate> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .next()
                .await
                .map(|update| (update, subscription))
        })
    }
}
