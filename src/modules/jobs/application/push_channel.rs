/// Push side of a tracked job
///
/// Opens one subscription and forwards whatever arrives. It never retries:
/// on a failed subscribe or a broken stream it reports a single channel
/// error and goes quiet, leaving the poll worker as the only source.
use super::sink::{SnapshotSink, SourceEvent};
use crate::modules::jobs::domain::backend::PushSource;
use crate::modules::jobs::domain::entities::{JobId, SnapshotSource};
use crate::{log_debug, log_warn};
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct PushChannel {
    source: Arc<dyn PushSource>,
}

impl PushChannel {
    pub fn new(source: Arc<dyn PushSource>) -> Self {
        Self { source }
    }

    pub fn open(
        &self,
        job_id: JobId,
        sink: Arc<dyn SnapshotSink>,
        token: CancellationToken,
    ) -> PushHandle {
        let source = Arc::clone(&self.source);
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            Self::run(source, job_id, sink, task_token).await;
        });

        PushHandle { token, task }
    }

    async fn run(
        source: Arc<dyn PushSource>,
        job_id: JobId,
        sink: Arc<dyn SnapshotSink>,
        token: CancellationToken,
    ) {
        if token.is_cancelled() {
            return;
        }

        let subscribed = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            result = source.subscribe(&job_id) => result,
        };

        let mut stream = match subscribed {
            Ok(stream) => stream,
            Err(error) => {
                log_warn!(
                    "Push subscription for job {} failed ({}), relying on polling",
                    job_id,
                    error
                );
                if !token.is_cancelled() {
                    let _ = sink.on_event(SourceEvent::ChannelError(error));
                }
                return;
            }
        };

        log_debug!("Push subscription open for job {}", job_id);

        loop {
            let item = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(snapshot)) => {
                    let event = SourceEvent::Snapshot {
                        source: SnapshotSource::Push,
                        snapshot,
                    };
                    if sink.on_event(event).is_break() {
                        break;
                    }
                }
                Some(Err(error)) => {
                    log_warn!(
                        "Push channel for job {} broke ({}), relying on polling",
                        job_id,
                        error
                    );
                    if !token.is_cancelled() {
                        let _ = sink.on_event(SourceEvent::ChannelError(error));
                    }
                    break;
                }
                None => {
                    log_debug!("Push channel for job {} closed by backend", job_id);
                    break;
                }
            }
        }
    }
}

/// Handle to an open subscription. Dropping it closes the subscription.
pub struct PushHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PushHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PushHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::jobs::domain::backend::MockPushSource;
    use crate::modules::jobs::domain::entities::JobSnapshot;
    use crate::modules::jobs::domain::value_objects::JobState;
    use crate::shared::errors::AppError;
    use std::ops::ControlFlow;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<SourceEvent>>,
    }

    impl SnapshotSink for RecordingSink {
        fn on_event(&self, event: SourceEvent) -> ControlFlow<()> {
            self.events.lock().unwrap().push(event);
            ControlFlow::Continue(())
        }
    }

    fn job_id() -> JobId {
        JobId::new("push-job").unwrap()
    }

    #[tokio::test]
    async fn test_subscription_failure_reported_once() {
        let mut source = MockPushSource::new();
        source
            .expect_subscribe()
            .times(1)
            .returning(|_| Err(AppError::BackendUnavailable("not subscribed".into())));

        let sink = Arc::new(RecordingSink::default());
        let handle = PushChannel::new(Arc::new(source)).open(
            job_id(),
            sink.clone(),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_finished());
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SourceEvent::ChannelError(_)));
    }

    #[tokio::test]
    async fn test_forwards_snapshots_until_stream_breaks() {
        let mut source = MockPushSource::new();
        source.expect_subscribe().returning(|id| {
            let items = vec![
                Ok(JobSnapshot::new(id.clone(), JobState::Processing)),
                Err(AppError::BackendUnavailable("socket closed".into())),
                Ok(JobSnapshot::done(id.clone(), None)),
            ];
            Ok(futures::stream::iter(items).boxed())
        });

        let sink = Arc::new(RecordingSink::default());
        let _handle = PushChannel::new(Arc::new(source)).open(
            job_id(),
            sink.clone(),
            CancellationToken::new(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[0],
            SourceEvent::Snapshot { source: SnapshotSource::Push, snapshot } if snapshot.state == JobState::Processing
        ));
        assert!(matches!(events[1], SourceEvent::ChannelError(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_subscribe_is_silent() {
        let mut source = MockPushSource::new();
        source.expect_subscribe().never();

        let token = CancellationToken::new();
        token.cancel();
        let sink = Arc::new(RecordingSink::default());
        let _handle = PushChannel::new(Arc::new(source)).open(job_id(), sink.clone(), token);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.events.lock().unwrap().is_empty());
    }
}
