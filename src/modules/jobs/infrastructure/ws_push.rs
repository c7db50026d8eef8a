//! WebSocket implementation of the push source
//!
//! One socket per subscription. The client sends a `subscribe` frame carrying
//! a fresh reference and the backend must answer `subscribed` before the ack
//! timeout; only then do `job_update` frames start flowing.

use super::models::{PushClientMessage, PushServerMessage};
use crate::modules::jobs::domain::backend::{PushSource, PushStream};
use crate::modules::jobs::domain::entities::{JobId, JobSnapshot};
use crate::modules::jobs::domain::value_objects::StatusVocabulary;
use crate::shared::errors::{AppError, AppResult};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketPushSource {
    url: String,
    api_key: Option<String>,
    ack_timeout: Duration,
    vocabulary: Arc<StatusVocabulary>,
}

impl WebSocketPushSource {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        ack_timeout: Duration,
        vocabulary: Arc<StatusVocabulary>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key,
            ack_timeout,
            vocabulary,
        }
    }

    async fn connect(&self) -> AppResult<Socket> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(key) = &self.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key)).map_err(|e| {
                AppError::InvalidInput(format!("API key is not a valid header value: {}", e))
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        match tokio::time::timeout(self.ack_timeout, connect_async(request)).await {
            Ok(Ok((socket, _response))) => Ok(socket),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(AppError::BackendUnavailable(format!(
                "Push connection timed out after {:?}",
                self.ack_timeout
            ))),
        }
    }

    async fn wait_for_ack(&self, socket: &mut Socket, reference: &str) -> AppResult<()> {
        let deadline = Instant::now() + self.ack_timeout;
        let timed_out = || {
            AppError::BackendUnavailable(format!(
                "No subscription acknowledgement within {:?}",
                self.ack_timeout
            ))
        };

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out());
            }

            match tokio::time::timeout(remaining, socket.next()).await {
                Ok(Some(Ok(Message::Text(text)))) => {
                    match serde_json::from_str::<PushServerMessage>(&text)? {
                        PushServerMessage::Subscribed { reference: acked }
                            if acked.as_deref().map_or(true, |r| r == reference) =>
                        {
                            return Ok(())
                        }
                        PushServerMessage::Heartbeat => continue,
                        PushServerMessage::Error { message } => {
                            return Err(AppError::BackendUnavailable(format!(
                                "Subscription rejected: {}",
                                message
                            )))
                        }
                        other => {
                            return Err(AppError::BackendUnavailable(format!(
                                "Expected a subscription acknowledgement, got {:?}",
                                other
                            )))
                        }
                    }
                }
                Ok(Some(Ok(Message::Ping(payload)))) => {
                    let _ = socket.send(Message::Pong(payload)).await;
                }
                Ok(Some(Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_)))) => {}
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                    return Err(AppError::BackendUnavailable(
                        "Push socket closed before the subscription was acknowledged".to_string(),
                    ))
                }
                Ok(Some(Err(e))) => return Err(e.into()),
                Err(_) => return Err(timed_out()),
            }
        }
    }
}

#[async_trait]
impl PushSource for WebSocketPushSource {
    async fn subscribe(&self, job_id: &JobId) -> AppResult<PushStream> {
        let mut socket = self.connect().await?;

        let reference = Uuid::new_v4().to_string();
        let message = PushClientMessage::Subscribe {
            job_id: job_id.to_string(),
            reference: reference.clone(),
        };
        socket
            .send(Message::Text(serde_json::to_string(&message)?))
            .await?;

        self.wait_for_ack(&mut socket, &reference).await?;
        tracing::debug!(job_id = %job_id, reference = %reference, "push subscription acknowledged");

        let reader = FrameReader {
            socket,
            job_id: job_id.clone(),
            vocabulary: Arc::clone(&self.vocabulary),
        };

        let stream = futures::stream::unfold(Some(reader), |reader| async move {
            let mut reader = match reader {
                Some(reader) => reader,
                None => return None,
            };
            match reader.next_snapshot().await {
                Some(Ok(snapshot)) => Some((Ok(snapshot), Some(reader))),
                Some(Err(error)) => Some((Err(error), None)),
                None => None,
            }
        });

        Ok(stream.boxed())
    }
}

/// Reads frames of an acknowledged subscription
struct FrameReader {
    socket: Socket,
    job_id: JobId,
    vocabulary: Arc<StatusVocabulary>,
}

impl FrameReader {
    /// Next snapshot for the subscribed job. An error ends the subscription.
    async fn next_snapshot(&mut self) -> Option<AppResult<JobSnapshot>> {
        loop {
            let frame = match self.socket.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    return Some(Err(AppError::BackendUnavailable(
                        "Push socket closed".to_string(),
                    )))
                }
            };

            let text = match frame {
                Message::Text(text) => text,
                Message::Ping(payload) => {
                    let _ = self.socket.send(Message::Pong(payload)).await;
                    continue;
                }
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "no reason given".to_string());
                    return Some(Err(AppError::BackendUnavailable(format!(
                        "Push socket closed by backend: {}",
                        reason
                    ))));
                }
                _ => continue,
            };

            match serde_json::from_str::<PushServerMessage>(&text) {
                Ok(PushServerMessage::JobUpdate(dto)) => {
                    if dto.id != self.job_id.as_str() {
                        continue;
                    }
                    match dto.into_snapshot(&self.vocabulary) {
                        Ok(snapshot) => return Some(Ok(snapshot)),
                        Err(e) => {
                            tracing::warn!(job_id = %self.job_id, error = %e, "ignoring push frame");
                        }
                    }
                }
                Ok(PushServerMessage::Error { message }) => {
                    return Some(Err(AppError::BackendUnavailable(message)));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(job_id = %self.job_id, error = %e, "unreadable push frame");
                }
            }
        }
    }
}

/// Push source used when no push endpoint is configured. Every subscription
/// fails, so trackers run on polling alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPushSource;

#[async_trait]
impl PushSource for DisabledPushSource {
    async fn subscribe(&self, _job_id: &JobId) -> AppResult<PushStream> {
        Err(AppError::BackendUnavailable(
            "Push notifications are not configured".to_string(),
        ))
    }
}
