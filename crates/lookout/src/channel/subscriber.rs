//! Websocket subscription task for one session's detection feed.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use lookoutconf::ChannelConfig;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{ChannelEvent, ChannelMessage, FeedMessage};
use super::ChannelState;
use crate::error::ChannelError;

/// Config payload sent right after the socket opens.
pub fn config_payload(
    config: &ChannelConfig,
    overrides: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Value {
    let mut payload = serde_json::Map::new();
    payload.insert("track".to_string(), serde_json::Value::Bool(config.track));
    payload.insert("loop".to_string(), serde_json::Value::Bool(config.looping));
    for (key, value) in overrides {
        payload.insert(key.clone(), value.clone());
    }
    serde_json::Value::Object(payload)
}

/// A live subscription. Dropping it closes the socket.
pub struct DetectionChannel {
    generation: u64,
    cancel: CancellationToken,
    state_rx: watch::Receiver<ChannelState>,
    task: Option<JoinHandle<()>>,
}

impl DetectionChannel {
    /// Start subscribing to `url`. Events are delivered on `events`, stamped
    /// with `generation`.
    pub fn open(
        url: String,
        generation: u64,
        config: &ChannelConfig,
        overrides: serde_json::Map<String, serde_json::Value>,
        events: mpsc::UnboundedSender<ChannelMessage>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Loading);
        let cancel = CancellationToken::new();
        let subscription = Subscription {
            url,
            generation,
            payload: config_payload(config, &overrides).to_string(),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            events,
            state_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(subscription.run());
        Self {
            generation,
            cancel,
            state_rx,
            task: Some(task),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ChannelState {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Stop the subscription and any pending reconnect. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Close and wait for the task to finish.
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "detection subscription panicked");
            }
        }
    }
}

impl Drop for DetectionChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum SessionEnd {
    Completed,
    Cancelled,
    Failed(ChannelError),
}

struct Subscription {
    url: String,
    generation: u64,
    payload: String,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<ChannelMessage>,
    state_tx: watch::Sender<ChannelState>,
    cancel: CancellationToken,
}

impl Subscription {
    async fn run(self) {
        loop {
            self.state_tx.send_replace(ChannelState::Loading);

            match self.connect_once().await {
                SessionEnd::Completed => {
                    info!(url = %self.url, "detection feed complete");
                    self.state_tx.send_replace(ChannelState::Idle);
                    return;
                }
                SessionEnd::Cancelled => {
                    debug!(url = %self.url, "detection subscription closed");
                    self.state_tx.send_replace(ChannelState::Idle);
                    return;
                }
                SessionEnd::Failed(e) => {
                    warn!(
                        url = %self.url,
                        error = %e,
                        delay_ms = self.reconnect_delay.as_millis() as u64,
                        "detection feed lost, reconnecting"
                    );
                    self.state_tx.send_replace(ChannelState::Error(e.to_string()));
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.state_tx.send_replace(ChannelState::Idle);
                    return;
                }
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn connect_once(&self) -> SessionEnd {
        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
            result = connect_async(self.url.as_str()) => result,
        };
        let mut ws = match connected {
            Ok((ws, _)) => ws,
            Err(e) => return SessionEnd::Failed(ChannelError::Connect(e.to_string())),
        };

        if let Err(e) = ws.send(Message::Text(self.payload.clone())).await {
            let _ = ws.close(None).await;
            return SessionEnd::Failed(ChannelError::Config(e.to_string()));
        }
        self.state_tx.send_replace(ChannelState::Connected);
        debug!(url = %self.url, generation = self.generation, "detection feed connected");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return SessionEnd::Cancelled;
                }
                next = ws.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => match FeedMessage::parse(&text) {
                    Ok(message) => {
                        let event = ChannelEvent::from(message);
                        let end = match &event {
                            ChannelEvent::Complete => Some(SessionEnd::Completed),
                            ChannelEvent::Error(message) => {
                                Some(SessionEnd::Failed(ChannelError::Remote(message.clone())))
                            }
                            _ => None,
                        };
                        self.emit(event);
                        if let Some(end) = end {
                            let _ = ws.close(None).await;
                            return end;
                        }
                    }
                    Err(e) => debug!(error = %e, "ignoring unparsable feed message"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return SessionEnd::Failed(ChannelError::UncleanClose);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return SessionEnd::Failed(ChannelError::Remote(e.to_string())),
            }
        }
    }

    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(ChannelMessage {
            generation: self.generation,
            event,
        });
    }
}
