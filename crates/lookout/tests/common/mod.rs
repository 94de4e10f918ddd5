//! Shared fixtures for lookout integration tests: a scriptable media peer,
//! a one-shot websocket feed server, and polling helpers.

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use lookout::error::MediaError;
use lookout::transport::{
    MediaEvent, MediaEventSink, MediaPeer, MediaPeerFactory, PeerConfig, RelayDescriptor,
};
use lookoutconf::TransportConfig;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub const FAKE_OFFER: &str = "v=0\r\no=- 0 0 IN IP4 0.0.0.0\r\na=recvonly\r\n";

/// Everything the fake peers were asked to do.
#[derive(Default)]
pub struct PeerLog {
    pub relays: Vec<Vec<RelayDescriptor>>,
    pub answers: Vec<String>,
    pub tuned: usize,
    pub attached: usize,
    pub detached: usize,
    pub closed: usize,
    pub sinks: Vec<MediaEventSink>,
    /// Peer lifecycle calls in the order they happened.
    pub journal: Vec<&'static str>,
}

#[derive(Clone, Default)]
pub struct FakeFactory {
    pub log: Arc<Mutex<PeerLog>>,
    /// Report a track and a first frame as soon as the answer is applied.
    pub auto_play: bool,
}

impl FakeFactory {
    pub fn playing() -> Self {
        Self {
            auto_play: true,
            ..Self::default()
        }
    }

    pub fn silent() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.log.lock().unwrap().sinks.len()
    }

    pub fn sink(&self, index: usize) -> MediaEventSink {
        self.log.lock().unwrap().sinks[index].clone()
    }

    pub fn with_log<T>(&self, f: impl FnOnce(&PeerLog) -> T) -> T {
        f(&self.log.lock().unwrap())
    }
}

impl MediaPeerFactory for FakeFactory {
    fn create(
        &self,
        config: PeerConfig,
        events: MediaEventSink,
    ) -> Result<Box<dyn MediaPeer>, MediaError> {
        let mut log = self.log.lock().unwrap();
        log.relays.push(config.relays);
        log.sinks.push(events.clone());
        log.journal.push("create");
        Ok(Box::new(FakePeer {
            log: Arc::clone(&self.log),
            events,
            auto_play: self.auto_play,
            offer: None,
        }))
    }
}

struct FakePeer {
    log: Arc<Mutex<PeerLog>>,
    events: MediaEventSink,
    auto_play: bool,
    offer: Option<String>,
}

#[async_trait]
impl MediaPeer for FakePeer {
    async fn create_offer(&mut self) -> Result<(), MediaError> {
        self.offer = Some(FAKE_OFFER.to_string());
        Ok(())
    }

    async fn gathering_complete(&mut self) {
        // Never completes, so the gather budget always applies
        std::future::pending::<()>().await
    }

    fn local_description(&self) -> Option<String> {
        self.offer.clone()
    }

    async fn apply_answer(&mut self, sdp: &str) -> Result<(), MediaError> {
        self.log.lock().unwrap().answers.push(sdp.to_string());
        if self.auto_play {
            self.events.emit(MediaEvent::TrackArrived);
            self.events.emit(MediaEvent::FirstFrame);
        }
        Ok(())
    }

    fn tune_latency(&mut self) -> Result<(), MediaError> {
        self.log.lock().unwrap().tuned += 1;
        Err(MediaError::new("playout delay hint unsupported"))
    }

    fn attach_track(&mut self) -> Result<(), MediaError> {
        self.log.lock().unwrap().attached += 1;
        Ok(())
    }

    fn detach_track(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.detached += 1;
        log.journal.push("detach");
    }

    async fn close(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.closed += 1;
        log.journal.push("close");
    }
}

/// Short timers so tests run in well under a second per transition.
pub fn fast_transport_config() -> TransportConfig {
    TransportConfig {
        first_frame_timeout_ms: 300,
        gather_timeout_ms: 20,
        reconnect_base_ms: 100,
        reconnect_growth: 1.5,
        reconnect_cap_ms: 1_000,
        max_reconnect_attempts: 8,
        reconnect_reset_ms: 5_000,
        request_timeout_ms: 2_000,
    }
}

/// Poll `check` until it returns true or five seconds pass.
pub async fn eventually<F>(what: &str, mut check: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    bail!("timed out waiting for {what}")
}

/// Await `fut` with a five second ceiling.
pub async fn within<T>(what: &str, fut: impl Future<Output = T>) -> Result<T> {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .with_context(|| format!("timed out waiting for {what}"))
}

/// What one websocket connection to the feed server should do.
#[derive(Clone, Debug)]
pub struct FeedScript {
    pub messages: Vec<String>,
    /// Drop the TCP connection after the messages instead of waiting.
    pub hang_up: bool,
}

/// Websocket feed server. Each accepted connection follows the next script
/// (the last one repeats) and reports the client's config payload.
pub struct FeedServer {
    pub url: String,
    pub configs: mpsc::UnboundedReceiver<String>,
}

pub async fn feed_server(scripts: Vec<FeedScript>) -> Result<FeedServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (config_tx, configs) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            let script = scripts
                .get(index)
                .or_else(|| scripts.last())
                .cloned()
                .unwrap_or(FeedScript {
                    messages: Vec::new(),
                    hang_up: false,
                });
            index += 1;
            let config_tx = config_tx.clone();

            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                if let Some(Ok(Message::Text(config))) = ws.next().await {
                    let _ = config_tx.send(config);
                }
                for message in script.messages {
                    if ws.send(Message::Text(message)).await.is_err() {
                        return;
                    }
                }
                if script.hang_up {
                    return;
                }
                // Hold the connection open until the client leaves
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });

    Ok(FeedServer {
        url: format!("ws://{addr}/sessions/{{session}}/detections"),
        configs,
    })
}

pub fn detections_message(frame_index: u64, timestamp_ms: f64, boxes: &[(f64, f64)]) -> String {
    let vessels: Vec<_> = boxes
        .iter()
        .map(|(x, y)| {
            serde_json::json!({
                "detection": {
                    "x": x, "y": y, "width": 40.0, "height": 20.0,
                    "confidence": 0.9, "class": "boat"
                },
                "vessel": {"mmsi": 257000000, "name": "SKARV"}
            })
        })
        .collect();
    serde_json::json!({
        "type": "detections",
        "frame_index": frame_index,
        "timestamp_ms": timestamp_ms,
        "fps": 25,
        "vessels": vessels,
    })
    .to_string()
}
