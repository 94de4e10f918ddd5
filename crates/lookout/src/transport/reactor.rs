//! The transport reactor task.
//!
//! All mutable connection state lives in [`Reactor`]. The select loop only
//! turns whatever woke it into a [`TransportEvent`]; [`Reactor::handle`] is
//! the one place state changes.

use std::sync::Arc;
use std::time::Duration;

use lookoutconf::TransportConfig;
use reqwest::Url;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::ReconnectPolicy;
use super::handshake::{negotiate, terminate, Negotiated};
use super::peer::{MediaEvent, MediaEventSink, MediaPeer, MediaPeerFactory, TaggedMediaEvent};
use super::{
    pick_endpoint, MediaClockKind, MediaClockUpdate, TransportCommand, TransportConnection,
    TransportStatus,
};
use crate::directory::PlaybackEndpoints;
use crate::error::HandshakeError;
use crate::timer::TimerSlot;

const COMMAND_BUFFER: usize = 32;

type HandshakeResult = (u64, Result<Option<Negotiated>, HandshakeError>);

/// Caller side of a running transport reactor.
pub struct TransportHandle {
    cmd_tx: mpsc::Sender<TransportCommand>,
    status_rx: watch::Receiver<TransportConnection>,
    task: JoinHandle<()>,
}

impl TransportHandle {
    /// Queue a command. Returns false if the reactor has exited.
    pub async fn send(&self, cmd: TransportCommand) -> bool {
        self.cmd_tx.send(cmd).await.is_ok()
    }

    pub fn status(&self) -> TransportConnection {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransportConnection> {
        self.status_rx.clone()
    }

    /// Tear everything down and wait for the reactor to exit.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(TransportCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "transport reactor panicked");
        }
    }
}

/// Spawn a transport reactor with its own HTTP client.
pub fn spawn(
    config: TransportConfig,
    factory: Arc<dyn MediaPeerFactory>,
) -> Result<(TransportHandle, mpsc::UnboundedReceiver<MediaClockUpdate>), HandshakeError> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .build()
        .map_err(|e| HandshakeError::Transport(e.to_string()))?;
    Ok(spawn_with_client(config, factory, http))
}

/// Spawn a transport reactor. Media clock samples come out of the returned
/// receiver tagged with the session they belong to.
pub fn spawn_with_client(
    config: TransportConfig,
    factory: Arc<dyn MediaPeerFactory>,
    http: reqwest::Client,
) -> (TransportHandle, mpsc::UnboundedReceiver<MediaClockUpdate>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (status_tx, status_rx) = watch::channel(TransportConnection::default());
    let (clock_tx, clock_rx) = mpsc::unbounded_channel();
    let (handshake_tx, handshake_rx) = mpsc::unbounded_channel();
    let (media_tx, media_rx) = mpsc::unbounded_channel();

    let reactor = Reactor {
        policy: ReconnectPolicy::from(&config),
        config,
        http,
        factory,
        cmd_rx,
        status_tx,
        clock_tx,
        handshake_tx,
        handshake_rx,
        media_tx,
        media_rx,
        conn: TransportConnection::default(),
        target: None,
        next_attempt: 0,
        live_attempt: None,
        cancel: None,
        peer: None,
        termination_url: None,
        pending_track: false,
        watchdog_retry_used: false,
        watchdog: TimerSlot::new("first-frame"),
        stall: TimerSlot::new("stall"),
        reconnect: TimerSlot::new("reconnect"),
    };
    let task = tokio::spawn(reactor.run());

    (
        TransportHandle {
            cmd_tx,
            status_rx,
            task,
        },
        clock_rx,
    )
}

enum TransportEvent {
    Command(TransportCommand),
    Negotiated {
        attempt: u64,
        result: Result<Option<Negotiated>, HandshakeError>,
    },
    Media(TaggedMediaEvent),
    WatchdogFired,
    StallFired,
    ReconnectFired,
}

struct Target {
    session: String,
    endpoints: PlaybackEndpoints,
    playback_url: Option<Url>,
}

struct Reactor {
    config: TransportConfig,
    http: reqwest::Client,
    factory: Arc<dyn MediaPeerFactory>,

    cmd_rx: mpsc::Receiver<TransportCommand>,
    status_tx: watch::Sender<TransportConnection>,
    clock_tx: mpsc::UnboundedSender<MediaClockUpdate>,
    handshake_tx: mpsc::UnboundedSender<HandshakeResult>,
    handshake_rx: mpsc::UnboundedReceiver<HandshakeResult>,
    media_tx: mpsc::UnboundedSender<TaggedMediaEvent>,
    media_rx: mpsc::UnboundedReceiver<TaggedMediaEvent>,

    conn: TransportConnection,
    target: Option<Target>,
    policy: ReconnectPolicy,

    next_attempt: u64,
    live_attempt: Option<u64>,
    cancel: Option<CancellationToken>,
    peer: Option<Box<dyn MediaPeer>>,
    termination_url: Option<Url>,
    pending_track: bool,
    watchdog_retry_used: bool,

    watchdog: TimerSlot,
    stall: TimerSlot,
    reconnect: TimerSlot,
}

impl Reactor {
    async fn run(mut self) {
        debug!("transport reactor started");
        loop {
            let event = tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => TransportEvent::Command(cmd),
                    None => TransportEvent::Command(TransportCommand::Shutdown),
                },
                Some((attempt, result)) = self.handshake_rx.recv() => {
                    TransportEvent::Negotiated { attempt, result }
                }
                Some(tagged) = self.media_rx.recv() => TransportEvent::Media(tagged),
                _ = self.watchdog.fired() => TransportEvent::WatchdogFired,
                _ = self.stall.fired() => TransportEvent::StallFired,
                _ = self.reconnect.fired() => TransportEvent::ReconnectFired,
            };

            if !self.handle(event).await {
                break;
            }
        }
        debug!("transport reactor exited");
    }

    /// Apply one event. Returns false when the reactor should exit.
    async fn handle(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Command(TransportCommand::Connect { session, endpoints }) => {
                self.connect(session, endpoints);
            }
            TransportEvent::Command(TransportCommand::Disconnect) => {
                if let Some(target) = self.target.take() {
                    info!(session = %target.session, "transport disconnected");
                }
                self.release();
                self.policy.on_success();
                self.conn = TransportConnection::default();
                self.publish();
            }
            TransportEvent::Command(TransportCommand::VisibilityRegained) => {
                // A hidden tab can lose media without any error, so even
                // `playing` is not trusted here.
                if self.target.is_some() && self.conn.status != TransportStatus::Idle {
                    info!(status = self.conn.status.as_str(), "visible again, reconnecting now");
                    self.start_attempt();
                }
            }
            TransportEvent::Command(TransportCommand::ResetAttempts) => {
                self.policy.on_success();
                self.conn.attempt_count = 0;
                if self.conn.status == TransportStatus::Error && self.target.is_some() {
                    self.start_attempt();
                } else {
                    self.publish();
                }
            }
            TransportEvent::Command(TransportCommand::Shutdown) => {
                self.shutdown().await;
                return false;
            }
            TransportEvent::Negotiated { attempt, result } => self.on_negotiated(attempt, result),
            TransportEvent::Media(tagged) => {
                if self.live_attempt == Some(tagged.attempt) {
                    self.on_media(tagged.event);
                } else {
                    debug!(attempt = tagged.attempt, event = ?tagged.event, "dropping stale media event");
                }
            }
            TransportEvent::WatchdogFired => self.on_watchdog(),
            TransportEvent::StallFired => {
                let window = self.config.first_frame_timeout_ms;
                self.fail(format!("Playback stalled for {window} ms"));
            }
            TransportEvent::ReconnectFired => self.start_attempt(),
        }
        true
    }

    fn connect(&mut self, session: String, endpoints: PlaybackEndpoints) {
        let unchanged = self
            .target
            .as_ref()
            .is_some_and(|t| t.session == session && t.endpoints == endpoints);
        if unchanged && self.conn.status != TransportStatus::Idle {
            debug!(session = %session, "already connected to session");
            return;
        }

        self.release();
        self.policy.on_success();
        self.watchdog_retry_used = false;

        let picked = pick_endpoint(&endpoints).map(|(kind, url)| (kind.to_string(), url.to_string()));
        self.conn = TransportConnection {
            session: Some(session.clone()),
            transport_kind: picked.as_ref().map(|(kind, _)| kind.clone()),
            ..TransportConnection::default()
        };

        let playback_url = match picked {
            None => Err(HandshakeError::NoEndpoint(session.clone())),
            Some((_, url)) => Url::parse(&url).map_err(|e| HandshakeError::InvalidUrl {
                url,
                message: e.to_string(),
            }),
        };

        match playback_url {
            Ok(url) => {
                self.target = Some(Target {
                    session,
                    endpoints,
                    playback_url: Some(url),
                });
                self.start_attempt();
            }
            Err(e) => {
                // Nothing to retry until the directory reports usable endpoints
                warn!(session = %session, error = %e, "cannot connect");
                self.target = Some(Target {
                    session,
                    endpoints,
                    playback_url: None,
                });
                self.conn.status = TransportStatus::Error;
                self.conn.last_error = Some(e.to_string());
                self.publish();
            }
        }
    }

    fn start_attempt(&mut self) {
        let Some((session, url)) = self
            .target
            .as_ref()
            .and_then(|t| t.playback_url.clone().map(|url| (t.session.clone(), url)))
        else {
            return;
        };

        self.release();
        self.next_attempt += 1;
        let attempt = self.next_attempt;
        self.live_attempt = Some(attempt);

        let token = CancellationToken::new();
        self.cancel = Some(token.clone());

        let http = self.http.clone();
        let factory = Arc::clone(&self.factory);
        let gather_timeout = Duration::from_millis(self.config.gather_timeout_ms);
        let sink = MediaEventSink::new(attempt, self.media_tx.clone());
        let results = self.handshake_tx.clone();
        tokio::spawn(async move {
            let result = negotiate(&http, factory.as_ref(), &url, gather_timeout, sink, &token).await;
            let _ = results.send((attempt, result));
        });

        self.watchdog
            .schedule(Duration::from_millis(self.config.first_frame_timeout_ms));
        self.conn.status = TransportStatus::Connecting;
        self.conn.attempt_count = self.policy.attempts();
        self.publish();
        info!(session = %session, attempt, "connecting");
    }

    fn on_negotiated(&mut self, attempt: u64, result: Result<Option<Negotiated>, HandshakeError>) {
        if self.live_attempt != Some(attempt) {
            if let Ok(Some(stale)) = result {
                debug!(attempt, "discarding late negotiation");
                self.dispose(stale.peer, stale.termination_url);
            }
            return;
        }

        match result {
            Ok(Some(negotiated)) => {
                debug!(attempt, relays = negotiated.relays.len(), "peer negotiated");
                self.peer = Some(negotiated.peer);
                self.termination_url = negotiated.termination_url;
                if self.pending_track {
                    self.pending_track = false;
                    self.attach_track();
                }
            }
            Ok(None) => {}
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn on_media(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::TrackArrived => {
                if self.peer.is_some() {
                    self.attach_track();
                } else {
                    self.pending_track = true;
                }
            }
            MediaEvent::FirstFrame | MediaEvent::Playing => {
                if self.conn.status != TransportStatus::Playing {
                    info!(session = ?self.conn.session, "playing");
                }
                self.policy.on_success();
                self.watchdog.cancel();
                self.stall.cancel();
                self.reconnect.cancel();
                self.watchdog_retry_used = false;
                self.conn.status = TransportStatus::Playing;
                self.conn.attempt_count = 0;
                self.conn.last_error = None;
                self.publish();
            }
            MediaEvent::Waiting | MediaEvent::Stalled => {
                if self.conn.status == TransportStatus::Playing {
                    warn!(session = ?self.conn.session, "playback stalled");
                    self.conn.status = TransportStatus::Stalled;
                    if !self.stall.is_armed() {
                        self.stall
                            .schedule(Duration::from_millis(self.config.first_frame_timeout_ms));
                    }
                    self.publish();
                }
            }
            MediaEvent::DecodeError(message) => self.fail(format!("Decode error: {message}")),
            MediaEvent::PlaybackPosition(ms) => self.forward_clock(MediaClockKind::PlaybackPosition, ms),
            MediaEvent::FrameTimestamp(ms) => self.forward_clock(MediaClockKind::FrameTimestamp, ms),
        }
    }

    fn on_watchdog(&mut self) {
        let window = self.config.first_frame_timeout_ms;
        if self.watchdog_retry_used {
            self.fail(format!("No video within {window} ms"));
            return;
        }
        warn!(session = ?self.conn.session, timeout_ms = window, "no first frame, retrying once");
        self.watchdog_retry_used = true;
        self.conn.last_error = Some(format!("No video within {window} ms"));
        self.start_attempt();
    }

    fn attach_track(&mut self) {
        let Some(peer) = self.peer.as_mut() else {
            return;
        };
        if let Err(e) = peer.tune_latency() {
            debug!(error = %e, "latency hints unsupported");
        }
        if let Err(e) = peer.attach_track() {
            self.fail(format!("Track attach failed: {e}"));
        }
    }

    fn forward_clock(&self, kind: MediaClockKind, timestamp_ms: f64) {
        let Some(session) = self.conn.session.clone() else {
            return;
        };
        let _ = self.clock_tx.send(MediaClockUpdate {
            session,
            kind,
            timestamp_ms,
        });
    }

    /// Drop the current attempt and schedule a reconnect per the policy.
    fn fail(&mut self, message: String) {
        self.release();
        let delay = self.policy.on_failure();
        self.conn.status = TransportStatus::Error;
        self.conn.attempt_count = self.policy.attempts();
        self.conn.last_error = Some(message);
        warn!(
            session = ?self.conn.session,
            attempt = self.conn.attempt_count,
            delay_ms = delay.as_millis() as u64,
            error = ?self.conn.last_error,
            "transport failed, reconnect scheduled"
        );
        self.reconnect.schedule(delay);
        self.publish();
    }

    /// Cancel timers and in-flight negotiation, close the peer, and send the
    /// termination request. Safe to call repeatedly.
    fn release(&mut self) {
        self.watchdog.cancel();
        self.stall.cancel();
        self.reconnect.cancel();
        self.live_attempt = None;
        self.pending_track = false;
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        let peer = self.peer.take();
        let termination_url = self.termination_url.take();
        if let Some(peer) = peer {
            self.dispose(peer, termination_url);
        } else if let Some(url) = termination_url {
            let http = self.http.clone();
            tokio::spawn(async move { terminate(&http, url).await });
        }
    }

    fn dispose(&self, mut peer: Box<dyn MediaPeer>, termination_url: Option<Url>) {
        peer.detach_track();
        let http = self.http.clone();
        tokio::spawn(async move {
            peer.close().await;
            if let Some(url) = termination_url {
                terminate(&http, url).await;
            }
        });
    }

    async fn shutdown(&mut self) {
        self.watchdog.cancel();
        self.stall.cancel();
        self.reconnect.cancel();
        self.live_attempt = None;
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        if let Some(mut peer) = self.peer.take() {
            peer.detach_track();
            peer.close().await;
        }
        if let Some(url) = self.termination_url.take() {
            terminate(&self.http, url).await;
        }
        self.target = None;
        self.conn = TransportConnection::default();
        self.publish();
        info!("transport shut down");
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.conn.clone());
    }
}
