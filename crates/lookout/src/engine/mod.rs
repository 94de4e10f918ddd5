//! The engine reactor: wires sessions, directory, transport, detection feed,
//! tracker and clock together.
//!
//! ```text
//!  EngineCommand ──▶ SessionState::apply ──▶ sync media for active session
//!                                               │                 │
//!                                        TransportCommand   DetectionChannel
//!                                               │                 │
//!                                      media clock samples   detection frames
//!                                               └──▶ ClockState ◀─┤
//!                                                                 ▼
//!                                                   tracker ──▶ FrameHistory
//!                                                                 │
//!                                          watch<EngineSnapshot> ◀┘
//! ```
//!
//! Directory requests run as short spawned tasks and report back through an
//! internal channel, so a slow directory never stalls rendering.

mod snapshot;

pub use snapshot::{EngineSnapshot, FeedGeometry};

use std::collections::HashMap;
use std::future::pending;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lookoutconf::LookoutConfig;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::channel::{ChannelEvent, ChannelMessage, ChannelState, DetectionChannel, DetectionFrame};
use crate::clock::{Annotation, ClockParams, ClockState, FrameHistory, VisibleFrame};
use crate::directory::{
    DirectoryClient, PlaybackEndpoints, RemoteSession, StartOutcome, StartRequest, StopOutcome,
};
use crate::error::{DirectoryError, EngineError};
use crate::session::{RemoteStatus, SessionAction, SessionPrefs, SessionState, DEFAULT_SESSION};
use crate::tracker::{self, RawDetection, TrackedIdentity, TrackerParams};
use crate::transport::{
    self, MediaClockKind, MediaClockUpdate, MediaPeerFactory, TransportCommand,
    TransportConnection, TransportHandle,
};

const COMMAND_BUFFER: usize = 64;

/// Operator and integration requests.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    AddSession,
    CloseSession(String),
    SelectSession(String),
    /// Start `id` on the directory, then turn the placeholder into it.
    ConfigureSession {
        id: String,
        source_url: Option<String>,
        looping: bool,
    },
    JoinExternalSession(String),
    VisibilityRegained,
    RetryDirectory,
    Shutdown,
}

/// Caller side of a running engine.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    snapshot_rx: watch::Receiver<EngineSnapshot>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Queue a command. Returns false if the engine has exited.
    pub async fn send(&self, cmd: EngineCommand) -> bool {
        self.cmd_tx.send(cmd).await.is_ok()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Release everything, persist preferences, and wait for exit.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(EngineCommand::Shutdown).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "engine task panicked");
        }
    }
}

pub struct Engine;

impl Engine {
    /// Start the engine. Without a media factory only the detection feed
    /// runs and the clock follows detection timestamps.
    pub fn spawn(
        config: LookoutConfig,
        directory: DirectoryClient,
        media_factory: Option<Arc<dyn MediaPeerFactory>>,
    ) -> Result<EngineHandle, EngineError> {
        let (transport, clock_rx) = match media_factory {
            Some(factory) => {
                let (handle, clock_rx) = transport::spawn(config.transport.clone(), factory)?;
                (Some(handle), Some(clock_rx))
            }
            None => (None, None),
        };
        let transport_status = transport.as_ref().map(TransportHandle::subscribe);

        let state_dir = config.paths.state_dir.clone();
        let saved_prefs = SessionPrefs::load(&state_dir);
        let sessions = SessionState::restore(&saved_prefs);
        info!(
            active = %sessions.active_id(),
            joined = sessions.joined_ids().len(),
            "restored sessions"
        );

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(EngineSnapshot::new(&sessions));
        let (directory_tx, directory_rx) = mpsc::unbounded_channel();
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();

        let mut poll = interval(Duration::from_millis(config.directory.poll_interval_ms.max(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let heartbeat_period = Duration::from_millis(config.directory.heartbeat_interval_ms.max(1));
        let mut heartbeat = interval_at(Instant::now() + heartbeat_period, heartbeat_period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut render = interval(Duration::from_millis(config.clock.tick_interval_ms.max(10)));
        render.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reactor = EngineReactor {
            tracker_params: TrackerParams::from(&config.tracker),
            clock: ClockState::new(ClockParams::from(&config.clock)),
            history: FrameHistory::new(config.clock.history_cap),
            config,
            directory,
            state_dir,
            cmd_rx,
            snapshot_tx,
            directory_tx,
            directory_rx,
            channel_tx,
            channel_rx,
            transport,
            transport_status,
            clock_rx,
            channel: None,
            channel_status: None,
            generation: 0,
            sessions,
            saved_prefs,
            media_session: None,
            media_endpoints: PlaybackEndpoints::new(),
            overrides: HashMap::new(),
            tracking: Vec::new(),
            feed: None,
            directory_status: "not yet polled".to_string(),
            poll_in_flight: false,
            poll,
            heartbeat,
            render,
            started: Instant::now(),
        };
        let task = tokio::spawn(reactor.run());

        Ok(EngineHandle {
            cmd_tx,
            snapshot_rx,
            task,
        })
    }
}

#[derive(Debug)]
enum DirectoryEvent {
    Listed(Result<Vec<RemoteSession>, DirectoryError>),
    Started {
        id: String,
        result: Result<StartOutcome, DirectoryError>,
    },
    Stopped {
        id: String,
        result: Result<StopOutcome, DirectoryError>,
    },
}

enum EngineEvent {
    Command(EngineCommand),
    Directory(DirectoryEvent),
    Channel(ChannelMessage),
    MediaClock(MediaClockUpdate),
    StatusChanged,
    PollTick,
    HeartbeatTick,
    RenderTick,
}

struct EngineReactor {
    config: LookoutConfig,
    directory: DirectoryClient,
    state_dir: PathBuf,

    cmd_rx: mpsc::Receiver<EngineCommand>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    directory_tx: mpsc::UnboundedSender<DirectoryEvent>,
    directory_rx: mpsc::UnboundedReceiver<DirectoryEvent>,
    channel_tx: mpsc::UnboundedSender<ChannelMessage>,
    channel_rx: mpsc::UnboundedReceiver<ChannelMessage>,

    transport: Option<TransportHandle>,
    transport_status: Option<watch::Receiver<TransportConnection>>,
    clock_rx: Option<mpsc::UnboundedReceiver<MediaClockUpdate>>,
    channel: Option<DetectionChannel>,
    channel_status: Option<watch::Receiver<ChannelState>>,
    generation: u64,

    sessions: SessionState,
    saved_prefs: SessionPrefs,
    media_session: Option<String>,
    media_endpoints: PlaybackEndpoints,
    overrides: HashMap<String, serde_json::Map<String, serde_json::Value>>,

    tracker_params: TrackerParams,
    tracking: Vec<TrackedIdentity>,
    clock: ClockState,
    history: FrameHistory,
    feed: Option<FeedGeometry>,

    directory_status: String,
    poll_in_flight: bool,
    poll: Interval,
    heartbeat: Interval,
    render: Interval,
    started: Instant,
}

async fn recv_optional<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn watch_changed<T>(rx: &mut Option<watch::Receiver<T>>) -> Option<()> {
    match rx {
        Some(rx) => rx.changed().await.ok(),
        None => pending().await,
    }
}

impl EngineReactor {
    async fn run(mut self) {
        debug!("engine reactor started");
        self.sync_media().await;
        self.publish();

        loop {
            let event = tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => EngineEvent::Command(cmd),
                    None => EngineEvent::Command(EngineCommand::Shutdown),
                },
                Some(event) = self.directory_rx.recv() => EngineEvent::Directory(event),
                Some(message) = self.channel_rx.recv() => EngineEvent::Channel(message),
                Some(update) = recv_optional(&mut self.clock_rx) => EngineEvent::MediaClock(update),
                Some(()) = watch_changed(&mut self.transport_status) => EngineEvent::StatusChanged,
                Some(()) = watch_changed(&mut self.channel_status) => EngineEvent::StatusChanged,
                _ = self.poll.tick() => EngineEvent::PollTick,
                _ = self.heartbeat.tick() => EngineEvent::HeartbeatTick,
                _ = self.render.tick() => EngineEvent::RenderTick,
            };

            if !self.handle(event).await {
                break;
            }
        }
        debug!("engine reactor exited");
    }

    async fn handle(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Command(EngineCommand::Shutdown) => {
                self.shutdown().await;
                return false;
            }
            EngineEvent::Command(cmd) => {
                self.on_command(cmd).await;
                self.after_state_change().await;
            }
            EngineEvent::Directory(event) => {
                self.on_directory(event);
                self.after_state_change().await;
            }
            EngineEvent::Channel(message) => {
                if message.generation != self.generation {
                    debug!(generation = message.generation, "dropping stale feed event");
                    return true;
                }
                self.on_channel_event(message.event);
            }
            EngineEvent::MediaClock(update) => self.on_media_clock(update),
            EngineEvent::StatusChanged => self.publish(),
            EngineEvent::PollTick => self.poll_directory(),
            EngineEvent::HeartbeatTick => self.send_heartbeats(),
            EngineEvent::RenderTick => {
                if let Some(session) = self.media_session.clone() {
                    let now = self.now_ms();
                    self.clock = std::mem::take(&mut self.clock).tick(&session, now);
                }
                self.publish();
            }
        }
        true
    }

    async fn on_command(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::AddSession => self.apply(SessionAction::AddSession),
            EngineCommand::CloseSession(id) => {
                let stop_remote = id != DEFAULT_SESSION
                    && self.sessions.get(&id).is_some_and(|s| !s.is_placeholder());
                self.apply(SessionAction::CloseSession(id.clone()));
                if stop_remote {
                    self.stop_remote(id);
                }
            }
            EngineCommand::SelectSession(id) => self.apply(SessionAction::SelectSession(id)),
            EngineCommand::ConfigureSession {
                id,
                source_url,
                looping,
            } => {
                let mut overrides = serde_json::Map::new();
                overrides.insert("loop".to_string(), serde_json::Value::Bool(looping));
                self.overrides.insert(id.clone(), overrides);
                self.start_remote(id, StartRequest { source_url, looping });
            }
            EngineCommand::JoinExternalSession(id) => {
                self.apply(SessionAction::JoinExternalSession(id))
            }
            EngineCommand::VisibilityRegained => {
                if let Some(transport) = &self.transport {
                    transport.send(TransportCommand::VisibilityRegained).await;
                }
                self.poll_directory();
            }
            EngineCommand::RetryDirectory => self.poll_directory(),
            EngineCommand::Shutdown => {}
        }
    }

    fn on_directory(&mut self, event: DirectoryEvent) {
        match event {
            DirectoryEvent::Listed(Ok(list)) => {
                self.poll_in_flight = false;
                for remote in &list {
                    if RemoteStatus::from_remote(remote.status.as_deref()) == RemoteStatus::Unknown {
                        debug!(session = %remote.id, status = ?remote.status, "unrecognized remote status");
                    }
                }
                self.directory_status = format!("{} remote sessions", list.len());
                self.apply(SessionAction::SetRemoteSessions(list));
            }
            DirectoryEvent::Listed(Err(e)) => {
                self.poll_in_flight = false;
                warn!(error = %e, "directory poll failed");
                self.directory_status = format!("Directory unavailable: {e}");
            }
            DirectoryEvent::Started { id, result: Ok(outcome) } => {
                info!(session = %id, ?outcome, "session configured");
                self.directory_status = format!("Started {id}");
                self.apply(SessionAction::SessionConfigured(id));
            }
            DirectoryEvent::Started { id, result: Err(e) } => {
                warn!(session = %id, error = %e, "failed to start session");
                self.directory_status = format!("Failed to start {id}: {e}");
            }
            DirectoryEvent::Stopped { id, result: Ok(outcome) } => {
                debug!(session = %id, ?outcome, "remote session stopped");
            }
            DirectoryEvent::Stopped { id, result: Err(e) } => {
                warn!(session = %id, error = %e, "failed to stop session");
                self.directory_status = format!("Failed to stop {id}: {e}");
            }
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Ready { width, height, fps } => {
                debug!(width, height, fps, "feed ready");
                self.feed = Some(FeedGeometry { width, height, fps });
            }
            ChannelEvent::Detections(frame) => self.on_detections(frame),
            ChannelEvent::Complete => info!(session = ?self.media_session, "feed complete"),
            ChannelEvent::Error(message) => {
                warn!(session = ?self.media_session, error = %message, "feed reported error")
            }
        }
    }

    fn on_detections(&mut self, frame: DetectionFrame) {
        let Some(session) = self.media_session.clone() else {
            return;
        };
        let now = self.now_ms();
        self.clock =
            std::mem::take(&mut self.clock).record_detection(&session, frame.source_timestamp_ms, now);

        let output = tracker::update(&self.tracking, &frame.detections(), &self.tracker_params);
        let annotations = output
            .visible_detections
            .iter()
            .map(|detection| Annotation {
                detection: detection.clone(),
                vessel: vessel_for(detection, &frame, self.history.latest()),
            })
            .collect::<Vec<_>>();
        debug!(
            frame = frame.frame_index,
            tracked = output.tracking_state.len(),
            visible = annotations.len(),
            "detections"
        );
        self.tracking = output.tracking_state;
        self.history = std::mem::take(&mut self.history).push(VisibleFrame {
            frame_index: frame.frame_index,
            source_timestamp_ms: frame.source_timestamp_ms,
            annotations,
        });
    }

    fn on_media_clock(&mut self, update: MediaClockUpdate) {
        if self.media_session.as_deref() != Some(update.session.as_str()) {
            return;
        }
        let now = self.now_ms();
        let clock = std::mem::take(&mut self.clock);
        self.clock = match update.kind {
            MediaClockKind::PlaybackPosition => {
                clock.record_playback_position(&update.session, update.timestamp_ms, now)
            }
            MediaClockKind::FrameTimestamp => {
                clock.record_frame_timestamp(&update.session, update.timestamp_ms, now)
            }
        };
    }

    fn apply(&mut self, action: SessionAction) {
        self.sessions = std::mem::take(&mut self.sessions).apply(action);
    }

    async fn after_state_change(&mut self) {
        self.sync_media().await;
        self.persist();
        self.publish();
    }

    /// Make the transport and detection feed follow the active session.
    async fn sync_media(&mut self) {
        let wanted = self
            .sessions
            .active()
            .filter(|s| !s.is_placeholder())
            .map(|s| (s.id.clone(), s.playback_endpoints.clone()));

        match wanted {
            Some((id, endpoints)) if self.media_session.as_deref() == Some(id.as_str()) => {
                if endpoints != self.media_endpoints {
                    debug!(session = %id, "playback endpoints changed");
                    self.media_endpoints = endpoints.clone();
                    self.send_transport(TransportCommand::Connect {
                        session: id,
                        endpoints,
                    })
                    .await;
                }
            }
            Some((id, endpoints)) => {
                self.stop_media().await;
                self.start_media(id, endpoints).await;
            }
            None => {
                if self.media_session.is_some() {
                    self.stop_media().await;
                }
            }
        }
    }

    async fn start_media(&mut self, id: String, endpoints: PlaybackEndpoints) {
        info!(session = %id, "switching to session");
        self.generation += 1;
        let overrides = self.overrides.get(&id).cloned().unwrap_or_default();
        let channel = DetectionChannel::open(
            self.config.channel.url_for(&id),
            self.generation,
            &self.config.channel,
            overrides,
            self.channel_tx.clone(),
        );
        self.channel_status = Some(channel.subscribe());
        self.channel = Some(channel);

        self.media_session = Some(id.clone());
        self.media_endpoints = endpoints.clone();
        self.send_transport(TransportCommand::Connect {
            session: id,
            endpoints,
        })
        .await;
    }

    async fn stop_media(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close();
        }
        self.channel_status = None;
        self.send_transport(TransportCommand::Disconnect).await;

        if let Some(previous) = self.media_session.take() {
            debug!(session = %previous, "released session media");
            self.clock = std::mem::take(&mut self.clock).forget(&previous);
        }
        self.media_endpoints.clear();
        self.tracking.clear();
        self.history = std::mem::take(&mut self.history).clear();
        self.feed = None;
    }

    async fn send_transport(&self, cmd: TransportCommand) {
        if let Some(transport) = &self.transport {
            if !transport.send(cmd).await {
                warn!("transport reactor is gone");
            }
        }
    }

    fn poll_directory(&mut self) {
        if self.poll_in_flight {
            return;
        }
        self.poll_in_flight = true;
        let directory = self.directory.clone();
        let tx = self.directory_tx.clone();
        tokio::spawn(async move {
            let result = directory.list_sessions().await;
            let _ = tx.send(DirectoryEvent::Listed(result));
        });
    }

    fn start_remote(&self, id: String, request: StartRequest) {
        let directory = self.directory.clone();
        let tx = self.directory_tx.clone();
        tokio::spawn(async move {
            let result = directory.start_session(&id, &request).await;
            let _ = tx.send(DirectoryEvent::Started { id, result });
        });
    }

    fn stop_remote(&self, id: String) {
        let directory = self.directory.clone();
        let tx = self.directory_tx.clone();
        tokio::spawn(async move {
            let result = directory.stop_session(&id).await;
            let _ = tx.send(DirectoryEvent::Stopped { id, result });
        });
    }

    fn send_heartbeats(&self) {
        let ids = self.sessions.joined_ids();
        debug!(count = ids.len(), "sending heartbeats");
        let directory = self.directory.clone();
        tokio::spawn(async move {
            for id in ids {
                directory.heartbeat(&id).await;
            }
        });
    }

    fn persist(&mut self) {
        let prefs = self.sessions.prefs();
        if prefs != self.saved_prefs {
            prefs.save(&self.state_dir);
            self.saved_prefs = prefs;
        }
    }

    fn now_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    fn publish(&mut self) {
        let now = self.now_ms();
        let mut snapshot = EngineSnapshot::new(&self.sessions);
        if let Some(rx) = self.transport_status.as_mut() {
            snapshot.transport = rx.borrow_and_update().clone();
        }
        if let Some(rx) = self.channel_status.as_mut() {
            snapshot.channel = rx.borrow_and_update().clone();
        }
        snapshot.directory_status = self.directory_status.clone();
        snapshot.feed = self.feed;

        if let Some(session) = &self.media_session {
            let display = self.clock.detection_display_clock(session, now);
            snapshot.display_clock_ms = display;
            snapshot.frame = match display {
                Some(ts) => self.history.frame_at(ts).cloned(),
                None => self.history.latest().cloned(),
            };
            snapshot.latency = self.clock.latency(session);
        }

        self.snapshot_tx.send_replace(snapshot);
    }

    async fn shutdown(&mut self) {
        info!("engine shutting down");
        if let Some(channel) = self.channel.take() {
            channel.shutdown().await;
        }
        self.channel_status = None;
        if let Some(transport) = self.transport.take() {
            transport.shutdown().await;
        }
        self.transport_status = None;
        self.media_session = None;

        let prefs = self.sessions.prefs();
        prefs.save(&self.state_dir);
        self.saved_prefs = prefs;
        self.publish();
    }
}

/// Vessel identity for a visible detection: from this frame when the box is
/// fresh, otherwise carried over from the last drawn frame for held boxes.
fn vessel_for(
    detection: &RawDetection,
    frame: &DetectionFrame,
    previous: Option<&VisibleFrame>,
) -> Option<crate::channel::VesselInfo> {
    frame
        .vessels
        .iter()
        .find(|entry| &entry.detection == detection)
        .and_then(|entry| entry.vessel.clone())
        .or_else(|| {
            previous?
                .annotations
                .iter()
                .find(|a| &a.detection == detection)
                .and_then(|a| a.vessel.clone())
        })
}
