use serde::Serialize;

use crate::channel::ChannelState;
use crate::clock::{LatencyStats, VisibleFrame};
use crate::session::{Session, SessionState};
use crate::transport::TransportConnection;

/// Source geometry reported by the feed's `ready` event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeedGeometry {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Everything a renderer needs for one paint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub sessions: Vec<Session>,
    pub active: String,
    pub active_is_placeholder: bool,
    pub transport: TransportConnection,
    pub channel: ChannelState,
    pub directory_status: String,
    pub feed: Option<FeedGeometry>,
    /// Frame whose source timestamp matches the display clock.
    pub frame: Option<VisibleFrame>,
    pub display_clock_ms: Option<f64>,
    pub latency: LatencyStats,
}

impl EngineSnapshot {
    pub fn new(sessions: &SessionState) -> Self {
        Self {
            sessions: sessions.sessions().to_vec(),
            active: sessions.active_id().to_string(),
            active_is_placeholder: sessions.active_is_placeholder(),
            transport: TransportConnection::default(),
            channel: ChannelState::Idle,
            directory_status: "not yet polled".to_string(),
            feed: None,
            frame: None,
            display_clock_ms: None,
            latency: LatencyStats::default(),
        }
    }

    pub fn session(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }
}
