//! Media transport for the active session.
//!
//! A single reactor task owns the live media peer and everything attached to
//! it. Callers drive it with [`TransportCommand`]s and watch
//! [`TransportConnection`] for status:
//!
//! ```text
//! idle ──Connect──▶ connecting ──first frame──▶ playing ◀──▶ stalled
//!                       │                          │            │
//!                       └──────── error ◀──────────┴────────────┘
//!                                   │
//!                          reconnect after backoff
//! ```
//!
//! Every negotiation attempt gets a fresh attempt number; handshake results
//! and media events from any other attempt are dropped.

mod backoff;
mod handshake;
mod link;
mod peer;
mod reactor;

pub use backoff::ReconnectPolicy;
pub use handshake::{discover_relays, negotiate, terminate, Negotiated, SDP_CONTENT_TYPE};
pub use link::{parse_link_header, RelayDescriptor};
pub use peer::{
    MediaEvent, MediaEventSink, MediaPeer, MediaPeerFactory, PeerConfig, TaggedMediaEvent,
};
pub use reactor::{spawn, spawn_with_client, TransportHandle};

use serde::Serialize;

use crate::directory::PlaybackEndpoints;

/// Endpoint kinds the transport can negotiate, in preference order.
pub const SUPPORTED_KINDS: &[&str] = &["whep", "webrtc"];

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCommand {
    /// Connect to `session`, replacing any current connection.
    Connect {
        session: String,
        endpoints: PlaybackEndpoints,
    },
    Disconnect,
    /// The viewer became visible again; reconnect now if not playing.
    VisibilityRegained,
    /// Clear the failure counter and retry immediately if in error.
    ResetAttempts,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportStatus {
    Idle,
    Connecting,
    Playing,
    Stalled,
    Error,
}

impl TransportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportStatus::Idle => "idle",
            TransportStatus::Connecting => "connecting",
            TransportStatus::Playing => "playing",
            TransportStatus::Stalled => "stalled",
            TransportStatus::Error => "error",
        }
    }
}

/// Published view of the current connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransportConnection {
    pub session: Option<String>,
    pub status: TransportStatus,
    pub transport_kind: Option<String>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl Default for TransportConnection {
    fn default() -> Self {
        Self {
            session: None,
            status: TransportStatus::Idle,
            transport_kind: None,
            attempt_count: 0,
            last_error: None,
        }
    }
}

/// Which clock a media timestamp feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClockKind {
    PlaybackPosition,
    FrameTimestamp,
}

/// Timestamp observed by the player, forwarded for clock alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaClockUpdate {
    pub session: String,
    pub kind: MediaClockKind,
    pub timestamp_ms: f64,
}

/// First supported `(kind, url)` in preference order.
pub fn pick_endpoint(endpoints: &PlaybackEndpoints) -> Option<(&str, &str)> {
    SUPPORTED_KINDS.iter().find_map(|kind| {
        endpoints
            .get(*kind)
            .filter(|url| !url.trim().is_empty())
            .map(|url| (*kind, url.as_str()))
    })
}
