//! Detection feed subscription.
//!
//! One [`DetectionChannel`] per active session streams `ready`,
//! `detections`, `complete` and `error` events from the backend. The
//! subscription reconnects on its own after an unclean close or an `error`
//! event, and stops for good once the feed reports `complete`.

mod events;
mod subscriber;

pub use events::{
    ChannelEvent, ChannelMessage, DetectionFrame, FeedMessage, VesselEntry, VesselInfo,
};
pub use subscriber::{config_payload, DetectionChannel};

use serde::Serialize;

/// Subscription lifecycle as seen by the renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum ChannelState {
    #[default]
    Idle,
    Loading,
    Connected,
    Error(String),
}

impl ChannelState {
    pub fn label(&self) -> String {
        match self {
            ChannelState::Idle => "idle".to_string(),
            ChannelState::Loading => "loading".to_string(),
            ChannelState::Connected => "connected".to_string(),
            ChannelState::Error(message) => format!("error: {message}"),
        }
    }
}
