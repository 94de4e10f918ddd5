//! Seam between the transport state machine and the local media stack.
//!
//! The engine doesn't decode video itself. A [`MediaPeerFactory`] hands out
//! one [`MediaPeer`] per connection attempt; the peer performs offer/answer,
//! owns the received track, and reports what the player sees through a
//! [`MediaEventSink`] stamped with the attempt it belongs to.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::link::RelayDescriptor;
use crate::error::MediaError;

/// Media-element and connection events, in the order the player reports them.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// Remote track is available for tuning and attachment.
    TrackArrived,
    /// First frame decoded.
    FirstFrame,
    Playing,
    Waiting,
    Stalled,
    DecodeError(String),
    /// Player position in source milliseconds.
    PlaybackPosition(f64),
    /// Source timestamp carried by a decoded frame.
    FrameTimestamp(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaggedMediaEvent {
    pub attempt: u64,
    pub event: MediaEvent,
}

/// Cloneable handle a peer uses to report events for one attempt.
#[derive(Debug, Clone)]
pub struct MediaEventSink {
    attempt: u64,
    tx: mpsc::UnboundedSender<TaggedMediaEvent>,
}

impl MediaEventSink {
    pub fn new(attempt: u64, tx: mpsc::UnboundedSender<TaggedMediaEvent>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Returns false once the transport is gone.
    pub fn emit(&self, event: MediaEvent) -> bool {
        self.tx
            .send(TaggedMediaEvent {
                attempt: self.attempt,
                event,
            })
            .is_ok()
    }
}

/// Settings for a fresh peer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeerConfig {
    pub relays: Vec<RelayDescriptor>,
}

/// Local media-negotiation primitive for one connection attempt.
#[async_trait]
pub trait MediaPeer: Send {
    /// Create a receive-only offer and set it as the local description.
    async fn create_offer(&mut self) -> Result<(), MediaError>;

    /// Resolves once address gathering finishes. Callers bound the wait.
    async fn gathering_complete(&mut self);

    /// Current local description, including whatever candidates are known.
    fn local_description(&self) -> Option<String>;

    async fn apply_answer(&mut self, sdp: &str) -> Result<(), MediaError>;

    /// Push jitter-buffer and playout-delay hints to their minimum.
    fn tune_latency(&mut self) -> Result<(), MediaError>;

    fn attach_track(&mut self) -> Result<(), MediaError>;

    fn detach_track(&mut self);

    async fn close(&mut self);
}

pub trait MediaPeerFactory: Send + Sync {
    fn create(
        &self,
        config: PeerConfig,
        events: MediaEventSink,
    ) -> Result<Box<dyn MediaPeer>, MediaError>;
}
