//! Lookout: live session, media transport and detection synchronization for
//! annotated maritime video.
//!
//! The crate is organised leaves first:
//!
//! - [`directory`]: REST client for the remote session inventory
//! - [`tracker`]: pure identity tracker with appearance/disappearance hysteresis
//! - [`clock`]: pure display clock, latency percentiles and displayed history
//! - [`transport`]: media connection reactor (handshake, watchdogs, backoff)
//! - [`channel`]: websocket subscription to the detection feed
//! - [`session`]: session lifecycle reducer and persisted preferences
//! - [`engine`]: reactor wiring all of the above into [`EngineSnapshot`]s

pub mod channel;
pub mod clock;
pub mod directory;
pub mod engine;
pub mod error;
pub mod session;
pub mod timer;
pub mod tracker;
pub mod transport;

pub use channel::{ChannelEvent, ChannelState, DetectionChannel, VesselInfo};
pub use clock::{ClockState, FrameHistory, LatencyStats, VisibleFrame};
pub use directory::{DirectoryClient, PlaybackEndpoints, RemoteSession};
pub use engine::{Engine, EngineCommand, EngineHandle, EngineSnapshot};
pub use error::{ChannelError, DirectoryError, EngineError, HandshakeError, MediaError};
pub use session::{Session, SessionAction, SessionState, DEFAULT_SESSION};
pub use tracker::{RawDetection, TrackedIdentity, TrackerOutput, TrackerParams};
pub use transport::{
    MediaEvent, MediaPeer, MediaPeerFactory, TransportCommand, TransportConnection,
    TransportStatus,
};
