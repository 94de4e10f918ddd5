//! Error taxonomy for the live engine.
//!
//! None of these cross a component boundary as a hard failure. Each owning
//! component recovers locally (retry, backoff, fixed-delay reconnect) and
//! surfaces only a human-readable status string upward.

use thiserror::Error;

/// Remote session directory request failed.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("Malformed directory response: {0}")]
    Decode(String),

    #[error("Invalid directory URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            DirectoryError::Decode(err.to_string())
        } else {
            DirectoryError::Transport(err.to_string())
        }
    }
}

/// Media negotiation failed for one connection attempt.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("No playable endpoint for session {0}")]
    NoEndpoint(String),

    #[error("Invalid playback URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Offer generation failed: {0}")]
    Offer(#[from] MediaError),

    #[error("Negotiation request failed: {0}")]
    Transport(String),

    #[error("Negotiation rejected with HTTP {status}")]
    Rejected { status: u16 },
}

/// Failure reported by the local media primitive.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct MediaError(pub String);

impl MediaError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Detection subscription failed or closed uncleanly.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Stream closed unexpectedly")]
    UncleanClose,

    #[error("Stream error: {0}")]
    Remote(String),

    #[error("Failed to send config: {0}")]
    Config(String),
}

/// Engine could not be started.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Transport setup failed: {0}")]
    Transport(#[from] HandshakeError),
}
