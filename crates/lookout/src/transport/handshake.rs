//! Offer/answer exchange against a playback endpoint.
//!
//! One attempt is:
//!
//! 1. `OPTIONS <playback_url>` to discover relays from `Link` headers
//! 2. create a receive-only offer, wait at most `gather_timeout` for address
//!    gathering
//! 3. `POST <playback_url>` with the offer as `application/sdp`; the response
//!    `Location` is the termination URL and the body is the answer
//! 4. apply the answer
//!
//! The whole exchange is cancelable. A cancelled attempt closes its own peer.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, LINK, LOCATION};
use reqwest::{Method, Url};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::link::{parse_link_header, RelayDescriptor};
use super::peer::{MediaEventSink, MediaPeer, MediaPeerFactory, PeerConfig};
use crate::error::{HandshakeError, MediaError};

pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// A completed negotiation. The peer is live and owned by the caller.
pub struct Negotiated {
    pub peer: Box<dyn MediaPeer>,
    pub termination_url: Option<Url>,
    pub relays: Vec<RelayDescriptor>,
}

impl std::fmt::Debug for Negotiated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiated")
            .field("termination_url", &self.termination_url)
            .field("relays", &self.relays.len())
            .finish_non_exhaustive()
    }
}

/// `OPTIONS` the playback URL and collect relay descriptors.
///
/// Any failure yields an empty list; negotiation proceeds without relays.
pub async fn discover_relays(http: &reqwest::Client, playback_url: &Url) -> Vec<RelayDescriptor> {
    let response = match http.request(Method::OPTIONS, playback_url.clone()).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %playback_url, error = %e, "relay discovery failed, continuing without relays");
            return Vec::new();
        }
    };
    if !response.status().is_success() {
        debug!(url = %playback_url, status = response.status().as_u16(), "relay discovery not supported");
        return Vec::new();
    }

    let joined = response
        .headers()
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(",");
    let relays = parse_link_header(&joined);
    debug!(url = %playback_url, count = relays.len(), "discovered relays");
    relays
}

/// Run one full attempt. Returns `Ok(None)` if `cancel` fired first.
pub async fn negotiate(
    http: &reqwest::Client,
    factory: &dyn MediaPeerFactory,
    playback_url: &Url,
    gather_timeout: Duration,
    events: MediaEventSink,
    cancel: &CancellationToken,
) -> Result<Option<Negotiated>, HandshakeError> {
    let attempt = events.attempt();

    let relays = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(None),
        relays = discover_relays(http, playback_url) => relays,
    };

    let mut peer = factory.create(PeerConfig { relays: relays.clone() }, events)?;

    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = exchange(http, peer.as_mut(), playback_url, gather_timeout) => Some(result),
    };

    match outcome {
        Some(Ok(termination_url)) => {
            info!(url = %playback_url, attempt, "negotiation complete");
            Ok(Some(Negotiated {
                peer,
                termination_url,
                relays,
            }))
        }
        Some(Err(e)) => {
            peer.close().await;
            Err(e)
        }
        None => {
            debug!(url = %playback_url, attempt, "negotiation cancelled");
            peer.close().await;
            Ok(None)
        }
    }
}

async fn exchange(
    http: &reqwest::Client,
    peer: &mut dyn MediaPeer,
    playback_url: &Url,
    gather_timeout: Duration,
) -> Result<Option<Url>, HandshakeError> {
    peer.create_offer().await?;

    if tokio::time::timeout(gather_timeout, peer.gathering_complete())
        .await
        .is_err()
    {
        debug!(
            url = %playback_url,
            timeout_ms = gather_timeout.as_millis() as u64,
            "gathering incomplete, sending offer as is"
        );
    }

    let offer = peer
        .local_description()
        .ok_or_else(|| MediaError::new("no local description after offer"))?;

    let response = http
        .post(playback_url.clone())
        .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
        .body(offer)
        .send()
        .await
        .map_err(|e| HandshakeError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(HandshakeError::Rejected {
            status: status.as_u16(),
        });
    }

    let termination_url = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|location| match playback_url.join(location) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(location, error = %e, "ignoring unparsable Location");
                None
            }
        });

    let answer = response
        .text()
        .await
        .map_err(|e| HandshakeError::Transport(e.to_string()))?;
    peer.apply_answer(&answer).await?;

    Ok(termination_url)
}

/// Best-effort `DELETE` of a negotiated session.
pub async fn terminate(http: &reqwest::Client, termination_url: Url) {
    match http.delete(termination_url.clone()).send().await {
        Ok(response) => debug!(
            url = %termination_url,
            status = response.status().as_u16(),
            "terminated media session"
        ),
        Err(e) => debug!(url = %termination_url, error = %e, "termination request failed"),
    }
}
