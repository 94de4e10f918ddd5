//! REST client for the remote session directory.
//!
//! The directory is the authority on which feeds are running. It is also
//! eventually consistent, so callers treat "already running" and "already
//! gone" as success and poll again rather than trusting a single answer.

use std::collections::BTreeMap;
use std::time::Duration;

use lookoutconf::DirectoryConfig;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::error::DirectoryError;

/// Transport kind to playback URL, as reported under `playback_urls`.
pub type PlaybackEndpoints = BTreeMap<String, String>;

/// One entry of `GET /sessions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSession {
    #[serde(rename = "stream_id")]
    pub id: String,
    /// Raw status string. Anything that isn't a string decodes to `None`.
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: Option<String>,
    #[serde(default, rename = "playback_urls", deserialize_with = "lenient_endpoints")]
    pub playback_endpoints: PlaybackEndpoints,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        _ => None,
    })
}

fn lenient_endpoints<'de, D>(deserializer: D) -> Result<PlaybackEndpoints, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let Some(serde_json::Value::Object(map)) = value else {
        return Ok(PlaybackEndpoints::new());
    };
    Ok(map
        .into_iter()
        .filter_map(|(kind, url)| match url {
            serde_json::Value::String(url) => Some((kind, url)),
            _ => None,
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct SessionList {
    #[serde(default)]
    streams: Vec<RemoteSession>,
}

/// Body of `POST /sessions/{id}/start`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(rename = "loop")]
    pub looping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyGone,
}

#[derive(Debug, Clone)]
pub struct DirectoryClient {
    http: reqwest::Client,
    base: Url,
}

impl DirectoryClient {
    pub fn new(config: &DirectoryConfig) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Self::with_client(&config.base_url, http)
    }

    pub fn with_client(base_url: &str, http: reqwest::Client) -> Result<Self, DirectoryError> {
        let base = Url::parse(base_url)
            .map_err(|e| DirectoryError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(DirectoryError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| DirectoryError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `GET /sessions`
    pub async fn list_sessions(&self) -> Result<Vec<RemoteSession>, DirectoryError> {
        let url = self.endpoint(&["sessions"])?;
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let list: SessionList = response.json().await?;
        debug!(count = list.streams.len(), "directory listed sessions");
        Ok(list.streams)
    }

    /// `POST /sessions/{id}/start`. 409 means it was already running.
    pub async fn start_session(
        &self,
        id: &str,
        request: &StartRequest,
    ) -> Result<StartOutcome, DirectoryError> {
        let url = self.endpoint(&["sessions", id, "start"])?;
        let response = self.http.post(url.clone()).json(request).send().await?;
        match response.status() {
            StatusCode::CONFLICT => {
                info!(session = %id, "session already running");
                Ok(StartOutcome::AlreadyRunning)
            }
            status if status.is_success() => {
                info!(session = %id, "session started");
                Ok(StartOutcome::Started)
            }
            status => Err(DirectoryError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    /// `DELETE /sessions/{id}`. 404 means it was already gone.
    pub async fn stop_session(&self, id: &str) -> Result<StopOutcome, DirectoryError> {
        let url = self.endpoint(&["sessions", id])?;
        let response = self.http.delete(url.clone()).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(StopOutcome::AlreadyGone),
            status if status.is_success() => {
                info!(session = %id, "session stopped");
                Ok(StopOutcome::Stopped)
            }
            status => Err(DirectoryError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    /// `POST /sessions/{id}/heartbeat`. Failures are only logged.
    pub async fn heartbeat(&self, id: &str) {
        let url = match self.endpoint(&["sessions", id, "heartbeat"]) {
            Ok(url) => url,
            Err(e) => {
                debug!(session = %id, error = %e, "heartbeat skipped");
                return;
            }
        };
        match self.http.post(url).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                debug!(session = %id, status = response.status().as_u16(), "heartbeat rejected")
            }
            Err(e) => debug!(session = %id, error = %e, "heartbeat failed"),
        }
    }
}
