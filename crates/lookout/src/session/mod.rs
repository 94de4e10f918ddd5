//! Session lifecycle: which feeds the operator has open, which one is on
//! screen, and the optional "configure a new feed" placeholder.
//!
//! All transitions go through [`SessionState::apply`], a pure reducer over
//! [`SessionAction`]. Lookups such as "is the active tab the placeholder"
//! are computed from the session list, never stored separately.

mod prefs;
mod reducer;

pub use prefs::SessionPrefs;
pub use reducer::reduce;

use serde::Serialize;

use crate::directory::{PlaybackEndpoints, RemoteSession};

/// Reserved session that is always joined.
pub const DEFAULT_SESSION: &str = "default";

/// Base name for placeholder ids: `stream`, `stream-2`, `stream-3`, ...
pub const PLACEHOLDER_PREFIX: &str = "stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Joined,
    Configuring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    /// Not reported, or reported in a form we don't understand.
    Unknown,
    Starting,
    Running,
    Absent,
}

impl RemoteStatus {
    /// Map a directory status string. Unrecognized values are `Unknown`.
    pub fn from_remote(status: Option<&str>) -> Self {
        match status.map(str::trim).map(str::to_ascii_lowercase).as_deref() {
            Some("running") | Some("ready") | Some("live") => RemoteStatus::Running,
            Some("starting") | Some("pending") | Some("queued") => RemoteStatus::Starting,
            Some("stopped") | Some("exited") | Some("absent") => RemoteStatus::Absent,
            _ => RemoteStatus::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteStatus::Unknown => "unknown",
            RemoteStatus::Starting => "starting",
            RemoteStatus::Running => "running",
            RemoteStatus::Absent => "absent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    pub membership: Membership,
    pub remote_status: RemoteStatus,
    pub playback_endpoints: PlaybackEndpoints,
}

impl Session {
    pub fn joined(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            membership: Membership::Joined,
            remote_status: RemoteStatus::Unknown,
            playback_endpoints: PlaybackEndpoints::new(),
        }
    }

    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            membership: Membership::Configuring,
            ..Self::joined(id)
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.membership == Membership::Configuring
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_SESSION
    }

    fn absorb_remote(&mut self, remote: &RemoteSession) {
        self.remote_status = RemoteStatus::from_remote(remote.status.as_deref());
        self.playback_endpoints = remote.playback_endpoints.clone();
    }
}

/// Reducer input.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    AddSession,
    CloseSession(String),
    SelectSession(String),
    SessionConfigured(String),
    SetRemoteSessions(Vec<RemoteSession>),
    JoinExternalSession(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    sessions: Vec<Session>,
    active: String,
    /// Last remote inventory applied by reconciliation.
    #[serde(skip)]
    remote: Option<Vec<RemoteSession>>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            sessions: vec![Session::joined(DEFAULT_SESSION)],
            active: DEFAULT_SESSION.to_string(),
            remote: None,
        }
    }
}

impl SessionState {
    /// Rebuild from persisted preferences. `default` always comes first and
    /// an unknown active id falls back to it.
    pub fn restore(prefs: &SessionPrefs) -> Self {
        let mut state = Self::default();
        for id in &prefs.joined {
            if id.is_empty() || state.get(id).is_some() {
                continue;
            }
            state.sessions.push(Session::joined(id.as_str()));
        }
        if state.get(&prefs.active).is_some() {
            state.active = prefs.active.clone();
        }
        state
    }

    pub fn prefs(&self) -> SessionPrefs {
        SessionPrefs {
            active: if self.active_is_placeholder() {
                DEFAULT_SESSION.to_string()
            } else {
                self.active.clone()
            },
            joined: self.joined_ids(),
        }
    }

    pub fn apply(self, action: SessionAction) -> Self {
        reduce(self, action)
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn active_id(&self) -> &str {
        &self.active
    }

    pub fn active(&self) -> Option<&Session> {
        self.get(&self.active)
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    /// Joined session ids in display order.
    pub fn joined_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|s| s.membership == Membership::Joined)
            .map(|s| s.id.clone())
            .collect()
    }

    /// The configure placeholder, if one exists.
    pub fn configuring(&self) -> Option<&Session> {
        self.sessions.iter().find(|s| s.is_placeholder())
    }

    pub fn active_is_placeholder(&self) -> bool {
        self.active().is_some_and(Session::is_placeholder)
    }

    pub fn remote(&self) -> Option<&[RemoteSession]> {
        self.remote.as_deref()
    }

    fn remote_entry(&self, id: &str) -> Option<&RemoteSession> {
        self.remote.as_ref()?.iter().find(|r| r.id == id)
    }

    fn is_taken(&self, id: &str) -> bool {
        self.get(id).is_some() || self.remote_entry(id).is_some()
    }

    /// First id in `stream`, `stream-2`, ... not used locally or remotely.
    fn allocate_placeholder_id(&self) -> String {
        if !self.is_taken(PLACEHOLDER_PREFIX) {
            return PLACEHOLDER_PREFIX.to_string();
        }
        (2u32..)
            .map(|n| format!("{PLACEHOLDER_PREFIX}-{n}"))
            .find(|id| !self.is_taken(id))
            .unwrap_or_else(|| PLACEHOLDER_PREFIX.to_string())
    }
}
