use super::{
    Membership, RemoteStatus, Session, SessionAction, SessionState, DEFAULT_SESSION,
};
use crate::directory::RemoteSession;

/// Apply one action. Never fails; actions that don't make sense for the
/// current state return it unchanged.
pub fn reduce(state: SessionState, action: SessionAction) -> SessionState {
    match action {
        SessionAction::AddSession => add_session(state),
        SessionAction::CloseSession(id) => close_session(state, &id),
        SessionAction::SelectSession(id) => select_session(state, id),
        SessionAction::SessionConfigured(id) => session_configured(state, id),
        SessionAction::SetRemoteSessions(list) => set_remote_sessions(state, list),
        SessionAction::JoinExternalSession(id) => join_external(state, id),
    }
}

fn add_session(mut state: SessionState) -> SessionState {
    if let Some(placeholder) = state.configuring() {
        state.active = placeholder.id.clone();
        return state;
    }
    let id = state.allocate_placeholder_id();
    state.sessions.push(Session::placeholder(id.as_str()));
    state.active = id;
    state
}

fn close_session(mut state: SessionState, id: &str) -> SessionState {
    if id == DEFAULT_SESSION || state.get(id).is_none() {
        return state;
    }
    state.sessions.retain(|s| s.id != id);

    if state.active == id {
        match state
            .sessions
            .iter()
            .find(|s| s.membership == Membership::Joined)
        {
            Some(next) => state.active = next.id.clone(),
            None => {
                let placeholder = match state.configuring() {
                    Some(existing) => existing.id.clone(),
                    None => {
                        let fresh = state.allocate_placeholder_id();
                        state.sessions.push(Session::placeholder(fresh.as_str()));
                        fresh
                    }
                };
                state.active = placeholder;
            }
        }
    }
    state
}

fn select_session(mut state: SessionState, id: String) -> SessionState {
    if state.get(&id).is_some() {
        state.active = id;
    }
    state
}

fn session_configured(mut state: SessionState, id: String) -> SessionState {
    let Some(index) = state.sessions.iter().position(Session::is_placeholder) else {
        return state;
    };

    let already_joined = state
        .sessions
        .iter()
        .any(|s| s.id == id && s.membership == Membership::Joined);
    if already_joined {
        state.sessions.remove(index);
        state.active = id;
        return state;
    }

    let remote = state.remote_entry(&id).cloned();
    let session = &mut state.sessions[index];
    session.id = id.clone();
    session.membership = Membership::Joined;
    session.remote_status = RemoteStatus::Starting;
    if let Some(remote) = remote {
        session.playback_endpoints = remote.playback_endpoints;
    }
    state.active = id;
    state
}

fn join_external(mut state: SessionState, id: String) -> SessionState {
    if id.is_empty() {
        return state;
    }
    if state.get(&id).is_none() {
        let mut session = Session::joined(id.as_str());
        if let Some(remote) = state.remote_entry(&id) {
            session.absorb_remote(remote);
        }
        state.sessions.push(session);
    }
    state.active = id;
    state
}

fn set_remote_sessions(mut state: SessionState, list: Vec<RemoteSession>) -> SessionState {
    // Absorbing is idempotent, so run it on every poll: a local `starting`
    // must still converge when the inventory itself has not moved.
    for session in state.sessions.iter_mut() {
        match list.iter().find(|r| r.id == session.id) {
            Some(remote) => session.absorb_remote(remote),
            None if session.is_placeholder() => {}
            None if session.remote_status == RemoteStatus::Starting => {}
            None => {
                session.remote_status = RemoteStatus::Absent;
                session.playback_endpoints.clear();
            }
        }
    }
    state.remote = Some(list);

    let remote_ids: Vec<&str> = state
        .remote
        .iter()
        .flatten()
        .map(|r| r.id.as_str())
        .collect();
    let active = state.active.clone();
    state.sessions.retain(|s| {
        s.is_default()
            || s.is_placeholder()
            || s.id == active
            || remote_ids.contains(&s.id.as_str())
    });

    if state.get(DEFAULT_SESSION).is_none() {
        let mut default = Session::joined(DEFAULT_SESSION);
        default.remote_status = RemoteStatus::Absent;
        state.sessions.insert(0, default);
    }

    let has_configured = state
        .sessions
        .iter()
        .any(|s| s.membership == Membership::Joined && !s.is_default());
    if !has_configured && state.configuring().is_none() {
        let id = state.allocate_placeholder_id();
        state.sessions.push(Session::placeholder(id));
    }

    state
}
