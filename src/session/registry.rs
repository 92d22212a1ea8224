//! Session registry
//!
//! The central table pairing each identity with at most one client and one
//! viewer connection, plus the session's call mode and audio counters. The
//! map is sharded and each session carries its own mutex, so mutations on
//! unrelated identities never serialize against each other. Locks are never
//! held across await points; forwarding hands frames to a connection's
//! outbound channel, which never blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::auth::AllowList;
use crate::error::SessionError;
use crate::protocol::{CallMode, MessageClass, Role};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Frame handed to a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    /// Ask the writer to close the socket and stop.
    Close,
}

/// Handle to one live endpoint connection.
///
/// Owned by the registry slot it is bound to; the writer task on the other
/// end of `outbound` owns the actual socket sink. Sending [`OutboundFrame::Close`]
/// is the destructor path.
#[derive(Debug, Clone)]
pub struct Connection {
    id: u64,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    remote_addr: String,
    connected_at: Instant,
}

impl Connection {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundFrame>, remote_addr: impl Into<String>) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            outbound,
            remote_addr: remote_addr.into(),
            connected_at: Instant::now(),
        }
    }

    /// Process-unique id, used to guard teardown after a slot was replaced.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Queue a text frame. Returns false when the writer is gone, which the
    /// caller treats the same as an unbound peer.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.outbound.send(OutboundFrame::Text(text.into())).is_ok()
    }

    /// Ask the writer task to close the socket.
    pub fn close(&self) {
        let _ = self.outbound.send(OutboundFrame::Close);
    }
}

/// Mutable per-identity state, guarded by the session's own mutex.
#[derive(Debug)]
struct SessionState {
    client: Option<Connection>,
    viewer: Option<Connection>,
    call_mode: CallMode,
    created_at: Instant,
    last_pong: Option<Instant>,
    forwarded_system: u64,
    forwarded_mic: u64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            client: None,
            viewer: None,
            call_mode: CallMode::Off,
            created_at: Instant::now(),
            last_pong: None,
            forwarded_system: 0,
            forwarded_mic: 0,
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Option<Connection> {
        match role {
            Role::Client => &mut self.client,
            Role::Viewer => &mut self.viewer,
        }
    }

    fn slot(&self, role: Role) -> &Option<Connection> {
        match role {
            Role::Client => &self.client,
            Role::Viewer => &self.viewer,
        }
    }

    fn is_empty(&self) -> bool {
        self.client.is_none() && self.viewer.is_none()
    }
}

/// Read-only snapshot of one session, served by the status API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub audio_client_connected: bool,
    pub audio_viewer_connected: bool,
    pub client_ip: Option<String>,
    pub viewer_ip: Option<String>,
    pub call_mode: CallMode,
    pub system_audio_count: u64,
    pub mic_audio_count: u64,
    pub uptime_seconds: u64,
    /// Seconds since the last ping response from the source, if any
    pub last_pong_seconds: Option<u64>,
}

impl SessionStatus {
    fn unbound() -> Self {
        Self {
            audio_client_connected: false,
            audio_viewer_connected: false,
            client_ip: None,
            viewer_ip: None,
            call_mode: CallMode::Off,
            system_audio_count: 0,
            mic_audio_count: 0,
            uptime_seconds: 0,
            last_pong_seconds: None,
        }
    }
}

/// Registry of live sessions, keyed by identity.
pub struct SessionRegistry {
    sessions: DashMap<String, Mutex<SessionState>>,
    allow_list: Arc<AllowList>,
}

impl SessionRegistry {
    pub fn new(allow_list: Arc<AllowList>) -> Self {
        Self {
            sessions: DashMap::new(),
            allow_list,
        }
    }

    /// Bind `conn` to the `role` slot for `identity`.
    ///
    /// Creates the session on first connect with `call_mode = off`. If the
    /// slot is already bound, the previous connection is closed and replaced:
    /// a single physical source is expected to reconnect after a drop and
    /// must reclaim its slot.
    pub fn register(
        &self,
        identity: &str,
        role: Role,
        conn: Connection,
    ) -> Result<(), SessionError> {
        if identity.is_empty() {
            return Err(SessionError::EmptyIdentity);
        }
        if !self.allow_list.is_allowed(identity) {
            return Err(SessionError::Unauthorized(identity.to_string()));
        }

        let conn_id = conn.id();
        let remote = conn.remote_addr().to_string();
        let entry = self
            .sessions
            .entry(identity.to_string())
            .or_insert_with(|| Mutex::new(SessionState::new()));
        let mut state = entry.lock();

        if let Some(old) = state.slot_mut(role).replace(conn) {
            old.close();
            tracing::info!(
                identity,
                role = %role,
                old_conn = old.id(),
                new_conn = conn_id,
                "Replaced existing connection"
            );
        } else {
            tracing::info!(identity, role = %role, remote = %remote, conn = conn_id, "Endpoint connected");
        }

        Ok(())
    }

    /// Remove the `role` binding for `identity`, but only if `conn_id` still
    /// owns the slot; a connection that was replaced must not tear down its
    /// successor. Deletes the session once both slots are empty.
    pub fn unregister(&self, identity: &str, role: Role, conn_id: u64) {
        let mut last_endpoint = false;
        if let Some(entry) = self.sessions.get(identity) {
            let mut state = entry.lock();
            let slot = state.slot_mut(role);
            if slot.as_ref().map(Connection::id) == Some(conn_id) {
                *slot = None;
                tracing::info!(identity, role = %role, conn = conn_id, "Endpoint disconnected");
            }
            last_endpoint = state.is_empty();
        }

        if last_endpoint {
            let removed = self
                .sessions
                .remove_if(identity, |_, state| state.lock().is_empty());
            if removed.is_some() {
                tracing::info!(identity, "Session destroyed");
            }
        }
    }

    /// The connection bound to `role`, if any. Non-failing.
    pub fn lookup(&self, identity: &str, role: Role) -> Option<Connection> {
        self.sessions
            .get(identity)
            .and_then(|entry| entry.lock().slot(role).clone())
    }

    /// Set the call mode. Silent no-op when the session no longer exists;
    /// a mode change may legitimately arrive after teardown.
    pub fn set_mode(&self, identity: &str, mode: CallMode) {
        if let Some(entry) = self.sessions.get(identity) {
            entry.lock().call_mode = mode;
            tracing::info!(identity, mode = %mode, "Call mode changed");
        }
    }

    /// Current call mode, `off` when the session does not exist.
    pub fn mode(&self, identity: &str) -> CallMode {
        self.sessions
            .get(identity)
            .map(|entry| entry.lock().call_mode)
            .unwrap_or_default()
    }

    /// Count a forwarded audio message against its class.
    pub fn record_forwarded(&self, identity: &str, class: MessageClass) {
        if let Some(entry) = self.sessions.get(identity) {
            let mut state = entry.lock();
            match class {
                MessageClass::SourceSystemAudio => state.forwarded_system += 1,
                MessageClass::SourceMicAudio => state.forwarded_mic += 1,
                MessageClass::ViewerVoice => {}
            }
        }
    }

    /// Note a ping response from the source; liveness bookkeeping only.
    pub fn record_pong(&self, identity: &str) {
        if let Some(entry) = self.sessions.get(identity) {
            entry.lock().last_pong = Some(Instant::now());
        }
    }

    /// Read-only snapshot for the status API. An identity with no session
    /// reports everything unbound rather than an error.
    pub fn status(&self, identity: &str) -> SessionStatus {
        let Some(entry) = self.sessions.get(identity) else {
            return SessionStatus::unbound();
        };
        let state = entry.lock();
        SessionStatus {
            audio_client_connected: state.client.is_some(),
            audio_viewer_connected: state.viewer.is_some(),
            client_ip: state.client.as_ref().map(|c| c.remote_addr().to_string()),
            viewer_ip: state.viewer.as_ref().map(|c| c.remote_addr().to_string()),
            call_mode: state.call_mode,
            system_audio_count: state.forwarded_system,
            mic_audio_count: state.forwarded_mic,
            uptime_seconds: state
                .client
                .as_ref()
                .map(|c| c.connected_at().elapsed().as_secs())
                .unwrap_or(0),
            last_pong_seconds: state.last_pong.map(|t| t.elapsed().as_secs()),
        }
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
