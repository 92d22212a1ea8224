//! Message router
//!
//! Demultiplexes inbound envelopes by type, applies the call-mode gate,
//! looks up the paired endpoint in the registry, and forwards the raw frame
//! verbatim. Routing always keys off the identity bound at connect time,
//! never the uuid inside a later payload, so a socket cannot speak for a
//! pairing it didn't authenticate into.

use std::sync::Arc;

use crate::error::ProtocolError;
use crate::protocol::{parse_envelope, Envelope, Role};
use crate::session::gate;
use crate::session::{Connection, SessionRegistry};

/// What the connection loop should do after handling one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterAction {
    /// Keep reading
    Continue,
    /// The peer ended the call; close cleanly
    Disconnect,
    /// Authentication failed; an error reply was queued, close now
    CloseUnauthorized,
}

/// Per-socket authenticated state, owned by that socket's reader loop.
#[derive(Debug, Default, Clone)]
pub struct ConnCtx {
    binding: Option<(String, Role, u64)>,
}

impl ConnCtx {
    pub fn new() -> Self {
        Self::default()
    }

    /// The identity, role and connection id this socket authenticated as.
    pub fn binding(&self) -> Option<(&str, Role, u64)> {
        self.binding
            .as_ref()
            .map(|(identity, role, id)| (identity.as_str(), *role, *id))
    }
}

/// Routes messages between the two endpoints of each session.
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Handle one inbound text frame from `conn`.
    ///
    /// A malformed frame is logged and skipped; an unknown type is logged
    /// and ignored. Neither ends the connection.
    pub fn handle_text(&self, ctx: &mut ConnCtx, conn: &Connection, text: &str) -> RouterAction {
        let envelope = match parse_envelope(text) {
            Ok(envelope) => envelope,
            Err(ProtocolError::UnknownType(kind)) => {
                tracing::debug!(kind, "Ignoring unknown message type");
                return RouterAction::Continue;
            }
            Err(e) => {
                tracing::warn!(remote = conn.remote_addr(), "Skipping malformed message: {}", e);
                return RouterAction::Continue;
            }
        };

        match envelope {
            Envelope::AudioClientConnect { uuid, .. } => {
                self.handle_connect(ctx, conn, &uuid, Role::Client)
            }
            Envelope::AudioViewerConnect { uuid } => {
                self.handle_connect(ctx, conn, &uuid, Role::Viewer)
            }
            Envelope::Disconnect { .. } => RouterAction::Disconnect,
            other => self.handle_routed(ctx, text, other),
        }
    }

    /// Tear down this socket's registry binding, if it still owns one.
    pub fn handle_close(&self, ctx: &ConnCtx) {
        if let Some((identity, role, conn_id)) = ctx.binding() {
            self.registry.unregister(identity, role, conn_id);
        }
    }

    fn handle_connect(
        &self,
        ctx: &mut ConnCtx,
        conn: &Connection,
        identity: &str,
        role: Role,
    ) -> RouterAction {
        match self.registry.register(identity, role, conn.clone()) {
            Ok(()) => {
                ctx.binding = Some((identity.to_string(), role, conn.id()));
                let reply = Envelope::Connected {
                    message: format!("Audio {} connected successfully", role),
                };
                if let Ok(json) = reply.to_json() {
                    conn.send_text(json);
                }
                RouterAction::Continue
            }
            Err(e) => {
                tracing::warn!(identity, role = %role, remote = conn.remote_addr(), "Rejected connect: {}", e);
                let reply = Envelope::Error {
                    message: "Identity not authorized for audio calls".to_string(),
                };
                if let Ok(json) = reply.to_json() {
                    conn.send_text(json);
                }
                RouterAction::CloseUnauthorized
            }
        }
    }

    fn handle_routed(&self, ctx: &ConnCtx, raw: &str, envelope: Envelope) -> RouterAction {
        let Some((identity, sender_role, _)) = ctx.binding() else {
            tracing::warn!("Dropping message on a connection that never authenticated");
            return RouterAction::Continue;
        };

        if let Some(class) = envelope.audio_class() {
            let mode = self.registry.mode(identity);
            if gate::allows(mode, class) && self.forward(identity, sender_role.opposite(), raw) {
                self.registry.record_forwarded(identity, class);
            }
            return RouterAction::Continue;
        }

        match envelope {
            Envelope::CallModeChange { mode, .. } => {
                // Only the viewer side owns the call mode.
                if sender_role == Role::Viewer {
                    self.registry.set_mode(identity, mode);
                    // The source's capture loop reconfigures off the same frame.
                    self.forward(identity, Role::Client, raw);
                } else {
                    tracing::debug!(identity, "Ignoring mode change from the source endpoint");
                }
            }
            Envelope::MouseEvent { .. } | Envelope::KeyboardEvent { .. } => {
                self.forward(identity, Role::Client, raw);
            }
            Envelope::ScreenUpdate { .. } => {
                self.forward(identity, Role::Viewer, raw);
            }
            Envelope::PingRequest { .. } => {
                self.forward(identity, sender_role.opposite(), raw);
            }
            Envelope::PingResponse { .. } => {
                self.forward(identity, sender_role.opposite(), raw);
                self.registry.record_pong(identity);
            }
            other => {
                tracing::debug!(envelope = ?other, "Ignoring unroutable envelope");
            }
        }

        RouterAction::Continue
    }

    /// Forward `raw` verbatim to the `target` endpoint. An unbound peer is
    /// an expected transient state, not an error; the frame is silently
    /// dropped and `false` returned.
    fn forward(&self, identity: &str, target: Role, raw: &str) -> bool {
        match self.registry.lookup(identity, target) {
            Some(peer) => peer.send_text(raw),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowList;
    use crate::session::OutboundFrame;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn router() -> MessageRouter {
        let allow = Arc::new(AllowList::from_identities(["X", "Y"]));
        MessageRouter::new(Arc::new(SessionRegistry::new(allow)))
    }

    fn conn(addr: &str) -> (Connection, UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Connection::new(tx, addr), rx)
    }

    fn recv_text(rx: &mut UnboundedReceiver<OutboundFrame>) -> Option<String> {
        match rx.try_recv() {
            Ok(OutboundFrame::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Connect a client and viewer for identity X, returning their contexts
    /// and outbound receivers with the `connected` acks already consumed.
    fn connected_pair(
        router: &MessageRouter,
    ) -> (
        ConnCtx,
        Connection,
        UnboundedReceiver<OutboundFrame>,
        ConnCtx,
        Connection,
        UnboundedReceiver<OutboundFrame>,
    ) {
        let (client, mut client_rx) = conn("10.0.0.1:1");
        let (viewer, mut viewer_rx) = conn("10.0.0.2:2");
        let mut client_ctx = ConnCtx::new();
        let mut viewer_ctx = ConnCtx::new();

        let action = router.handle_text(
            &mut client_ctx,
            &client,
            r#"{"type":"audio_client_connect","uuid":"X"}"#,
        );
        assert_eq!(action, RouterAction::Continue);
        assert!(recv_text(&mut client_rx).unwrap().contains("connected"));

        let action = router.handle_text(
            &mut viewer_ctx,
            &viewer,
            r#"{"type":"audio_viewer_connect","uuid":"X"}"#,
        );
        assert_eq!(action, RouterAction::Continue);
        assert!(recv_text(&mut viewer_rx).unwrap().contains("connected"));

        (client_ctx, client, client_rx, viewer_ctx, viewer, viewer_rx)
    }

    #[test]
    fn test_unauthorized_connect_replies_error_and_closes() {
        let router = router();
        let (c, mut rx) = conn("10.0.0.1:1");
        let mut ctx = ConnCtx::new();

        let action = router.handle_text(
            &mut ctx,
            &c,
            r#"{"type":"audio_client_connect","uuid":"INTRUDER"}"#,
        );

        assert_eq!(action, RouterAction::CloseUnauthorized);
        assert!(ctx.binding().is_none());
        assert_eq!(router.registry().session_count(), 0);
        let reply = recv_text(&mut rx).unwrap();
        assert!(reply.contains(r#""type":"error""#));
        assert!(reply.contains("not authorized"));
    }

    #[test]
    fn test_audio_blocked_while_mode_off() {
        let router = router();
        let (mut client_ctx, client, _crx, _vctx, _viewer, mut viewer_rx) = connected_pair(&router);

        let frame = r#"{"type":"client_system_audio","uuid":"X","audio":"AAAA"}"#;
        router.handle_text(&mut client_ctx, &client, frame);

        assert!(recv_text(&mut viewer_rx).is_none());
        assert_eq!(router.registry().status("X").system_audio_count, 0);
    }

    #[test]
    fn test_listen_forwards_source_audio_but_not_viewer_voice() {
        let router = router();
        let (mut client_ctx, client, mut client_rx, mut viewer_ctx, viewer, mut viewer_rx) =
            connected_pair(&router);

        // Viewer switches the call to listen; the mode change is relayed to
        // the client so its capture loop can reconfigure.
        let mode_change = r#"{"type":"call_mode_change","uuid":"X","mode":"listen"}"#;
        router.handle_text(&mut viewer_ctx, &viewer, mode_change);
        assert_eq!(recv_text(&mut client_rx).as_deref(), Some(mode_change));

        // Source audio now flows, byte-for-byte.
        let frame = r#"{"type": "client_system_audio", "uuid": "X", "audio": "AAAA"}"#;
        router.handle_text(&mut client_ctx, &client, frame);
        assert_eq!(recv_text(&mut viewer_rx).as_deref(), Some(frame));
        assert_eq!(router.registry().status("X").system_audio_count, 1);

        // But the return direction stays shut in listen mode.
        let voice = r#"{"type":"viewer_audio","uuid":"X","audio":"BBBB"}"#;
        router.handle_text(&mut viewer_ctx, &viewer, voice);
        assert!(recv_text(&mut client_rx).is_none());
    }

    #[test]
    fn test_talk_forwards_viewer_voice_only() {
        let router = router();
        let (mut client_ctx, client, mut client_rx, mut viewer_ctx, viewer, mut viewer_rx) =
            connected_pair(&router);

        router.handle_text(
            &mut viewer_ctx,
            &viewer,
            r#"{"type":"call_mode_change","uuid":"X","mode":"talk"}"#,
        );
        recv_text(&mut client_rx);

        let voice = r#"{"type":"viewer_audio","uuid":"X","audio":"BBBB"}"#;
        router.handle_text(&mut viewer_ctx, &viewer, voice);
        assert_eq!(recv_text(&mut client_rx).as_deref(), Some(voice));

        let mic = r#"{"type":"client_microphone_audio","uuid":"X","audio":"CCCC"}"#;
        router.handle_text(&mut client_ctx, &client, mic);
        assert!(recv_text(&mut viewer_rx).is_none());
        assert_eq!(router.registry().status("X").mic_audio_count, 0);
    }

    #[test]
    fn test_forward_to_unbound_peer_is_silent_noop() {
        let router = router();
        let (client, mut client_rx) = conn("10.0.0.1:1");
        let mut client_ctx = ConnCtx::new();

        router.handle_text(
            &mut client_ctx,
            &client,
            r#"{"type":"audio_client_connect","uuid":"X"}"#,
        );
        recv_text(&mut client_rx);
        router.registry().set_mode("X", crate::protocol::CallMode::Listen);

        // No viewer bound: forwarding drops silently for every class.
        let action = router.handle_text(
            &mut client_ctx,
            &client,
            r#"{"type":"client_system_audio","uuid":"X","audio":"AAAA"}"#,
        );
        assert_eq!(action, RouterAction::Continue);
        // No error came back to the sender either.
        assert!(recv_text(&mut client_rx).is_none());
        // Nothing was counted because nothing was delivered.
        assert_eq!(router.registry().status("X").system_audio_count, 0);
    }

    #[test]
    fn test_malformed_and_unknown_messages_keep_connection_open() {
        let router = router();
        let (mut client_ctx, client, mut client_rx, _vctx, _viewer, mut viewer_rx) =
            connected_pair(&router);

        assert_eq!(
            router.handle_text(&mut client_ctx, &client, "{this is not json"),
            RouterAction::Continue
        );
        assert_eq!(
            router.handle_text(
                &mut client_ctx,
                &client,
                r#"{"type":"firmware_report","uuid":"X"}"#
            ),
            RouterAction::Continue
        );

        assert!(recv_text(&mut client_rx).is_none());
        assert!(recv_text(&mut viewer_rx).is_none());
        assert_eq!(router.registry().session_count(), 1);
    }

    #[test]
    fn test_disconnect_and_teardown() {
        let router = router();
        let (client_ctx, client, _crx, _vctx, _viewer, _vrx) = connected_pair(&router);

        let mut ctx = client_ctx.clone();
        let action = router.handle_text(&mut ctx, &client, r#"{"type":"disconnect"}"#);
        assert_eq!(action, RouterAction::Disconnect);

        router.handle_close(&ctx);
        assert!(router
            .registry()
            .lookup("X", Role::Client)
            .is_none());
        // Viewer still bound, so the session survives.
        assert_eq!(router.registry().session_count(), 1);
    }

    #[test]
    fn test_rapid_reconnect_keeps_single_session() {
        let router = router();
        let (first, mut first_rx) = conn("10.0.0.1:1");
        let (second, _second_rx) = conn("10.0.0.1:2");
        let mut first_ctx = ConnCtx::new();
        let mut second_ctx = ConnCtx::new();

        router.handle_text(
            &mut first_ctx,
            &first,
            r#"{"type":"audio_client_connect","uuid":"X"}"#,
        );
        recv_text(&mut first_rx);
        router.handle_text(
            &mut second_ctx,
            &second,
            r#"{"type":"audio_client_connect","uuid":"X"}"#,
        );

        // The first connection was closed, not duplicated.
        assert_eq!(router.registry().session_count(), 1);
        assert_eq!(
            router.registry().lookup("X", Role::Client).unwrap().id(),
            second.id()
        );
        assert_eq!(first_rx.try_recv().unwrap(), OutboundFrame::Close);

        // Late teardown of the evicted socket leaves the new binding alone.
        router.handle_close(&first_ctx);
        assert_eq!(
            router.registry().lookup("X", Role::Client).unwrap().id(),
            second.id()
        );
    }

    #[test]
    fn test_ping_round_trip_routing() {
        let router = router();
        let (mut client_ctx, client, mut client_rx, mut viewer_ctx, viewer, mut viewer_rx) =
            connected_pair(&router);

        let ping = r#"{"type":"ping_request","uuid":"X","timestamp":123.5}"#;
        router.handle_text(&mut viewer_ctx, &viewer, ping);
        assert_eq!(recv_text(&mut client_rx).as_deref(), Some(ping));

        let pong = r#"{"type":"ping_response","uuid":"X","timestamp":123.5}"#;
        router.handle_text(&mut client_ctx, &client, pong);
        assert_eq!(recv_text(&mut viewer_rx).as_deref(), Some(pong));
        assert!(router.registry().status("X").last_pong_seconds.is_some());
    }

    #[test]
    fn test_desktop_events_forward_opaquely() {
        let router = router();
        let (mut client_ctx, client, mut client_rx, mut viewer_ctx, viewer, mut viewer_rx) =
            connected_pair(&router);

        let mouse = r#"{"type":"mouse_event","uuid":"X","x":3,"y":4,"button":"left"}"#;
        router.handle_text(&mut viewer_ctx, &viewer, mouse);
        assert_eq!(recv_text(&mut client_rx).as_deref(), Some(mouse));

        let screen = r#"{"type":"screen_update","uuid":"X","image":"base64stuff"}"#;
        router.handle_text(&mut client_ctx, &client, screen);
        assert_eq!(recv_text(&mut viewer_rx).as_deref(), Some(screen));
    }

    #[test]
    fn test_mode_change_from_client_is_ignored() {
        let router = router();
        let (mut client_ctx, client, _crx, _vctx, _viewer, _vrx) = connected_pair(&router);

        router.handle_text(
            &mut client_ctx,
            &client,
            r#"{"type":"call_mode_change","uuid":"X","mode":"both"}"#,
        );

        assert_eq!(router.registry().mode("X"), crate::protocol::CallMode::Off);
    }

    #[test]
    fn test_pre_auth_traffic_is_dropped() {
        let router = router();
        let (client, mut client_rx) = conn("10.0.0.1:1");
        let mut ctx = ConnCtx::new();

        let action = router.handle_text(
            &mut ctx,
            &client,
            r#"{"type":"client_system_audio","uuid":"X","audio":"AAAA"}"#,
        );

        assert_eq!(action, RouterAction::Continue);
        assert!(recv_text(&mut client_rx).is_none());
        assert_eq!(router.registry().session_count(), 0);
    }
}
