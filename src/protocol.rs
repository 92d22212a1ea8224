//! Wire protocol for the call relay
//!
//! One JSON object per WebSocket text frame, tagged by `type`. Audio payloads
//! are base64 PCM; desktop events and screen frames are carried opaquely and
//! never interpreted by the relay.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Directional call mode, owned by the session and set by the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    /// No audio in either direction
    #[default]
    Off,
    /// Source audio flows to the viewer
    Listen,
    /// Viewer voice flows to the source
    Talk,
    /// Full duplex
    Both,
}

impl CallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallMode::Off => "off",
            CallMode::Listen => "listen",
            CallMode::Talk => "talk",
            CallMode::Both => "both",
        }
    }
}

impl std::fmt::Display for CallMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio message classes the gate decides over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Captured system loopback audio from the source
    SourceSystemAudio,
    /// The source's microphone
    SourceMicAudio,
    /// The viewer's voice
    ViewerVoice,
}

/// Which side of a pairing a connection speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Viewer,
}

impl Role {
    /// The forward target for traffic originating at this role.
    pub fn opposite(&self) -> Role {
        match self {
            Role::Client => Role::Viewer,
            Role::Viewer => Role::Client,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded wire envelope.
///
/// Variants carry exactly the fields the relay reads; anything else rides
/// along in the raw text, which is what actually gets forwarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    AudioClientConnect {
        uuid: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_type: Option<String>,
    },
    AudioViewerConnect {
        uuid: String,
    },
    Connected {
        message: String,
    },
    Error {
        message: String,
    },
    ClientSystemAudio {
        uuid: String,
        audio: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
    },
    ClientMicrophoneAudio {
        uuid: String,
        audio: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
    },
    ViewerAudio {
        uuid: String,
        audio: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
    },
    CallModeChange {
        uuid: String,
        #[serde(default)]
        mode: CallMode,
    },
    ScreenUpdate {
        uuid: String,
        #[serde(flatten)]
        data: Map<String, Value>,
    },
    MouseEvent {
        uuid: String,
        #[serde(flatten)]
        data: Map<String, Value>,
    },
    KeyboardEvent {
        uuid: String,
        #[serde(flatten)]
        data: Map<String, Value>,
    },
    PingRequest {
        uuid: String,
        timestamp: f64,
    },
    PingResponse {
        uuid: String,
        timestamp: f64,
    },
    Disconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        uuid: Option<String>,
    },
}

/// Type tags the relay understands. Anything else is ignored, not rejected.
const KNOWN_TYPES: &[&str] = &[
    "audio_client_connect",
    "audio_viewer_connect",
    "connected",
    "error",
    "client_system_audio",
    "client_microphone_audio",
    "viewer_audio",
    "call_mode_change",
    "screen_update",
    "mouse_event",
    "keyboard_event",
    "ping_request",
    "ping_response",
    "disconnect",
];

impl Envelope {
    /// The identity this envelope routes on, if it carries one.
    pub fn identity(&self) -> Option<&str> {
        match self {
            Envelope::AudioClientConnect { uuid, .. }
            | Envelope::AudioViewerConnect { uuid }
            | Envelope::ClientSystemAudio { uuid, .. }
            | Envelope::ClientMicrophoneAudio { uuid, .. }
            | Envelope::ViewerAudio { uuid, .. }
            | Envelope::CallModeChange { uuid, .. }
            | Envelope::ScreenUpdate { uuid, .. }
            | Envelope::MouseEvent { uuid, .. }
            | Envelope::KeyboardEvent { uuid, .. }
            | Envelope::PingRequest { uuid, .. }
            | Envelope::PingResponse { uuid, .. } => Some(uuid),
            Envelope::Disconnect { uuid } => uuid.as_deref(),
            Envelope::Connected { .. } | Envelope::Error { .. } => None,
        }
    }

    /// The gate class, for audio-bearing envelopes only.
    pub fn audio_class(&self) -> Option<MessageClass> {
        match self {
            Envelope::ClientSystemAudio { .. } => Some(MessageClass::SourceSystemAudio),
            Envelope::ClientMicrophoneAudio { .. } => Some(MessageClass::SourceMicAudio),
            Envelope::ViewerAudio { .. } => Some(MessageClass::ViewerVoice),
            _ => None,
        }
    }

    /// Serialize to a wire frame.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Malformed)
    }
}

/// Parse a text frame into an [`Envelope`].
///
/// Distinguishes three failure shapes the router treats differently:
/// unparseable JSON ([`ProtocolError::Malformed`]), a missing type tag
/// ([`ProtocolError::MissingType`]), and a well-formed message of a type we
/// don't know ([`ProtocolError::UnknownType`]).
pub fn parse_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?;
    if !KNOWN_TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }
    serde_json::from_value(value).map_err(ProtocolError::Malformed)
}

/// Encode a PCM payload for the `audio` field.
pub fn encode_audio(pcm: &[u8]) -> String {
    STANDARD.encode(pcm)
}

/// Decode an `audio` field back into PCM bytes.
pub fn decode_audio(audio: &str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD
        .decode(audio)
        .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
}

/// Current wall-clock time as epoch seconds, the wire timestamp unit.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
