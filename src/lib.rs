//! # Remote Audio Call
//!
//! Low-latency one-to-one audio calls brokered through a relay, with
//! directional call modes controlling which way audio may flow.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                              SOURCE PC (agent)                           │
//! │  ┌──────────────┐        ┌──────────────┐                                │
//! │  │ System Audio │        │  Microphone  │                                │
//! │  │  (loopback)  │        │              │                                │
//! │  └──────┬───────┘        └──────┬───────┘                                │
//! │         │ capture thread        │ capture thread                         │
//! │         ▼                       ▼                                        │
//! │  ┌──────────────┐        ┌──────────────┐      ┌───────────────────┐     │
//! │  │ BoundedQueue │        │ BoundedQueue │      │    AudioMixer     │     │
//! │  └──────┬───────┘        └──────┬───────┘      │  remote voice +   │     │
//! │         └───────────┬──────────┘               │  local monitor    │     │
//! │                     ▼                          └─────────┬─────────┘     │
//! │            ┌─────────────────┐                           ▼               │
//! │            │   Agent (ws)    │◄── viewer voice      ┌──────────┐         │
//! │            └────────┬────────┘                      │ Speakers │         │
//! │                     │                               └──────────┘         │
//! └─────────────────────┼────────────────────────────────────────────────────┘
//!                       │ JSON envelopes over WebSocket
//!                       ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                                 RELAY                                    │
//! │   ┌────────────┐   ┌───────────────┐   ┌─────────────────────────────┐   │
//! │   │ AllowList  │──►│ MessageRouter │──►│       SessionRegistry       │   │
//! │   └────────────┘   │  (gate check) │   │ identity → client + viewer  │   │
//! │                    └───────┬───────┘   │           + call mode       │   │
//! │                            │           └─────────────────────────────┘   │
//! └────────────────────────────┼─────────────────────────────────────────────┘
//!                              │ verbatim forward
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                           VIEWER (browser)                               │
//! │            land.html / view.html  +  /api/status/:uuid                   │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod audio;
pub mod auth;
pub mod config;
pub mod error;
pub mod liveness;
pub mod protocol;
pub mod relay;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for voice calls (lower rate keeps packets small)
    pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

    /// Default channel count (mono voice)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Samples per captured chunk
    pub const DEFAULT_CHUNK_SIZE: usize = 1024;

    /// Default relay port
    pub const DEFAULT_PORT: u16 = 5444;

    /// Capacity of the capture → network queues
    pub const CAPTURE_QUEUE_CAPACITY: usize = 10;

    /// Capacity of the network → mixer queues
    pub const MIXER_QUEUE_CAPACITY: usize = 15;

    /// Minimum sample level before system audio is worth sending
    pub const SYSTEM_AUDIO_THRESHOLD: i16 = 100;

    /// Minimum sample level before microphone audio is worth sending
    pub const MIC_AUDIO_THRESHOLD: i16 = 300;

    /// Interval between liveness pings, in seconds
    pub const PING_INTERVAL_SECS: u64 = 5;

    /// Interval between outbound audio pump cycles, in milliseconds
    pub const AUDIO_SEND_INTERVAL_MS: u64 = 30;

    /// Mixer idle sleep when no input frame is ready, in milliseconds
    pub const MIXER_IDLE_MS: u64 = 10;

    /// WebSocket heartbeat interval on the relay, in seconds
    pub const WS_HEARTBEAT_SECS: u64 = 30;
}
