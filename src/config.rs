//! Application configuration
//!
//! Sections mirror the deployment units: `[server]` for the relay,
//! `[audio]` for capture/playback format, `[agent]` for the source
//! endpoint. Every field has a default so a missing or partial file is
//! never fatal; CLI arguments override on top.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    AUDIO_SEND_INTERVAL_MS, CAPTURE_QUEUE_CAPACITY, DEFAULT_CHANNELS, DEFAULT_CHUNK_SIZE,
    DEFAULT_PORT, DEFAULT_SAMPLE_RATE, MIC_AUDIO_THRESHOLD, MIXER_QUEUE_CAPACITY,
    PING_INTERVAL_SECS, SYSTEM_AUDIO_THRESHOLD,
};
use crate::error::{Error, Result};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub agent: AgentConfig,
}

/// Relay server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind
    pub bind_address: String,
    /// Port to bind
    pub port: u16,
    /// PEM certificate chain; TLS is enabled when both this and `key_file`
    /// are set
    pub cert_file: Option<PathBuf>,
    /// PEM private key
    pub key_file: Option<PathBuf>,
    /// Directory served under `/static` (also holds the landing and viewer
    /// pages)
    pub static_dir: PathBuf,
    /// Identity allow-list file
    pub allowed_file: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            cert_file: None,
            key_file: None,
            static_dir: PathBuf::from("static"),
            allowed_file: PathBuf::from("allowed.json"),
        }
    }
}

/// Audio format and queue settings shared by capture, playback and mixing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_size: usize,
    pub capture_queue_capacity: usize,
    pub mixer_queue_capacity: usize,
    /// Minimum peak level before system audio is sent
    pub system_threshold: i16,
    /// Minimum peak level before microphone audio is sent
    pub mic_threshold: i16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            capture_queue_capacity: CAPTURE_QUEUE_CAPACITY,
            mixer_queue_capacity: MIXER_QUEUE_CAPACITY,
            system_threshold: SYSTEM_AUDIO_THRESHOLD,
            mic_threshold: MIC_AUDIO_THRESHOLD,
        }
    }
}

/// Source-endpoint agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Relay WebSocket URL, e.g. `wss://host:5444/ws`
    pub server_url: Option<String>,
    /// Identity override; defaults to the machine id
    pub identity: Option<String>,
    pub ping_interval_secs: u64,
    pub send_interval_ms: u64,
    pub enable_system_audio: bool,
    pub enable_microphone: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            identity: None,
            ping_interval_secs: PING_INTERVAL_SECS,
            send_interval_ms: AUDIO_SEND_INTERVAL_MS,
            enable_system_audio: true,
            enable_microphone: true,
        }
    }
}

impl AppConfig {
    /// Parse a TOML config file. Missing fields take their defaults.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let body = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&body).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from the platform config directory, falling back to defaults
    /// when no file exists or it fails to parse.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Loaded configuration");
                config
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), "Ignoring bad config file: {}", e);
                Self::default()
            }
        }
    }

    /// Platform config file location.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "remote-audio-call")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5444);
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.channels, 1);
        assert!(config.server.cert_file.is_none());
        assert_eq!(config.agent.ping_interval_secs, 5);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [audio]
            sample_rate = 48000
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.chunk_size, 1024);
        assert!(config.agent.enable_microphone);
    }
}
