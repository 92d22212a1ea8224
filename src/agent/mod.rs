//! Source-endpoint agent
//!
//! Headless client that captures system audio and microphone, streams them
//! to the relay, and plays the viewer's voice locally. Capture and playback
//! live on dedicated threads behind bounded queues; this module owns the
//! WebSocket side and the call-mode plumbing between them.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::audio::buffer::{shared_queue, AudioFrame, SharedQueue};
use crate::audio::capture::AudioCapture;
use crate::audio::device;
use crate::audio::mixer::AudioMixer;
use crate::audio::playback::AudioPlayback;
use crate::config::{AgentConfig, AudioConfig};
use crate::constants::MIXER_IDLE_MS;
use crate::error::{NetworkError, Result};
use crate::liveness::LivenessMonitor;
use crate::protocol::{
    decode_audio, encode_audio, now_timestamp, parse_envelope, CallMode, Envelope, MessageClass,
};
use crate::session::gate;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type SharedSink = Arc<Mutex<WsSink>>;

/// Stable identity for this machine.
///
/// Resolution order: explicit config value, `REMOTE_CALL_IDENTITY` in the
/// environment, the OS machine id, then a random fallback (which will not
/// pass an allow-list until the operator adds it).
pub fn machine_identity(config: &AgentConfig) -> String {
    if let Some(identity) = &config.identity {
        if !identity.is_empty() {
            return identity.clone();
        }
    }
    if let Ok(identity) = std::env::var("REMOTE_CALL_IDENTITY") {
        if !identity.is_empty() {
            return identity;
        }
    }
    for path in ["/etc/machine-id", "/var/lib/dbus/machine-id"] {
        if let Ok(raw) = std::fs::read_to_string(path) {
            let id = raw.trim();
            if !id.is_empty() {
                return id.to_string();
            }
        }
    }
    uuid::Uuid::new_v4().to_string()
}

/// The source-endpoint agent for one call.
pub struct CallAgent {
    identity: String,
    audio: AudioConfig,
    agent: AgentConfig,
}

impl CallAgent {
    pub fn new(identity: String, audio: AudioConfig, agent: AgentConfig) -> Self {
        Self {
            identity,
            audio,
            agent,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Connect to the relay and run until the call ends or the transport
    /// drops.
    pub async fn run(&self, server_url: &str) -> Result<()> {
        tracing::info!(url = server_url, identity = %self.identity, "Connecting to relay");
        let (ws, _response) = connect_async(server_url)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        let (sink, mut stream) = ws.split();
        let sink: SharedSink = Arc::new(Mutex::new(sink));

        send_envelope(
            &sink,
            &Envelope::AudioClientConnect {
                uuid: self.identity.clone(),
                client_type: Some("audio_only".to_string()),
            },
        )
        .await?;

        // Queues: capture → network, plus the two mixer inputs.
        let system_queue = shared_queue::<AudioFrame>(self.audio.capture_queue_capacity);
        let mic_queue = shared_queue::<AudioFrame>(self.audio.capture_queue_capacity);
        let remote_voice = shared_queue::<AudioFrame>(self.audio.mixer_queue_capacity);
        let monitor = shared_queue::<AudioFrame>(self.audio.mixer_queue_capacity);
        let playback_queue = shared_queue::<AudioFrame>(self.audio.mixer_queue_capacity);

        let mode = Arc::new(parking_lot::Mutex::new(CallMode::Off));

        // Capture stages. A missing device degrades the call, it doesn't
        // abort it.
        let system_capture = if self.agent.enable_system_audio {
            self.start_capture(
                device::find_system_loopback_device(),
                self.audio.system_threshold,
                system_queue.clone(),
            )
            .map(Arc::new)
        } else {
            None
        };
        let mic_capture = if self.agent.enable_microphone {
            self.start_capture(
                device::find_microphone_device(),
                self.audio.mic_threshold,
                mic_queue.clone(),
            )
            .map(Arc::new)
        } else {
            None
        };
        let captures: Vec<Arc<AudioCapture>> = [system_capture.clone(), mic_capture.clone()]
            .into_iter()
            .flatten()
            .collect();

        // Playback + mixer for the viewer's voice (and the local monitor in
        // full-duplex mode).
        let mut playback = None;
        let mut mixer = AudioMixer::new(
            remote_voice.clone(),
            monitor.clone(),
            Duration::from_millis(MIXER_IDLE_MS),
        );
        match device::find_output_device() {
            Ok(out_device) => {
                let mut stage = AudioPlayback::new(
                    &out_device.name,
                    self.audio.sample_rate,
                    self.audio.channels,
                    playback_queue.clone(),
                );
                match stage.start() {
                    Ok(()) => {
                        if let Err(e) = mixer.start(Box::new(stage.sink())) {
                            tracing::warn!("Mixer failed to start: {}", e);
                        }
                        playback = Some(stage);
                    }
                    Err(e) => tracing::warn!("Speaker output unavailable: {}", e),
                }
            }
            Err(e) => tracing::warn!("Speaker output unavailable: {}", e),
        }

        // Outbound audio pump.
        let pump = tokio::spawn(audio_pump(
            sink.clone(),
            self.identity.clone(),
            self.agent.send_interval_ms,
            system_queue,
            mic_queue,
            monitor.clone(),
            mode.clone(),
            captures,
        ));

        // Liveness pings.
        let liveness = LivenessMonitor::new();
        let pinger = tokio::spawn(ping_loop(
            sink.clone(),
            self.identity.clone(),
            self.agent.ping_interval_secs,
            liveness.clone(),
        ));

        // Inbound loop drives mode changes, playback and shutdown.
        let sample_rate = self.audio.sample_rate;
        let channels = self.audio.channels;
        while let Some(msg) = stream.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("Connection to relay lost: {}", e);
                    break;
                }
            };

            let envelope = match parse_envelope(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::debug!("Ignoring message from relay: {}", e);
                    continue;
                }
            };

            match envelope {
                Envelope::Connected { message } => {
                    tracing::info!("Relay accepted connection: {}", message);
                }
                Envelope::Error { message } => {
                    tracing::error!("Relay rejected connection: {}", message);
                    break;
                }
                Envelope::CallModeChange { mode: new_mode, .. } => {
                    *mode.lock() = new_mode;
                    if let Some(capture) = &system_capture {
                        capture.set_active(gate::allows(new_mode, MessageClass::SourceSystemAudio));
                    }
                    if let Some(capture) = &mic_capture {
                        capture.set_active(gate::allows(new_mode, MessageClass::SourceMicAudio));
                    }
                    tracing::info!(mode = %new_mode, "Call mode changed");
                }
                Envelope::ViewerAudio { audio, .. } => match decode_audio(&audio) {
                    Ok(pcm) => {
                        remote_voice.push(AudioFrame::new(pcm.into(), sample_rate, channels, 0));
                    }
                    Err(e) => tracing::warn!("Bad viewer audio payload: {}", e),
                },
                Envelope::PingRequest { timestamp, .. } => {
                    let pong = LivenessMonitor::pong(&self.identity, timestamp);
                    if send_envelope(&sink, &pong).await.is_err() {
                        break;
                    }
                }
                Envelope::PingResponse { timestamp, .. } => {
                    if let Some(rtt) = liveness.observe_response(timestamp) {
                        tracing::debug!(rtt_ms = rtt.as_millis() as u64, "Liveness");
                    }
                }
                Envelope::Disconnect { .. } => {
                    tracing::info!("Call ended by viewer");
                    break;
                }
                other => {
                    tracing::debug!(envelope = ?other, "Ignoring envelope from relay");
                }
            }
        }

        pump.abort();
        pinger.abort();
        mixer.stop();
        drop(playback);
        drop(system_capture);
        drop(mic_capture);

        tracing::info!("Agent stopped");
        Ok(())
    }

    fn start_capture(
        &self,
        found: std::result::Result<device::AudioDevice, crate::error::AudioError>,
        threshold: i16,
        queue: SharedQueue<AudioFrame>,
    ) -> Option<AudioCapture> {
        let dev = match found {
            Ok(dev) => dev,
            Err(e) => {
                tracing::warn!("Capture unavailable: {}", e);
                return None;
            }
        };
        let mut capture = AudioCapture::new(
            &dev.name,
            self.audio.sample_rate,
            self.audio.channels,
            self.audio.chunk_size,
            threshold,
            queue,
        );
        match capture.start() {
            Ok(()) => {
                tracing::info!(device = capture.device_name(), "Capture started");
                Some(capture)
            }
            Err(e) => {
                tracing::warn!("Capture failed to start: {}", e);
                None
            }
        }
    }
}

async fn send_envelope(sink: &SharedSink, envelope: &Envelope) -> Result<()> {
    let json = envelope.to_json()?;
    sink.lock()
        .await
        .send(Message::Text(json))
        .await
        .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
    Ok(())
}

/// Drain the capture queues onto the wire on a fixed cadence, oldest first.
/// In full-duplex mode system audio also tees into the mixer's monitor
/// input so local playback carries both streams.
#[allow(clippy::too_many_arguments)]
async fn audio_pump(
    sink: SharedSink,
    identity: String,
    send_interval_ms: u64,
    system_queue: SharedQueue<AudioFrame>,
    mic_queue: SharedQueue<AudioFrame>,
    monitor: SharedQueue<AudioFrame>,
    mode: Arc<parking_lot::Mutex<CallMode>>,
    captures: Vec<Arc<AudioCapture>>,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(send_interval_ms));
    loop {
        interval.tick().await;

        // Surface device loss from the capture threads
        for capture in &captures {
            if let Some(e) = capture.check_errors() {
                tracing::error!(device = capture.device_name(), "Capture stream failed: {}", e);
            }
        }

        while let Some(frame) = system_queue.pop() {
            if *mode.lock() == CallMode::Both {
                monitor.push(frame.clone());
            }
            let envelope = Envelope::ClientSystemAudio {
                uuid: identity.clone(),
                audio: encode_audio(&frame.pcm),
                timestamp: Some(now_timestamp()),
            };
            if send_envelope(&sink, &envelope).await.is_err() {
                return;
            }
        }

        while let Some(frame) = mic_queue.pop() {
            let envelope = Envelope::ClientMicrophoneAudio {
                uuid: identity.clone(),
                audio: encode_audio(&frame.pcm),
                timestamp: Some(now_timestamp()),
            };
            if send_envelope(&sink, &envelope).await.is_err() {
                return;
            }
        }
    }
}

async fn ping_loop(
    sink: SharedSink,
    identity: String,
    ping_interval_secs: u64,
    liveness: LivenessMonitor,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(ping_interval_secs));
    loop {
        interval.tick().await;
        if send_envelope(&sink, &liveness.ping(&identity)).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_identity_prefers_config() {
        let config = AgentConfig {
            identity: Some("CONFIGURED-ID".to_string()),
            ..AgentConfig::default()
        };
        assert_eq!(machine_identity(&config), "CONFIGURED-ID");
    }

    #[test]
    fn test_machine_identity_is_stable_and_nonempty() {
        let config = AgentConfig::default();
        let first = machine_identity(&config);
        assert!(!first.is_empty());
        // Machine-id backed (or env backed) identities must not change
        // between calls; only the random fallback could, and then only if
        // no machine id exists at all.
        if std::path::Path::new("/etc/machine-id").exists()
            || std::env::var("REMOTE_CALL_IDENTITY").is_ok()
        {
            assert_eq!(first, machine_identity(&config));
        }
    }
}
