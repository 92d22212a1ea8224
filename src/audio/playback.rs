//! Audio playback from a bounded queue
//!
//! Runs the cpal output stream on a dedicated thread, draining frames the
//! mixer produced. The output callback keeps a small carryover buffer so
//! frame boundaries and device buffer sizes don't need to line up.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::audio::buffer::{AudioFrame, SharedQueue};
use crate::audio::device::get_output_device_by_name;
use crate::audio::mixer::PlaybackSink;
use crate::error::AudioError;

/// Playback stage for one output device.
pub struct AudioPlayback {
    /// Device name, resolved again on every start
    device_name: String,
    running: Arc<AtomicBool>,
    input: SharedQueue<AudioFrame>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    frames_played: Arc<AtomicU64>,
    config: StreamConfig,
}

impl AudioPlayback {
    pub fn new(
        device_name: impl Into<String>,
        sample_rate: u32,
        channels: u16,
        input: SharedQueue<AudioFrame>,
    ) -> Self {
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        Self {
            device_name: device_name.into(),
            running: Arc::new(AtomicBool::new(false)),
            input,
            thread_handle: None,
            error_rx: None,
            frames_played: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    /// Start the playback thread.
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = get_output_device_by_name(&self.device_name)?;

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let input = self.input.clone();
        let frames_played = self.frames_played.clone();
        let config = self.config.clone();
        let device_name = self.device_name.clone();

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("playback-{}", self.device_name))
            .spawn(move || {
                let cpal_device = device.into_inner();
                let mut pending: VecDeque<i16> = VecDeque::new();

                let stream = cpal_device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        for slot in data.iter_mut() {
                            if pending.is_empty() {
                                match input.pop() {
                                    Some(frame) => {
                                        pending.extend(frame.samples());
                                        frames_played.fetch_add(1, Ordering::Relaxed);
                                    }
                                    // Underrun plays silence
                                    None => {
                                        *slot = 0;
                                        continue;
                                    }
                                }
                            }
                            *slot = pending.pop_front().unwrap_or(0);
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!(device = %device_name, "Failed to start playback: {}", e);
                            return;
                        }

                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(std::time::Duration::from_millis(10));
                        }
                    }
                    Err(e) => {
                        tracing::error!(device = %device_name, "Failed to build playback stream: {}", e);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the playback thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }

    /// A [`PlaybackSink`] feeding this playback's queue. The mixer owns the
    /// sink; the playback stage stays with its creator.
    pub fn sink(&self) -> PlaybackHandle {
        PlaybackHandle {
            queue: self.input.clone(),
            running: self.running.clone(),
        }
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Write handle into a playback stage's input queue.
pub struct PlaybackHandle {
    queue: SharedQueue<AudioFrame>,
    running: Arc<AtomicBool>,
}

impl PlaybackSink for PlaybackHandle {
    fn write(&self, frame: AudioFrame) -> Result<(), AudioError> {
        if !self.running.load(Ordering::Relaxed) {
            return Err(AudioError::SinkWriteFailed(
                "playback stage is not running".to_string(),
            ));
        }
        self.queue.push(frame);
        Ok(())
    }
}
