//! Audio capture into bounded queues
//!
//! Each capture runs the cpal stream on its own dedicated thread and pushes
//! i16 PCM frames into a drop-oldest queue, so network or mixer stalls never
//! reach the hardware callback. A capture can be muted in place when the
//! current call mode does not transmit its class.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::audio::buffer::{AudioFrame, SharedQueue};
use crate::audio::device::get_input_device_by_name;
use crate::error::AudioError;

/// Audio capture for a single input device.
pub struct AudioCapture {
    /// Device name, resolved again on every start
    device_name: String,

    /// Whether the capture thread is running
    running: Arc<AtomicBool>,

    /// Whether frames are currently being transmitted; flipped by call-mode
    /// changes without tearing the stream down
    active: Arc<AtomicBool>,

    /// Output queue for captured frames
    output: SharedQueue<AudioFrame>,

    /// Frames below this peak level are not worth sending
    threshold: i16,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Channel for stream errors
    error_rx: Option<Receiver<AudioError>>,

    /// Total frames pushed
    frames_captured: Arc<AtomicU64>,

    /// Stream configuration
    config: StreamConfig,
}

impl AudioCapture {
    /// Create a capture for the named input device, pushing into `output`.
    pub fn new(
        device_name: impl Into<String>,
        sample_rate: u32,
        channels: u16,
        chunk_size: usize,
        threshold: i16,
        output: SharedQueue<AudioFrame>,
    ) -> Self {
        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Fixed(chunk_size as u32),
        };

        Self {
            device_name: device_name.into(),
            running: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(false)),
            output,
            threshold,
            thread_handle: None,
            error_rx: None,
            frames_captured: Arc::new(AtomicU64::new(0)),
            config,
        }
    }

    /// Start the capture thread. Frames flow only once [`set_active`] is
    /// also true.
    ///
    /// [`set_active`]: AudioCapture::set_active
    pub fn start(&mut self) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let device = get_input_device_by_name(&self.device_name)?;

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let active = self.active.clone();
        let output = self.output.clone();
        let frames_captured = self.frames_captured.clone();
        let config = self.config.clone();
        let sample_rate = self.config.sample_rate.0;
        let channels = self.config.channels;
        let threshold = self.threshold;
        let device_name = self.device_name.clone();

        self.frames_captured.store(0, Ordering::SeqCst);
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name(format!("capture-{}", self.device_name))
            .spawn(move || {
                let cpal_device = device.into_inner();
                let start_time = Instant::now();

                let stream = cpal_device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        if !running.load(Ordering::Relaxed) || !active.load(Ordering::Relaxed) {
                            return;
                        }

                        let frame = AudioFrame::from_samples(
                            data,
                            sample_rate,
                            channels,
                            start_time.elapsed().as_micros() as u64,
                        );

                        // Only send when there's actual signal
                        if frame.peak_level() < threshold {
                            return;
                        }

                        frames_captured.fetch_add(1, Ordering::Relaxed);
                        output.push(frame);
                    },
                    move |err| {
                        let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                );

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            tracing::error!(device = %device_name, "Failed to start stream: {}", e);
                            return;
                        }

                        // Keep thread alive while running
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(std::time::Duration::from_millis(10));
                        }

                        // Stream is dropped here, stopping capture
                    }
                    Err(e) => {
                        tracing::error!(device = %device_name, "Failed to build stream: {}", e);
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the capture thread.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    /// Gate frame production without touching the stream.
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::Relaxed)
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Drain one pending stream error, if any. Transient overruns stay in
    /// the callback; only unrecoverable device loss surfaces here.
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
