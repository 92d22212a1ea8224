//! Per-session audio mixing stage
//!
//! Merges the remote-voice stream with the local capture monitor when both
//! are active. Runs on its own thread, pulling at most one frame from each
//! bounded input per cycle; both streams must share format (rate, channels,
//! sample width), which is established at session setup. No resampling, no
//! dynamic gain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{AudioFrame, SharedQueue};
use crate::error::AudioError;

/// Where mixed frames go. Implemented by cpal playback and by test sinks.
pub trait PlaybackSink: Send {
    fn write(&self, frame: AudioFrame) -> Result<(), AudioError>;
}

/// Equal-weight arithmetic mean of two sample buffers, truncated to the
/// shorter. The average is computed in i32 and clamped on the way back to
/// i16, so near-full-scale inputs clip instead of wrapping.
pub fn mix_samples(a: &[i16], b: &[i16]) -> Vec<i16> {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| {
            let avg = (x as i32 + y as i32) / 2;
            avg.clamp(i16::MIN as i32, i16::MAX as i32) as i16
        })
        .collect()
}

/// Mix two frames into one. Format metadata is taken from `a`; the earlier
/// capture timestamp wins.
pub fn mix_frames(a: &AudioFrame, b: &AudioFrame) -> AudioFrame {
    let mixed = mix_samples(&a.samples(), &b.samples());
    AudioFrame::from_samples(
        &mixed,
        a.sample_rate,
        a.channels,
        a.captured_at.min(b.captured_at),
    )
}

/// Mixing stage for one session.
pub struct AudioMixer {
    remote: SharedQueue<AudioFrame>,
    monitor: SharedQueue<AudioFrame>,
    idle: Duration,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl AudioMixer {
    /// `remote` carries the peer's voice, `monitor` the local capture
    /// loopback. `idle` is the sleep when neither has a frame ready.
    pub fn new(
        remote: SharedQueue<AudioFrame>,
        monitor: SharedQueue<AudioFrame>,
        idle: Duration,
    ) -> Self {
        Self {
            remote,
            monitor,
            idle,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    /// Start the mixing thread, draining into `sink`.
    pub fn start(&mut self, sink: Box<dyn PlaybackSink>) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let running = self.running.clone();
        let remote = self.remote.clone();
        let monitor = self.monitor.clone();
        let idle = self.idle;

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-mixer".to_string())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    let out = match (remote.pop(), monitor.pop()) {
                        (Some(r), Some(m)) => Some(mix_frames(&r, &m)),
                        (Some(r), None) => Some(r),
                        (None, Some(m)) => Some(m),
                        (None, None) => {
                            thread::sleep(idle);
                            None
                        }
                    };

                    if let Some(frame) = out {
                        // A sink hiccup costs one frame, never the loop.
                        if let Err(e) = sink.write(frame) {
                            tracing::warn!("Playback sink write failed: {}", e);
                        }
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the mixing thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for AudioMixer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::shared_queue;
    use parking_lot::Mutex;

    struct CollectSink {
        frames: Arc<Mutex<Vec<AudioFrame>>>,
    }

    impl PlaybackSink for CollectSink {
        fn write(&self, frame: AudioFrame) -> Result<(), AudioError> {
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    struct FailingSink;

    impl PlaybackSink for FailingSink {
        fn write(&self, _frame: AudioFrame) -> Result<(), AudioError> {
            Err(AudioError::SinkWriteFailed("device gone".to_string()))
        }
    }

    #[test]
    fn test_mix_truncates_to_shorter() {
        let a = [100i16, 200, 300, 400];
        let b = [0i16, 0];

        let mixed = mix_samples(&a, &b);
        assert_eq!(mixed, vec![50, 100]);
    }

    #[test]
    fn test_self_mix_is_identity() {
        let samples = [0i16, 1, -1, 12345, -12345, i16::MAX, i16::MIN];
        assert_eq!(mix_samples(&samples, &samples), samples);

        let frame = AudioFrame::from_samples(&samples, 16_000, 1, 7);
        let mixed = mix_frames(&frame, &frame);
        assert_eq!(mixed.pcm, frame.pcm);
        assert_eq!(mixed.captured_at, 7);
    }

    #[test]
    fn test_full_scale_mix_stays_in_range() {
        assert_eq!(mix_samples(&[i16::MAX], &[i16::MAX]), vec![i16::MAX]);
        assert_eq!(mix_samples(&[i16::MIN], &[i16::MIN]), vec![i16::MIN]);
        assert_eq!(mix_samples(&[i16::MAX], &[i16::MIN]), vec![0]);
    }

    #[test]
    fn test_mixer_passes_single_stream_through() {
        let remote = shared_queue(8);
        let monitor = shared_queue(8);
        let frames = Arc::new(Mutex::new(Vec::new()));

        let mut mixer = AudioMixer::new(remote.clone(), monitor, Duration::from_millis(1));
        mixer
            .start(Box::new(CollectSink {
                frames: frames.clone(),
            }))
            .unwrap();

        let frame = AudioFrame::from_samples(&[10, 20, 30], 16_000, 1, 0);
        remote.push(frame.clone());

        // Give the mixer thread a moment to drain the queue.
        for _ in 0..100 {
            if !frames.lock().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        mixer.stop();

        let collected = frames.lock();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].pcm, frame.pcm);
    }

    #[test]
    fn test_mixer_merges_when_both_ready() {
        let remote = shared_queue(8);
        let monitor = shared_queue(8);
        let frames = Arc::new(Mutex::new(Vec::new()));

        remote.push(AudioFrame::from_samples(&[100, 100], 16_000, 1, 5));
        monitor.push(AudioFrame::from_samples(&[200, 200], 16_000, 1, 3));

        let mut mixer = AudioMixer::new(remote, monitor, Duration::from_millis(1));
        mixer
            .start(Box::new(CollectSink {
                frames: frames.clone(),
            }))
            .unwrap();

        for _ in 0..100 {
            if !frames.lock().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        mixer.stop();

        let collected = frames.lock();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].samples(), vec![150, 150]);
        assert_eq!(collected[0].captured_at, 3);
    }

    #[test]
    fn test_sink_failure_does_not_stop_mixer() {
        let remote = shared_queue(8);
        let monitor = shared_queue(8);

        let mut mixer = AudioMixer::new(remote.clone(), monitor, Duration::from_millis(1));
        mixer.start(Box::new(FailingSink)).unwrap();

        remote.push(AudioFrame::from_samples(&[1], 16_000, 1, 0));
        remote.push(AudioFrame::from_samples(&[2], 16_000, 1, 1));

        for _ in 0..100 {
            if remote.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }

        assert!(mixer.is_running());
        assert!(remote.is_empty());
        mixer.stop();
        assert!(!mixer.is_running());
    }
}
