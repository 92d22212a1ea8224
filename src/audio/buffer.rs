//! Audio frames and bounded queues
//!
//! Single-producer single-consumer queues sit between the capture threads,
//! the network side, and the mixer. They are fixed-capacity and drop the
//! oldest element on overflow, so a slow or absent consumer can never stall
//! an audio hardware callback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;

/// A chunk of raw PCM audio (16-bit little-endian interleaved samples).
///
/// Immutable once produced; moved, not copied, from capture to transport to
/// mixer so no stage retains frames beyond its queue slot.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw PCM bytes, i16 LE interleaved
    pub pcm: Bytes,
    /// Samples per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Capture time in microseconds since the capture stream started
    pub captured_at: u64,
}

impl AudioFrame {
    pub fn new(pcm: Bytes, sample_rate: u32, channels: u16, captured_at: u64) -> Self {
        Self {
            pcm,
            sample_rate,
            channels,
            captured_at,
        }
    }

    /// Build a frame from i16 samples.
    pub fn from_samples(samples: &[i16], sample_rate: u32, channels: u16, captured_at: u64) -> Self {
        let mut pcm = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            pcm.extend_from_slice(&s.to_le_bytes());
        }
        Self::new(Bytes::from(pcm), sample_rate, channels, captured_at)
    }

    /// Decode the PCM bytes into i16 samples. A trailing odd byte is ignored.
    pub fn samples(&self) -> Vec<i16> {
        self.pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    /// Total sample count across channels.
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    /// Peak absolute sample level, used for activation thresholds.
    pub fn peak_level(&self) -> i16 {
        self.pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]).unsigned_abs())
            .max()
            .map(|v| v.min(i16::MAX as u16) as i16)
            .unwrap_or(0)
    }
}

/// Fixed-capacity queue that evicts its oldest element rather than blocking
/// or rejecting the producer.
pub struct BoundedQueue<T> {
    queue: ArrayQueue<T>,
    dropped: AtomicUsize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Insert `item`. When full, the oldest element is evicted and counted;
    /// the push itself always succeeds.
    pub fn push(&self, item: T) {
        if self.queue.force_push(item).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take the oldest element, if any.
    pub fn pop(&self) -> Option<T> {
        self.queue.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// How many elements overflow has evicted so far.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Shared handle to a bounded queue.
pub type SharedQueue<T> = Arc<BoundedQueue<T>>;

/// Create a new shared bounded queue.
pub fn shared_queue<T>(capacity: usize) -> SharedQueue<T> {
    Arc::new(BoundedQueue::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_push_pop_fifo() {
        let q = BoundedQueue::new(4);
        q.push(1);
        q.push(2);
        q.push(3);

        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
        assert_eq!(q.dropped(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let q = BoundedQueue::new(3);
        for i in 0..7 {
            q.push(i);
        }

        // 7 inserts into capacity 3: the last 3 survive, in order.
        assert_eq!(q.dropped(), 4);
        assert_eq!(q.pop(), Some(4));
        assert_eq!(q.pop(), Some(5));
        assert_eq!(q.pop(), Some(6));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_frame_round_trip() {
        let samples = [0i16, 100, -100, i16::MAX, i16::MIN];
        let frame = AudioFrame::from_samples(&samples, 16_000, 1, 42);

        assert_eq!(frame.samples(), samples);
        assert_eq!(frame.sample_count(), samples.len());
        assert_eq!(frame.peak_level(), i16::MAX);
        assert_eq!(frame.captured_at, 42);
    }

    #[test]
    fn test_peak_level_of_silence() {
        let frame = AudioFrame::from_samples(&[0, 0, 0], 16_000, 1, 0);
        assert_eq!(frame.peak_level(), 0);
        assert_eq!(AudioFrame::new(Bytes::new(), 16_000, 1, 0).peak_level(), 0);
    }

    proptest! {
        /// Inserting n+k elements into capacity n retains exactly the last n
        /// in their original relative order.
        #[test]
        fn prop_retains_last_n_in_order(cap in 1usize..16, extra in 0usize..32) {
            let q = BoundedQueue::new(cap);
            let total = cap + extra;
            for i in 0..total {
                q.push(i);
            }

            prop_assert_eq!(q.len(), cap);
            prop_assert_eq!(q.dropped(), extra);
            for expected in (total - cap)..total {
                prop_assert_eq!(q.pop(), Some(expected));
            }
            prop_assert_eq!(q.pop(), None);
        }
    }
}
