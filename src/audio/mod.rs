//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod mixer;
pub mod playback;

pub use buffer::{shared_queue, AudioFrame, BoundedQueue, SharedQueue};
pub use capture::AudioCapture;
pub use device::{find_microphone_device, find_output_device, find_system_loopback_device, list_devices, AudioDevice};
pub use mixer::{AudioMixer, PlaybackSink};
pub use playback::AudioPlayback;
