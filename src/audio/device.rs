//! Audio device enumeration and selection
//!
//! Selection is name-substring heuristics over whatever the host exposes:
//! loopback-style inputs for system audio, a plain microphone for voice,
//! speakers or headphones for output. The capture and playback stages only
//! ever see an [`AudioDevice`]; policy stays here.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::AudioError;

/// Wrapper around a cpal device
pub struct AudioDevice {
    inner: cpal::Device,
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
}

impl AudioDevice {
    pub fn from_cpal(device: cpal::Device, is_input: bool, is_output: bool) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
            is_input,
            is_output,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }
}

/// Listing entry for startup diagnostics and the device table printout.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_input: bool,
    pub is_output: bool,
    pub is_default: bool,
}

/// List all available audio devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
    let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

    if let Ok(input_devices) = host.input_devices() {
        for device in input_devices {
            if let Ok(name) = device.name() {
                let is_default = default_input_name.as_ref() == Some(&name);
                devices.push(DeviceInfo {
                    name,
                    is_input: true,
                    is_output: false,
                    is_default,
                });
            }
        }
    }

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let is_default = default_output_name.as_ref() == Some(&name);
                if let Some(existing) = devices.iter_mut().find(|d| d.name == name) {
                    existing.is_output = true;
                    existing.is_default |= is_default;
                } else {
                    devices.push(DeviceInfo {
                        name,
                        is_input: false,
                        is_output: true,
                        is_default,
                    });
                }
            }
        }
    }

    devices
}

/// Substrings marking an input device as a system-audio loopback, in
/// priority order.
const LOOPBACK_MARKERS: &[&str] = &["loopback", "stereo mix", "what u hear", "monitor"];

/// Find an input device that captures system audio.
///
/// WASAPI loopbacks and PulseAudio monitors rank above Stereo Mix style
/// devices; the first match by marker priority wins.
pub fn find_system_loopback_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
        .collect();

    for marker in LOOPBACK_MARKERS {
        for device in &devices {
            if let Ok(name) = device.name() {
                if name.to_lowercase().contains(marker) {
                    tracing::info!(device = %name, "Selected system audio device");
                    return Ok(AudioDevice::from_cpal(device.clone(), true, false));
                }
            }
        }
    }

    Err(AudioError::DeviceNotFound(
        "No system audio loopback device (enable Stereo Mix or a virtual cable)".to_string(),
    ))
}

/// Find a microphone input: a device named "microphone" that is not an
/// array, falling back to the host default input.
pub fn find_microphone_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    if let Ok(devices) = host.input_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                let lower = name.to_lowercase();
                if lower.contains("microphone") && !lower.contains("array") {
                    tracing::info!(device = %name, "Selected microphone");
                    return Ok(AudioDevice::from_cpal(device, true, false));
                }
            }
        }
    }

    host.default_input_device()
        .map(|d| AudioDevice::from_cpal(d, true, false))
        .ok_or_else(|| AudioError::DeviceNotFound("No input device".to_string()))
}

/// Resolve an input device by its exact name.
///
/// Capture stages store only the name and resolve it again at start time,
/// so a device handle never has to live inside a shared struct.
pub fn get_input_device_by_name(name: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == name {
                return Ok(AudioDevice::from_cpal(device, true, false));
            }
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Resolve an output device by its exact name.
pub fn get_output_device_by_name(name: &str) -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == name {
                return Ok(AudioDevice::from_cpal(device, false, true));
            }
        }
    }

    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Find an output device: prefer speakers/headphones by name, fall back to
/// the host default output.
pub fn find_output_device() -> Result<AudioDevice, AudioError> {
    let host = cpal::default_host();

    if let Ok(devices) = host.output_devices() {
        for device in devices {
            if let Ok(name) = device.name() {
                let lower = name.to_lowercase();
                if (lower.contains("speaker") || lower.contains("headphone"))
                    && !lower.contains("microphone")
                {
                    tracing::info!(device = %name, "Selected output device");
                    return Ok(AudioDevice::from_cpal(device, false, true));
                }
            }
        }
    }

    host.default_output_device()
        .map(|d| AudioDevice::from_cpal(d, false, true))
        .ok_or_else(|| AudioError::DeviceNotFound("No output device".to_string()))
}
