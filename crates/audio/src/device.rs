//! Audio device enumeration and lookup over the cpal host.
//!
//! The rest of the workspace treats devices as opaque capabilities: the
//! front-end picks one by name or index, and the capture/playback code opens
//! a stream on it. Nothing outside this crate sees a `cpal::Device`.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host};
use tracing::info;
use utils::{Error, Result};

/// Information about an audio device, safe to show to the user.
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    /// Device name for display.
    pub name: String,
    /// Index for selection.
    pub index: usize,
    /// Whether this is the host's default device.
    pub is_default: bool,
}

/// Get a device's display name, falling back gracefully.
fn device_name(device: &Device) -> Option<String> {
    device.name().ok()
}

/// Handle to the platform audio host.
pub struct AudioSystem {
    host: Host,
}

impl Default for AudioSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSystem {
    pub fn new() -> Self {
        let host = cpal::default_host();
        info!(host_id = ?host.id(), "audio host initialized");
        Self { host }
    }

    /// List available input (microphone / loopback) devices.
    pub fn list_input_devices(&self) -> Vec<DeviceInfo> {
        let default_name = self
            .host
            .default_input_device()
            .and_then(|d| device_name(&d));

        self.host
            .input_devices()
            .map(|devices| {
                devices
                    .enumerate()
                    .filter_map(|(index, device)| {
                        let name = device_name(&device)?;
                        let is_default = default_name.as_ref() == Some(&name);
                        Some(DeviceInfo {
                            name,
                            index,
                            is_default,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// List available output (speaker / headphone) devices.
    pub fn list_output_devices(&self) -> Vec<DeviceInfo> {
        let default_name = self
            .host
            .default_output_device()
            .and_then(|d| device_name(&d));

        self.host
            .output_devices()
            .map(|devices| {
                devices
                    .enumerate()
                    .filter_map(|(index, device)| {
                        let name = device_name(&device)?;
                        let is_default = default_name.as_ref() == Some(&name);
                        Some(DeviceInfo {
                            name,
                            index,
                            is_default,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve an input device from a user selector: exact name, numeric
    /// index, or the host default when no selector is given.
    pub fn find_input_device(&self, selector: Option<&str>) -> Result<Device> {
        match selector {
            None => self
                .host
                .default_input_device()
                .ok_or_else(|| Error::audio_device("no default input device available")),
            Some(sel) => {
                let devices: Vec<Device> = self
                    .host
                    .input_devices()
                    .map_err(|e| Error::wrap(utils::ErrorKind::AudioDevice, "failed to enumerate input devices", e))?
                    .collect();
                find_device(devices, sel)
                    .ok_or_else(|| Error::audio_device(format!("input device not found: {sel}")))
            }
        }
    }

    /// Resolve an output device from a user selector.
    pub fn find_output_device(&self, selector: Option<&str>) -> Result<Device> {
        match selector {
            None => self
                .host
                .default_output_device()
                .ok_or_else(|| Error::audio_device("no default output device available")),
            Some(sel) => {
                let devices: Vec<Device> = self
                    .host
                    .output_devices()
                    .map_err(|e| Error::wrap(utils::ErrorKind::AudioDevice, "failed to enumerate output devices", e))?
                    .collect();
                find_device(devices, sel)
                    .ok_or_else(|| Error::audio_device(format!("output device not found: {sel}")))
            }
        }
    }
}

fn find_device(devices: Vec<Device>, selector: &str) -> Option<Device> {
    if let Ok(index) = selector.parse::<usize>() {
        return devices.into_iter().nth(index);
    }
    devices
        .into_iter()
        .find(|d| device_name(d).as_deref() == Some(selector))
}
