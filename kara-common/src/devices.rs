//! Audio device list types
//!
//! Device enumeration is done by an external service; the relay only
//! forwards the chosen identifiers to the engine. These types describe the
//! `{inputs:[...], outputs:[...]}` document that service returns.

use serde::{Deserialize, Serialize};

/// One input or output device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub channels: Option<u32>,
}

impl AudioDevice {
    fn named(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            channels: None,
        }
    }
}

/// Devices offered by the device service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceList {
    #[serde(default)]
    pub inputs: Vec<AudioDevice>,
    #[serde(default)]
    pub outputs: Vec<AudioDevice>,
}

impl DeviceList {
    /// Built-in list used when the device service is unreachable
    pub fn fallback() -> Self {
        Self {
            inputs: vec![
                AudioDevice::named("default", "Default Microphone"),
                AudioDevice::named("usb_mic", "USB Microphone"),
                AudioDevice::named("earpods", "EarPods Microphone"),
            ],
            outputs: vec![
                AudioDevice::named("default", "Default Speakers"),
                AudioDevice::named("usb_headphones", "USB Headphones"),
                AudioDevice::named("earpods", "EarPods Speakers"),
            ],
        }
    }

    /// First input and output, the client's initial selection
    pub fn default_selection(&self) -> (Option<&AudioDevice>, Option<&AudioDevice>) {
        (self.inputs.first(), self.outputs.first())
    }
}
