//! Audio device discovery
//!
//! Devices are enumerated by a separate service that answers
//! `GET <url>` with `{inputs:[{id,name,channels}], outputs:[…]}`. When it is
//! unreachable the built-in fallback list is used instead.

use std::time::Duration;

use kara_common::devices::DeviceList;
use tracing::{info, warn};

use crate::error::{ClientError, Result};

/// Where the device service listens by default
pub const DEFAULT_DEVICE_SERVICE_URL: &str = "http://localhost:8766/api/devices";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Query the device service
pub async fn fetch_devices(url: &str) -> Result<DeviceList> {
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(ClientError::Status(response.status().as_u16()));
    }

    let devices: DeviceList = response.json().await?;
    info!(
        "Discovered {} input and {} output devices",
        devices.inputs.len(),
        devices.outputs.len()
    );
    Ok(devices)
}

/// Query the device service, falling back to the built-in list on any error
pub async fn discover_devices(url: &str) -> DeviceList {
    match fetch_devices(url).await {
        Ok(devices) => devices,
        Err(e) => {
            warn!("Using fallback devices: {}", e);
            DeviceList::fallback()
        }
    }
}
