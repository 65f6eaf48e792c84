use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};

use crate::camera::Camera;
use crate::sdk::{CameraSdk, DeviceInfo};
use crate::CameraConfig;

/// List reachable devices, logging each one.
pub fn list_devices<S: CameraSdk>(sdk: &S) -> Result<Vec<DeviceInfo>> {
    let devices = sdk
        .enumerate()
        .map_err(|code| eyre!("Device enumeration failed with status {}", code))?;

    for device in &devices {
        info!(
            "Found {:?} device: {} - {}",
            device.transport, device.serial, device.model
        );
    }
    Ok(devices)
}

/// Keep trying to open the configured camera until it succeeds or the
/// configured number of attempts runs out.
pub async fn wait_for_camera<S: CameraSdk>(camera: &Camera<S>, config: &CameraConfig) -> Result<()> {
    let retry = Duration::from_millis(config.open_retry_ms);
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match camera.open(&config.serial, config.feature_file.as_deref()) {
            Ok(()) => return Ok(()),
            Err(e) if config.open_attempts != 0 && attempt >= config.open_attempts => {
                return Err(eyre!(
                    "Camera {} not available after {} attempts: {}",
                    config.serial,
                    attempt,
                    e
                ));
            }
            Err(e) => {
                warn!("Waiting for camera {} ({}), attempt {}", config.serial, e, attempt);
                tokio::time::sleep(retry).await;
            }
        }
    }
}
