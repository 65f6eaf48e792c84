//! Owned native device handle

use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::error::SdkError;
use crate::sdk::{CameraSdk, FrameCallback, RawHandle};

/// Exclusive owner of one open vendor handle.
///
/// Acquired by [`DeviceHandle::open`], released exactly once by either
/// [`DeviceHandle::release`] or drop.
pub(crate) struct DeviceHandle<S: CameraSdk> {
    sdk: Arc<S>,
    raw: RawHandle,
    serial: String,
    released: bool,
}

impl<S: CameraSdk> DeviceHandle<S> {
    pub(crate) fn open(sdk: Arc<S>, serial: &str) -> Result<Self, SdkError> {
        let raw = sdk.open(serial).map_err(|code| SdkError {
            operation: "open",
            code,
        })?;
        Ok(Self {
            sdk,
            raw,
            serial: serial.to_string(),
            released: false,
        })
    }

    pub(crate) fn serial(&self) -> &str {
        &self.serial
    }

    pub(crate) fn register_callback(&self, callback: FrameCallback) -> Result<(), SdkError> {
        self.sdk
            .register_callback(self.raw, callback)
            .check("register_callback")
    }

    pub(crate) fn deregister_callback(&self) -> Result<(), SdkError> {
        self.sdk
            .deregister_callback(self.raw)
            .check("deregister_callback")
    }

    pub(crate) fn start_grab(&self) -> Result<(), SdkError> {
        self.sdk.start_grab(self.raw).check("start_grab")
    }

    pub(crate) fn stop_grab(&self) -> Result<(), SdkError> {
        self.sdk.stop_grab(self.raw).check("stop_grab")
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.sdk.is_connected(self.raw)
    }

    pub(crate) fn save_config(&self, path: &Path) -> Result<(), SdkError> {
        self.sdk.save_config(self.raw, path).check("save_config")
    }

    pub(crate) fn load_config(&self, path: &Path) -> Result<(), SdkError> {
        self.sdk.load_config(self.raw, path).check("load_config")
    }

    /// Close the handle. It is gone afterwards whatever the SDK reports.
    pub(crate) fn release(mut self) -> Result<(), SdkError> {
        self.released = true;
        self.sdk.close(self.raw).check("close")
    }
}

impl<S: CameraSdk> Drop for DeviceHandle<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.sdk.close(self.raw).check("close") {
            warn!(serial = %self.serial, error = %e, "release on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCode;
    use crate::sdk::sim::{FrameGeometry, SimOp, SimulatedSdk};
    use tracing_test::traced_test;

    fn sdk() -> Arc<SimulatedSdk> {
        let sdk = Arc::new(SimulatedSdk::new());
        sdk.add_device("H1", FrameGeometry::default());
        sdk
    }

    #[test]
    fn release_closes_exactly_once() {
        let sdk = sdk();
        let handle = DeviceHandle::open(Arc::clone(&sdk), "H1").unwrap();
        assert_eq!(handle.serial(), "H1");
        handle.release().unwrap();
        assert_eq!(sdk.calls(SimOp::Close), 1);
        assert_eq!(sdk.open_handles("H1"), 0);
        assert_eq!(sdk.invalid_handle_uses(), 0);
    }

    #[test]
    fn drop_releases_a_forgotten_handle() {
        let sdk = sdk();
        drop(DeviceHandle::open(Arc::clone(&sdk), "H1").unwrap());
        assert_eq!(sdk.open_handles("H1"), 0);
    }

    #[test]
    fn open_failure_carries_vendor_code() {
        let sdk = sdk();
        let err = DeviceHandle::open(Arc::clone(&sdk), "nope").err().unwrap();
        assert_eq!(err.operation, "open");
        assert_eq!(err.code, StatusCode::INVALID_PARAMETER);
    }

    #[test]
    #[traced_test]
    fn failing_release_on_drop_is_logged() {
        let sdk = sdk();
        let handle = DeviceHandle::open(Arc::clone(&sdk), "H1").unwrap();
        sdk.fail(SimOp::Close, StatusCode::UNKNOWN);
        drop(handle);
        assert_eq!(sdk.open_handles("H1"), 0);
        assert!(logs_contain("release on drop failed"));
    }
}
