//! Boundary to the vendor camera SDK.
//!
//! The core only talks to hardware through [`CameraSdk`]. Every status-style
//! call returns a raw [`StatusCode`]; callers map it with
//! [`StatusCode::check`]. A real binding wraps the vendor C library behind
//! this trait, [`sim::SimulatedSdk`] stands in for it in tests and demos.

pub mod sim;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StatusCode;

/// Opaque native handle issued by [`CameraSdk::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(pub u64);

/// Per-frame metadata delivered alongside the pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    /// PFNC pixel format code
    pub pixel_format: u32,
    pub frame_num: u32,
    /// Device timestamp in ticks, zero when unsupported
    pub dev_timestamp: u64,
}

/// A frame as seen on the vendor thread. The payload borrow ends when the
/// callback returns.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub data: &'a [u8],
    pub info: FrameInfo,
}

/// Callback invoked by the SDK on its own grab thread, once per frame.
pub type FrameCallback = Arc<dyn Fn(RawFrame<'_>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    GigE,
    Usb3,
}

/// An enumerated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial: String,
    pub model: String,
    pub transport: Transport,
}

pub trait CameraSdk: Send + Sync + 'static {
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, StatusCode>;

    /// Resolve `serial` and open an exclusive handle to it.
    fn open(&self, serial: &str) -> Result<RawHandle, StatusCode>;

    fn register_callback(&self, handle: RawHandle, callback: FrameCallback) -> StatusCode;

    /// After this returns no new invocation starts, but one already in
    /// flight may still be running.
    fn deregister_callback(&self, handle: RawHandle) -> StatusCode;

    fn start_grab(&self, handle: RawHandle) -> StatusCode;

    fn stop_grab(&self, handle: RawHandle) -> StatusCode;

    fn is_connected(&self, handle: RawHandle) -> bool;

    fn save_config(&self, handle: RawHandle, path: &Path) -> StatusCode;

    fn load_config(&self, handle: RawHandle, path: &Path) -> StatusCode;

    /// Release the handle. The handle is invalid afterwards even when a
    /// failure code is returned.
    fn close(&self, handle: RawHandle) -> StatusCode;
}
