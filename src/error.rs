use std::fmt;

use thiserror::Error;

use crate::capture::PixelFormat;

/// Raw status code returned by the vendor SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const OK: Self = Self(0x0000_0000);
    pub const INVALID_HANDLE: Self = Self(0x8000_0000);
    pub const NOT_SUPPORTED: Self = Self(0x8000_0001);
    pub const CALL_ORDER: Self = Self(0x8000_0003);
    pub const INVALID_PARAMETER: Self = Self(0x8000_0004);
    pub const RESOURCE: Self = Self(0x8000_0006);
    pub const NO_DATA: Self = Self(0x8000_0007);
    pub const UNKNOWN: Self = Self(0x8000_00FF);
    pub const ACCESS_DENIED: Self = Self(0x8000_0203);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Map the vendor convention (zero means success) onto `Result`.
    pub fn check(self, operation: &'static str) -> Result<(), SdkError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(SdkError {
                operation,
                code: self,
            })
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A vendor call that returned a non-success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{operation} failed with status {code}")]
pub struct SdkError {
    pub operation: &'static str,
    pub code: StatusCode,
}

/// Failures surfaced by the public [`Camera`](crate::camera::Camera) API.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera is not open")]
    NotOpen,

    #[error("camera {serial} is already open")]
    AlreadyOpen { serial: String },

    #[error("stream is already running")]
    AlreadyStreaming,

    #[error("stream is not running")]
    NotStreaming,

    #[error(transparent)]
    Sdk(#[from] SdkError),

    #[error("failed to spawn watchdog thread: {0}")]
    Watchdog(#[source] std::io::Error),
}

impl CameraError {
    /// True for wrong-state calls, which never reach the vendor layer.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotOpen | Self::AlreadyOpen { .. } | Self::AlreadyStreaming | Self::NotStreaming
        )
    }

    /// Raw vendor status, if the failure came from the SDK.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Sdk(e) => Some(e.code),
            _ => None,
        }
    }
}

/// Why a raw vendor frame could not be turned into a [`Frame`](crate::capture::Frame).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unsupported pixel format {0:#010x}")]
    UnsupportedFormat(u32),

    #[error("frame {frame_num} has empty dimensions {width}x{height}")]
    EmptyDimensions {
        frame_num: u32,
        width: u32,
        height: u32,
    },

    #[error("frame {frame_num}: {format:?} {width}x{height} needs {expected} bytes, got {actual}")]
    ShortPayload {
        frame_num: u32,
        format: PixelFormat,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("failed to allocate {bytes} bytes for frame {frame_num}")]
    Allocation { frame_num: u32, bytes: usize },
}
