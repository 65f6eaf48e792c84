use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// One decoded image owned by the core, safe to hold after the vendor
/// callback has returned.
#[derive(Clone)]
pub struct Frame {
    /// Pixel payload, trimmed to `height * stride` bytes
    pub data: Bytes,

    /// Frame metadata
    pub meta: Arc<FrameMetadata>,

    /// Arrival time on the callback thread
    pub timestamp: Instant,
}

impl Frame {
    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    pub fn width(&self) -> u32 {
        self.meta.width
    }

    pub fn height(&self) -> u32 {
        self.meta.height
    }

    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("meta", &self.meta)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Frame metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMetadata {
    /// Monotonic counter assigned by the camera, starting at 1
    pub sequence: u64,
    /// Frame number reported by the device
    pub frame_num: u32,
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub format: PixelFormat,
    /// Device clock ticks, if the device reports them
    pub device_timestamp: Option<u64>,
}

/// Pixel layouts accepted from the device, identified on the wire by their
/// GenICam PFNC codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Mono8,
    Rgb8,
    Bgr8,
    BayerGr8,
    BayerRg8,
    BayerGb8,
    BayerBg8,
    Yuyv,
}

impl PixelFormat {
    pub const fn pfnc(self) -> u32 {
        match self {
            PixelFormat::Mono8 => 0x0108_0001,
            PixelFormat::Rgb8 => 0x0218_0014,
            PixelFormat::Bgr8 => 0x0218_0015,
            PixelFormat::BayerGr8 => 0x0108_0008,
            PixelFormat::BayerRg8 => 0x0108_0009,
            PixelFormat::BayerGb8 => 0x0108_000A,
            PixelFormat::BayerBg8 => 0x0108_000B,
            PixelFormat::Yuyv => 0x0210_0032,
        }
    }

    pub fn from_pfnc(code: u32) -> Option<Self> {
        [
            PixelFormat::Mono8,
            PixelFormat::Rgb8,
            PixelFormat::Bgr8,
            PixelFormat::BayerGr8,
            PixelFormat::BayerRg8,
            PixelFormat::BayerGb8,
            PixelFormat::BayerBg8,
            PixelFormat::Yuyv,
        ]
        .into_iter()
        .find(|format| format.pfnc() == code)
    }

    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Mono8
            | PixelFormat::BayerGr8
            | PixelFormat::BayerRg8
            | PixelFormat::BayerGb8
            | PixelFormat::BayerBg8 => 1,
            PixelFormat::Yuyv => 2,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
        }
    }
}
