use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use super::frame::{Frame, FrameMetadata, PixelFormat};
use crate::error::FrameError;
use crate::sdk::RawFrame;

/// Copy a vendor frame into an owned [`Frame`].
///
/// Runs on the vendor grab thread, so it only validates and copies. Any
/// padding past `height * stride` is dropped.
pub fn decode_frame(raw: &RawFrame<'_>, sequence: u64) -> Result<Frame, FrameError> {
    let timestamp = Instant::now();
    let info = raw.info;

    let format = PixelFormat::from_pfnc(info.pixel_format)
        .ok_or(FrameError::UnsupportedFormat(info.pixel_format))?;

    if info.width == 0 || info.height == 0 {
        return Err(FrameError::EmptyDimensions {
            frame_num: info.frame_num,
            width: info.width,
            height: info.height,
        });
    }

    let stride = info.width as usize * format.bytes_per_pixel();
    let expected = stride * info.height as usize;
    if raw.data.len() < expected {
        return Err(FrameError::ShortPayload {
            frame_num: info.frame_num,
            format,
            width: info.width,
            height: info.height,
            expected,
            actual: raw.data.len(),
        });
    }

    let mut pixels = Vec::new();
    pixels
        .try_reserve_exact(expected)
        .map_err(|_| FrameError::Allocation {
            frame_num: info.frame_num,
            bytes: expected,
        })?;
    pixels.extend_from_slice(&raw.data[..expected]);

    Ok(Frame {
        data: Bytes::from(pixels),
        meta: Arc::new(FrameMetadata {
            sequence,
            frame_num: info.frame_num,
            width: info.width,
            height: info.height,
            stride: stride as u32,
            format,
            device_timestamp: (info.dev_timestamp != 0).then_some(info.dev_timestamp),
        }),
        timestamp,
    })
}
