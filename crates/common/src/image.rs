//! Pixel formats and shared-ownership image buffers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Pixel format of an image buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA, packed, 4 bytes/pixel.
    #[default]
    Rgba8,
    /// 8-bit BGRA, packed, 4 bytes/pixel.
    Bgra8,
    /// 8-bit XRGB (alpha ignored), packed, 4 bytes/pixel.
    Xrgb8,
    /// Semi-planar YUV 4:2:0 (Y plane + interleaved UV at half res).
    Nv12,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats; `None` for planar formats.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            Self::Rgba8 | Self::Bgra8 | Self::Xrgb8 => Some(4),
            Self::Nv12 => None,
        }
    }

    /// Number of memory channels a buffer of this format carries.
    pub fn channel_count(self) -> usize {
        match self {
            Self::Rgba8 | Self::Bgra8 | Self::Xrgb8 => 1,
            Self::Nv12 => 2,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rgba8 => "RGBA8",
            Self::Bgra8 => "BGRA8",
            Self::Xrgb8 => "XRGB8",
            Self::Nv12 => "NV12",
        };
        write!(f, "{name}")
    }
}

/// One memory plane of an image buffer.
///
/// The backing memory is shared; it is released when the last holder
/// drops.
#[derive(Clone)]
pub struct MemoryChannel {
    /// Byte offset of the plane within `memory`.
    pub offset: usize,
    /// Bytes per row.
    pub stride: usize,
    /// Shared backing storage (possibly GPU-imported).
    pub memory: Arc<Vec<u8>>,
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("offset", &self.offset)
            .field("stride", &self.stride)
            .field("bytes", &self.memory.len())
            .finish()
    }
}

/// A pixel-format-tagged region of shared memory.
///
/// Cloning is cheap (Arc bumps on the channels); the underlying memory is
/// released when the last clone drops.
#[derive(Clone, Debug)]
pub struct ImageBuffer {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub channels: Vec<MemoryChannel>,
}

impl ImageBuffer {
    /// Allocate a zeroed packed buffer (single channel, tight stride).
    ///
    /// For planar formats use a driver-specific allocator; this helper
    /// only covers the packed RGB family.
    pub fn allocate_packed(format: PixelFormat, width: u32, height: u32) -> Option<Self> {
        let bpp = format.bytes_per_pixel()?;
        let stride = width as usize * bpp;
        let memory = Arc::new(vec![0u8; stride * height as usize]);
        Some(Self {
            format,
            width,
            height,
            channels: vec![MemoryChannel {
                offset: 0,
                stride,
                memory,
            }],
        })
    }

    /// Total bytes across all channels' backing storage.
    pub fn byte_size(&self) -> usize {
        self.channels.iter().map(|c| c.memory.len()).sum()
    }
}

impl fmt::Display for ImageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.format)
    }
}
