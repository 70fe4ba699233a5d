//! Display driver interface: outputs, modes, layers, atomic commits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use sl_common::{DisplayError, ImageBuffer, PixelFormat, ScreenRect, Seconds, SourceRect};

/// A display timing mode offered by a connector.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayMode {
    /// Human-readable mode name, e.g. "1920x1080@60".
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub refresh_hz: u32,
    pub pixel_khz: u32,
}

impl DisplayMode {
    pub fn new(width: u32, height: u32, refresh_hz: u32) -> Self {
        Self {
            name: format!("{width}x{height}@{refresh_hz}"),
            width,
            height,
            refresh_hz,
            pixel_khz: width * height * refresh_hz / 1000,
        }
    }

    /// Duration of one refresh cycle (one vsync slot).
    pub fn refresh_period(&self) -> Seconds {
        if self.refresh_hz == 0 {
            Seconds(1.0 / 60.0)
        } else {
            Seconds(1.0 / self.refresh_hz as f64)
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// State of one physical connector as reported by the driver.
#[derive(Clone, Debug)]
pub struct DisplayStatus {
    pub connector_id: u32,
    /// Connector name, e.g. "HDMI-1".
    pub connector_name: String,
    /// Whether a display is plugged in and responding.
    pub display_detected: bool,
    pub display_modes: Vec<DisplayMode>,
    pub active_mode: Option<DisplayMode>,
}

/// A driver-imported image, ready for scanout without a copy.
///
/// Handed around as `Arc<LoadedImage>`; the import (and the underlying
/// buffer memory) is released when the last holder drops.
#[derive(Clone, Debug)]
pub struct LoadedImage {
    /// Driver-assigned import handle.
    pub import_id: u64,
    pub buffer: ImageBuffer,
}

impl fmt::Display for LoadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.import_id, self.buffer)
    }
}

/// One layer of an atomic commit: an imported image, the region of it to
/// sample, and where that region lands on screen.
#[derive(Clone, Debug)]
pub struct DisplayLayer {
    pub image: Arc<LoadedImage>,
    /// Sample region in image coordinates (real-valued).
    pub source: SourceRect,
    /// Destination region in screen coordinates (integer pixels).
    pub dest: ScreenRect,
}

/// Kernel mode-setting driver interface.
///
/// The driver serializes commits internally per connector; all methods
/// take `&self` and may be called from any thread.
pub trait DisplayDriver: Send + Sync {
    /// Enumerate connectors and their modes.
    fn scan_outputs(&self) -> Result<Vec<DisplayStatus>, DisplayError>;

    /// Allocate a blank image buffer suitable for import.
    fn make_buffer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<ImageBuffer, DisplayError>;

    /// Import a buffer for zero-copy scanout.
    fn import_image(&self, buffer: ImageBuffer) -> Result<LoadedImage, DisplayError>;

    /// True when the connector's next vsync slot is accepting a commit.
    fn ready_for_update(&self, connector_id: u32) -> bool;

    /// Atomically replace the connector's scanout layers at the next
    /// vsync.
    fn update_output(
        &self,
        connector_id: u32,
        mode: &DisplayMode,
        layers: &[DisplayLayer],
    ) -> Result<(), DisplayError>;
}
