//! In-memory reference display driver.
//!
//! `SoftwareDriver` implements [`DisplayDriver`] without any kernel
//! device: buffers live in RAM, imports are counter-stamped, and commits
//! are recorded in a log. Vsync pacing is simulated from the committed
//! mode's refresh rate against an injected clock.
//!
//! # When to use this
//!
//! - As the default concrete driver when no mode-setting device is
//!   available (headless operation, CI).
//! - As the substrate for player and runner tests: the commit log is the
//!   observable output.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use sl_common::{Clock, DisplayError, ImageBuffer, MemoryChannel, PixelFormat, Seconds, SystemClock};

use crate::driver::{DisplayDriver, DisplayLayer, DisplayMode, DisplayStatus, LoadedImage};

/// One recorded `update_output` call.
#[derive(Clone, Debug)]
pub struct CommitRecord {
    pub connector_id: u32,
    pub mode: DisplayMode,
    pub layers: Vec<DisplayLayer>,
    /// Clock time when the commit was accepted.
    pub at: Seconds,
}

struct Inner {
    outputs: Vec<DisplayStatus>,
    next_import_id: u64,
    /// Per-connector time and mode of the last accepted commit.
    last_commit: HashMap<u32, (Seconds, DisplayMode)>,
    commits: Vec<CommitRecord>,
}

/// In-memory [`DisplayDriver`] implementation.
pub struct SoftwareDriver {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl SoftwareDriver {
    /// Driver with the given connector set, paced by the system clock.
    pub fn new(outputs: Vec<DisplayStatus>) -> Self {
        Self::with_clock(outputs, Arc::new(SystemClock))
    }

    /// Driver paced by an injected clock (tests).
    pub fn with_clock(outputs: Vec<DisplayStatus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(Inner {
                outputs,
                next_import_id: 1,
                last_commit: HashMap::new(),
                commits: Vec::new(),
            }),
        }
    }

    /// A single detected connector with one mode, a convenient default.
    pub fn single_output(connector_name: &str, mode: DisplayMode) -> Self {
        Self::new(vec![DisplayStatus {
            connector_id: 1,
            connector_name: connector_name.to_string(),
            display_detected: true,
            display_modes: vec![mode.clone()],
            active_mode: Some(mode),
        }])
    }

    /// Snapshot of all commits accepted so far.
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.inner.lock().commits.clone()
    }

    /// Number of images imported so far.
    pub fn import_count(&self) -> u64 {
        self.inner.lock().next_import_id - 1
    }

    /// Simulate hotplug: change a connector's detected flag.
    pub fn set_detected(&self, connector_id: u32, detected: bool) {
        let mut inner = self.inner.lock();
        for output in &mut inner.outputs {
            if output.connector_id == connector_id {
                output.display_detected = detected;
                debug!(connector_id, detected, "Connector detection changed");
            }
        }
    }
}

impl DisplayDriver for SoftwareDriver {
    fn scan_outputs(&self) -> Result<Vec<DisplayStatus>, DisplayError> {
        Ok(self.inner.lock().outputs.clone())
    }

    fn make_buffer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<ImageBuffer, DisplayError> {
        if width == 0 || height == 0 {
            return Err(DisplayError::UnsupportedBuffer(format!(
                "zero-sized buffer {width}x{height}"
            )));
        }
        match format {
            PixelFormat::Nv12 => {
                // Y plane plus interleaved UV at half vertical resolution,
                // sharing one allocation.
                let w = width as usize;
                let h = height as usize;
                let memory = Arc::new(vec![0u8; w * h + w * h.div_ceil(2)]);
                Ok(ImageBuffer {
                    format,
                    width,
                    height,
                    channels: vec![
                        MemoryChannel {
                            offset: 0,
                            stride: w,
                            memory: Arc::clone(&memory),
                        },
                        MemoryChannel {
                            offset: w * h,
                            stride: w,
                            memory,
                        },
                    ],
                })
            }
            packed => ImageBuffer::allocate_packed(packed, width, height).ok_or_else(|| {
                DisplayError::UnsupportedBuffer(format!("cannot allocate {packed} in memory"))
            }),
        }
    }

    fn import_image(&self, buffer: ImageBuffer) -> Result<LoadedImage, DisplayError> {
        if buffer.channels.is_empty() {
            return Err(DisplayError::Import("buffer has no memory channels".into()));
        }
        let mut inner = self.inner.lock();
        let import_id = inner.next_import_id;
        inner.next_import_id += 1;
        Ok(LoadedImage { import_id, buffer })
    }

    fn ready_for_update(&self, connector_id: u32) -> bool {
        let inner = self.inner.lock();
        let known = inner
            .outputs
            .iter()
            .any(|o| o.connector_id == connector_id && o.display_detected);
        if !known {
            return false;
        }
        match inner.last_commit.get(&connector_id) {
            // Previous commit holds the slot until the next refresh.
            Some((at, mode)) => self.clock.now() - *at >= mode.refresh_period(),
            None => true,
        }
    }

    fn update_output(
        &self,
        connector_id: u32,
        mode: &DisplayMode,
        layers: &[DisplayLayer],
    ) -> Result<(), DisplayError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let detected = inner
            .outputs
            .iter()
            .any(|o| o.connector_id == connector_id && o.display_detected);
        if !detected {
            warn!(connector_id, "Commit to lost connector");
            return Err(DisplayError::ConnectorLost { connector_id });
        }
        if let Some((at, prev_mode)) = inner.last_commit.get(&connector_id) {
            if now - *at < prev_mode.refresh_period() {
                return Err(DisplayError::CommitRejected {
                    connector_id,
                    reason: "previous commit still pending".into(),
                });
            }
        }

        debug!(connector_id, mode = %mode, layers = layers.len(), "Commit");
        inner
            .last_commit
            .insert(connector_id, (now, mode.clone()));
        inner.commits.push(CommitRecord {
            connector_id,
            mode: mode.clone(),
            layers: layers.to_vec(),
            at: now,
        });
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
