//! `sl-display` — Display output interface for the Scanline playout
//! engine.
//!
//! Defines the [`DisplayDriver`] capability the loader (image import) and
//! player (atomic commits) consume, the mode/status/layer types that flow
//! through it, and [`SoftwareDriver`], an in-memory reference
//! implementation used for headless operation and tests. A real KMS/DRM
//! driver plugs in behind the same trait.

pub mod driver;
pub mod software;

pub use driver::{DisplayDriver, DisplayLayer, DisplayMode, DisplayStatus, LoadedImage};
pub use software::{CommitRecord, SoftwareDriver};
