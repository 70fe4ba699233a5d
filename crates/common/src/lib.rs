//! `sl-common` — Shared types, interval algebra, and errors for the
//! Scanline playout engine.
//!
//! This crate is the foundation that all other engine crates depend on.
//! It defines the core abstractions:
//!
//! - **Types**: `Seconds`, `SourceRect`, `ScreenRect` (newtypes for safety)
//! - **Intervals**: `IntervalSet` (canonical half-open interval algebra)
//! - **Images**: `PixelFormat`, `ImageBuffer` (shared-ownership pixel data)
//! - **Time**: `Clock`, `ThreadSignal`, wall-clock parse/format helpers
//! - **Errors**: `MediaError`, `DisplayError`, `LoaderError` (thiserror-based)
//! - **Config**: `LoaderConfig`, `PlayerConfig`, `RunnerConfig`

pub mod config;
pub mod error;
pub mod image;
pub mod interval;
pub mod time;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{LoaderConfig, PlayerConfig, RunnerConfig};
pub use error::{DisplayError, LoaderError, MediaError};
pub use image::{ImageBuffer, MemoryChannel, PixelFormat};
pub use interval::IntervalSet;
pub use time::{
    abbrev_time, format_date_time, parse_time, Clock, ManualClock, SystemClock, ThreadSignal,
    TimeParseError,
};
pub use types::{ScreenRect, Seconds, SourceRect};
