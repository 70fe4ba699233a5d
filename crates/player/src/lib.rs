//! `sl-player` — Per-output vsync presenter for the Scanline playout
//! engine.
//!
//! A [`VsyncFramePlayer`] owns one thread per display output. Given a
//! timed schedule of layer lists, it posts each as an atomic commit at
//! the appropriate vsync slot: the most recent list whose timestamp has
//! arrived wins, presentations are strictly monotone in schedule time,
//! and a rejected commit discards the schedule until it is replaced.

mod player;

pub use player::{FramePlayer, TimelineEntry, VsyncFramePlayer};
