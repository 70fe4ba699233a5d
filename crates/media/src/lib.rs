//! `sl-media` — Media decoder adapter for the Scanline playout engine.
//!
//! Defines the pull-only [`MediaDecoder`] interface the frame loader
//! drives, plus the [`MediaInfo`]/[`MediaFrame`] data it produces. The
//! engine does not ship a codec implementation; a concrete decoder (e.g.
//! an FFmpeg or V4L2 wrapper) is plugged in through [`DecoderFactory`].

pub mod decoder;

pub use decoder::{DecoderFactory, MediaDecoder, MediaFrame, MediaInfo};
