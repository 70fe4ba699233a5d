//! Pull-only decoder interface and the data it produces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use sl_common::{ImageBuffer, MediaError, Seconds};

/// Stream metadata reported by a decoder after probing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub container: String,
    pub codec: String,
    pub pixel_format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<Seconds>,
    pub frame_rate: Option<f64>,
    pub bit_rate: Option<u64>,
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.container, self.codec)?;
        if let (Some(w), Some(h)) = (self.width, self.height) {
            write!(f, " {w}x{h}")?;
        }
        if !self.pixel_format.is_empty() {
            write!(f, " {}", self.pixel_format)?;
        }
        if let Some(fps) = self.frame_rate {
            write!(f, " {fps:.3}fps")?;
        }
        if let Some(d) = self.duration {
            write!(f, " {d}")?;
        }
        if let Some(b) = self.bit_rate {
            write!(f, " {}kbps", b / 1000)?;
        }
        Ok(())
    }
}

/// One decoded frame.
#[derive(Clone, Debug)]
pub struct MediaFrame {
    /// Presentation time within the file (media time, starts at 0).
    pub media_time: Seconds,
    /// Decoded image planes (typically one; some sources split fields).
    pub layers: Vec<ImageBuffer>,
    /// Codec frame type, e.g. "I", "P", "B".
    pub frame_type: String,
    pub is_key_frame: bool,
    pub is_corrupt: bool,
}

impl fmt::Display for MediaFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.media_time, self.frame_type)?;
        if self.is_key_frame {
            write!(f, " key")?;
        }
        if self.is_corrupt {
            write!(f, " CORRUPT")?;
        }
        for layer in &self.layers {
            write!(f, " [{layer}]")?;
        }
        Ok(())
    }
}

/// A pull-only demuxer/decoder for one media file.
///
/// The frame loader owns exactly one decoder per file and drives it from
/// its worker thread; implementations do not need to be `Sync`.
pub trait MediaDecoder: Send {
    /// Stream metadata (probed at open).
    fn info(&self) -> &MediaInfo;

    /// Reposition to the nearest key frame at or before `target`.
    /// Idempotent and best-effort; the next pulled frame may be earlier
    /// than `target`.
    fn seek(&mut self, target: Seconds) -> Result<(), MediaError>;

    /// Non-blocking pull of the next decoded frame. `Ok(None)` means the
    /// decoder is waiting on I/O (or has reached end of stream — check
    /// [`reached_eof`](Self::reached_eof)).
    fn get_frame_if_ready(&mut self) -> Result<Option<MediaFrame>, MediaError>;

    /// True once the stream is exhausted at the current position.
    fn reached_eof(&self) -> bool;
}

/// Injection seam for opening decoders, so loaders and the runner can be
/// tested against scripted fakes.
pub type DecoderFactory =
    Arc<dyn Fn(&Path) -> Result<Box<dyn MediaDecoder>, MediaError> + Send + Sync>;
