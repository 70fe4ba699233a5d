//! Configuration structs for loader, player, and runner tuning.

use serde::{Deserialize, Serialize};

/// Per-file frame loader tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Forward-decode distance (media seconds) beyond which a seek is
    /// cheaper than decoding through.
    pub seek_threshold: f64,
    /// Fallback frame period (seconds) when the decoder does not report a
    /// frame rate.
    pub frame_period_hint: f64,
    /// Hard cap on cached frames per loader. At the cap the worker idles
    /// until eviction frees space.
    pub max_cached_frames: usize,
    /// Initial retry delay after a transient import failure.
    pub retry_backoff_start: f64,
    /// Maximum retry delay (exponential backoff cap).
    pub retry_backoff_cap: f64,
    /// How long to wait before re-polling a decoder that has no frame
    /// ready.
    pub decode_poll: f64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            seek_threshold: 2.0,
            frame_period_hint: 1.0 / 30.0,
            max_cached_frames: 512,
            retry_backoff_start: 0.010,
            retry_backoff_cap: 1.0,
            decode_poll: 0.002,
        }
    }
}

/// Per-output frame player tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerConfig {
    /// How long to wait between `ready_for_update` polls while a commit is
    /// due.
    pub poll_interval: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            poll_interval: 0.002,
        }
    }
}

/// Script runner tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// System-time window ahead of now for which loader requests and
    /// player schedules are materialized.
    pub prefetch_horizon: f64,
    /// How long an unreferenced loader survives before shutdown, to
    /// absorb brief script edits.
    pub loader_grace: f64,
    /// Fallback reconciliation period when no notification arrives.
    pub tick_interval: f64,
    /// Tolerance when matching a media time to a cached frame key.
    /// `None` means half the file's frame period (or half of
    /// [`LoaderConfig::frame_period_hint`] when unknown).
    pub frame_tolerance: Option<f64>,
    /// How often to rescan display outputs.
    pub output_rescan: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            prefetch_horizon: 1.0,
            loader_grace: 5.0,
            tick_interval: 0.050,
            frame_tolerance: None,
            output_rescan: 1.0,
        }
    }
}
