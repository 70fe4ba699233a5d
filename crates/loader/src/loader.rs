//! Public surface of the per-file frame loader.

use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

use sl_common::{IntervalSet, LoaderConfig, LoaderError, MediaError, Seconds, ThreadSignal};
use sl_display::{DisplayDriver, LoadedImage};
use sl_media::DecoderFactory;

use crate::worker::Worker;

/// Snapshot of a loader's cache.
///
/// `frames` holds shared handles; a caller may keep a frame alive past
/// the loader's own eviction (or destruction) of it.
#[derive(Clone, Default)]
pub struct LoaderContent {
    /// Decoded frames keyed by media time.
    pub frames: BTreeMap<Seconds, Arc<LoadedImage>>,
    /// Media-time regions for which every decoder frame is cached.
    pub cover: IntervalSet<Seconds>,
    /// Media time past which no more frames exist, once known.
    pub eof: Option<Seconds>,
    /// Seconds per frame, once the decoder has reported its rate.
    /// Consumers size their frame-match tolerance from it.
    pub frame_period: Option<f64>,
    /// Terminal error; when set, `frames`/`cover` are frozen.
    pub error: Option<Arc<LoaderError>>,
}

impl LoaderContent {
    /// Frame serving media time `mt`: the nearest key at or before it,
    /// within `tolerance` seconds. `None` means the layer should be
    /// omitted this tick.
    pub fn frame_at(&self, mt: Seconds, tolerance: f64) -> Option<&Arc<LoadedImage>> {
        let (key, image) = self.frames.range(..=mt).next_back()?;
        (mt.0 - key.0 <= tolerance).then_some(image)
    }
}

impl fmt::Debug for LoaderContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderContent")
            .field("frames", &self.frames.len())
            .field("cover", &self.cover)
            .field("eof", &self.eof)
            .field("frame_period", &self.frame_period)
            .field("error", &self.error.as_ref().map(|e| e.to_string()))
            .finish()
    }
}

/// Asynchronous per-file frame cache.
///
/// Implementations maintain a set of decoded frames covering the
/// requested media-time intervals, minimizing re-decodes as the request
/// slides.
pub trait FrameLoader: Send + Sync {
    /// Replace the regions of interest. Frames outside them are
    /// discarded. `notify` (if given) is signaled whenever
    /// [`content`](Self::content) changes meaningfully.
    ///
    /// Requests replace each other; they are not additive.
    fn set_request(&self, wanted: IntervalSet<Seconds>, notify: Option<Arc<ThreadSignal>>);

    /// Cheap snapshot of the frames loaded so far.
    fn content(&self) -> LoaderContent;
}

pub(crate) struct LoaderState {
    pub request: IntervalSet<Seconds>,
    pub notify: Option<Arc<ThreadSignal>>,
    pub frames: BTreeMap<Seconds, Arc<LoadedImage>>,
    pub have: IntervalSet<Seconds>,
    pub eof: Option<Seconds>,
    /// Seconds per frame once the decoder has reported a rate.
    pub frame_period: Option<f64>,
    pub error: Option<Arc<LoaderError>>,
    /// Limits the at-capacity warning to once per episode.
    pub capacity_warned: bool,
}

pub(crate) struct LoaderShared {
    pub path: PathBuf,
    pub state: Mutex<LoaderState>,
    pub wake: Condvar,
    pub stop: AtomicBool,
}

impl LoaderShared {
    /// Signal the client that published content changed. Call with the
    /// state lock held so signals pair with the change they announce.
    pub fn notify_client(state: &LoaderState) {
        if let Some(signal) = &state.notify {
            signal.set();
        }
    }
}

/// [`FrameLoader`] backed by one background decode worker per file.
pub struct MediaFrameLoader {
    shared: Arc<LoaderShared>,
    worker: Option<JoinHandle<()>>,
}

impl MediaFrameLoader {
    /// Start a loader for `path`. The decoder itself is opened lazily on
    /// the worker thread; open failures surface through
    /// [`LoaderContent::error`].
    pub fn open(
        driver: Arc<dyn DisplayDriver>,
        path: impl Into<PathBuf>,
        open_decoder: DecoderFactory,
        config: LoaderConfig,
    ) -> Result<Self, LoaderError> {
        let path = path.into();
        let shared = Arc::new(LoaderShared {
            path: path.clone(),
            state: Mutex::new(LoaderState {
                request: IntervalSet::new(),
                notify: None,
                frames: BTreeMap::new(),
                have: IntervalSet::new(),
                eof: None,
                frame_period: None,
                error: None,
                capacity_warned: false,
            }),
            wake: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let stem = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "?".to_string());
        let worker = std::thread::Builder::new()
            .name(format!("loader:{stem}"))
            .spawn(move || Worker::run(worker_shared, driver, open_decoder, config))
            .map_err(MediaError::Io)?;

        debug!(path = %path.display(), "Frame loader started");
        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }
}

impl FrameLoader for MediaFrameLoader {
    fn set_request(&self, wanted: IntervalSet<Seconds>, notify: Option<Arc<ThreadSignal>>) {
        let mut state = self.shared.state.lock();
        state.notify = notify;
        if state.request != wanted {
            debug!(
                path = %self.shared.path.display(),
                request = ?wanted,
                "Request replaced"
            );
            state.request = wanted;
            self.shared.wake.notify_all();
        }
    }

    fn content(&self) -> LoaderContent {
        let state = self.shared.state.lock();
        LoaderContent {
            frames: state.frames.clone(),
            cover: state.have.clone(),
            eof: state.eof,
            frame_period: state.frame_period,
            error: state.error.clone(),
        }
    }
}

impl Drop for MediaFrameLoader {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        debug!(path = %self.shared.path.display(), "Frame loader stopped");
    }
}
