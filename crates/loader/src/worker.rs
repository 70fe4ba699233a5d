//! Background decode scheduling for one media file.
//!
//! The worker reconciles the client's requested intervals against the
//! frames already cached: it evicts what is no longer wanted, decodes
//! toward the earliest missing point, and decides between sequential
//! decode and a keyframe seek by how far ahead that point lies. The
//! decoder is owned here and never touched under the state lock; the
//! lock is taken only to read the request and publish results.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use sl_common::{ImageBuffer, IntervalSet, LoaderConfig, LoaderError, Seconds};
use sl_display::{DisplayDriver, LoadedImage};
use sl_media::{DecoderFactory, MediaDecoder, MediaFrame};

use crate::loader::{LoaderShared, LoaderState};

/// Next action decided under the state lock.
enum Plan {
    /// Reposition the decoder to the nearest keyframe at or before the
    /// given media time.
    Seek(Seconds),
    /// Continue sequential decode from the current position.
    Pull,
    Stop,
}

enum ImportOutcome {
    Imported(Arc<LoadedImage>),
    Stopped,
    Failed,
}

pub(crate) struct Worker {
    shared: Arc<LoaderShared>,
    driver: Arc<dyn DisplayDriver>,
    open_decoder: DecoderFactory,
    config: LoaderConfig,
    decoder: Option<Box<dyn MediaDecoder>>,
    /// Expected media time of the next sequential frame, if decoding has
    /// started.
    position: Option<Seconds>,
    /// Anchor from which contiguous decode guarantees coverage.
    cover_from: Seconds,
    /// Seconds per frame; refined from the decoder's reported rate.
    frame_period: f64,
    /// Current transient-retry delay.
    backoff: f64,
}

impl Worker {
    pub(crate) fn run(
        shared: Arc<LoaderShared>,
        driver: Arc<dyn DisplayDriver>,
        open_decoder: DecoderFactory,
        config: LoaderConfig,
    ) {
        let frame_period = config.frame_period_hint;
        let backoff = config.retry_backoff_start;
        let mut worker = Self {
            shared,
            driver,
            open_decoder,
            config,
            decoder: None,
            position: None,
            cover_from: Seconds::ZERO,
            frame_period,
            backoff,
        };
        worker.main_loop();
    }

    fn main_loop(&mut self) {
        loop {
            match self.plan() {
                Plan::Stop => break,
                Plan::Seek(target) => self.seek(target),
                Plan::Pull => self.pull(),
            }
        }
        debug!(path = %self.shared.path.display(), "Loader worker exiting");
    }

    /// Reconcile cache against request and decide the next action,
    /// sleeping while there is nothing to do.
    fn plan(&self) -> Plan {
        let mut state = self.shared.state.lock();
        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                return Plan::Stop;
            }
            if state.error.is_some() {
                // Frozen: requests are accepted but ignored until drop.
                self.shared.wake.wait(&mut state);
                continue;
            }

            let wanted = clamped_request(&state);
            self.evict(&mut state, &wanted);

            let missing = wanted.difference(&state.have);
            if missing.is_empty() {
                self.shared.wake.wait(&mut state);
                continue;
            }
            if state.frames.len() >= self.config.max_cached_frames {
                if !state.capacity_warned {
                    warn!(
                        path = %self.shared.path.display(),
                        cap = self.config.max_cached_frames,
                        "Frame cache at capacity; pausing decode"
                    );
                    state.capacity_warned = true;
                }
                self.shared.wake.wait(&mut state);
                continue;
            }

            let Some((target, _)) = missing.bounds() else {
                continue;
            };
            let need_seek = match self.position {
                None => true,
                Some(pos) => {
                    target < pos || (target - pos).as_secs() > self.config.seek_threshold
                }
            };
            return if need_seek { Plan::Seek(target) } else { Plan::Pull };
        }
    }

    /// Drop cached frames whose span no longer overlaps the request, and
    /// trim the published cover accordingly.
    fn evict(&self, state: &mut LoaderState, wanted: &IntervalSet<Seconds>) {
        let period = self.frame_period;
        let before = state.frames.len();
        state.frames.retain(|&t, _| wanted.overlaps(t, t + period));
        let evicted = before - state.frames.len();

        let trimmed = state.have.intersection(wanted);
        let have_changed = trimmed != state.have;
        if have_changed {
            state.have = trimmed;
        }

        if evicted > 0 || have_changed {
            if evicted > 0 {
                state.capacity_warned = false;
            }
            debug!(
                path = %self.shared.path.display(),
                evicted,
                cover = ?state.have,
                "Dropped frames outside request"
            );
            LoaderShared::notify_client(state);
        }
    }

    fn seek(&mut self, target: Seconds) {
        if self.decoder.is_none() {
            match (self.open_decoder)(&self.shared.path) {
                Ok(decoder) => {
                    let mut detected = None;
                    if let Some(rate) = decoder.info().frame_rate {
                        if rate > 0.0 {
                            self.frame_period = 1.0 / rate;
                            detected = Some(self.frame_period);
                        }
                    }
                    info!(
                        path = %self.shared.path.display(),
                        info = %decoder.info(),
                        "Opened media decoder"
                    );
                    self.decoder = Some(decoder);
                    if let Some(period) = detected {
                        let mut state = self.shared.state.lock();
                        state.frame_period = Some(period);
                        LoaderShared::notify_client(&state);
                    }
                }
                Err(err) => {
                    self.fail(err.into());
                    return;
                }
            }
        }

        debug!(path = %self.shared.path.display(), target = %target, "Seeking");
        let result = match self.decoder.as_mut() {
            Some(decoder) => decoder.seek(target),
            None => return,
        };
        match result {
            Ok(()) => {
                // The decoder lands on a keyframe at or before the target;
                // catch-up frames are filtered in handle_frame.
                self.position = Some(target);
                self.cover_from = target;
            }
            Err(err) => self.fail(err.into()),
        }
    }

    fn pull(&mut self) {
        let result = match self.decoder.as_mut() {
            Some(decoder) => decoder.get_frame_if_ready(),
            None => return, // plan() always seeks first when no decoder exists
        };
        match result {
            Ok(Some(frame)) => self.handle_frame(frame),
            Ok(None) => {
                let at_eof = self.decoder.as_ref().is_some_and(|d| d.reached_eof());
                if at_eof {
                    self.record_eof();
                } else {
                    // Decoder is waiting on I/O.
                    self.idle_wait(self.config.decode_poll);
                }
            }
            Err(err) => self.fail(err.into()),
        }
    }

    fn handle_frame(&mut self, frame: MediaFrame) {
        let time = frame.media_time;
        let span_hi = time + self.frame_period;
        if frame.is_corrupt {
            debug!(
                path = %self.shared.path.display(),
                time = %time,
                "Decoder produced a corrupt frame"
            );
        }

        // Import only frames whose span the request still wants; seek
        // catch-up before the region of interest is discarded here.
        let keep = {
            let state = self.shared.state.lock();
            clamped_request(&state).overlaps(time, span_hi)
        };
        let image = if keep {
            match frame.layers.first() {
                Some(buffer) => match self.import_with_backoff(buffer) {
                    ImportOutcome::Imported(image) => Some(image),
                    ImportOutcome::Stopped | ImportOutcome::Failed => return,
                },
                // A frame without image planes still advances coverage.
                None => None,
            }
        } else {
            None
        };

        // Publish under lock, re-reading the live request so edits made
        // during the import are honored.
        let mut state = self.shared.state.lock();
        let wanted = clamped_request(&state);
        let mut changed = false;

        if let Some(image) = image {
            if wanted.overlaps(time, span_hi) && state.frames.len() < self.config.max_cached_frames
            {
                state.frames.insert(time, image);
                changed = true;
            }
        }

        let extension =
            IntervalSet::of(self.cover_from.min(time), span_hi).intersection(&wanted);
        let before_have = state.have.clone();
        for (lo, hi) in extension.iter() {
            state.have.insert(lo, hi);
        }
        if state.have != before_have {
            changed = true;
        }

        self.cover_from = self.cover_from.max(span_hi);
        self.position = Some(span_hi);

        if changed {
            LoaderShared::notify_client(&state);
        }
    }

    fn import_with_backoff(&mut self, buffer: &ImageBuffer) -> ImportOutcome {
        loop {
            match self.driver.import_image(buffer.clone()) {
                Ok(image) => {
                    self.backoff = self.config.retry_backoff_start;
                    return ImportOutcome::Imported(Arc::new(image));
                }
                Err(err) if err.is_transient() => {
                    warn!(
                        path = %self.shared.path.display(),
                        error = %err,
                        delay = self.backoff,
                        "Transient import failure; backing off"
                    );
                    self.idle_wait(self.backoff);
                    self.backoff = (self.backoff * 2.0).min(self.config.retry_backoff_cap);
                    if self.shared.stop.load(Ordering::SeqCst) {
                        return ImportOutcome::Stopped;
                    }
                }
                Err(err) => {
                    self.fail(err.into());
                    return ImportOutcome::Failed;
                }
            }
        }
    }

    fn record_eof(&mut self) {
        let mut state = self.shared.state.lock();
        if state.eof.is_some() {
            // Nothing new to record. Pace the retry in case the decoder
            // keeps reporting EOF for a region the request still wants.
            drop(state);
            self.idle_wait(self.config.decode_poll);
            return;
        }
        let eof = self.position.unwrap_or(self.cover_from);
        info!(path = %self.shared.path.display(), eof = %eof, "End of media discovered");
        state.eof = Some(eof);

        // Everything decoded through counts as covered up to EOF, within
        // the (now clamped) request.
        let wanted = clamped_request(&state);
        let extension = IntervalSet::of(self.cover_from.min(eof), eof).intersection(&wanted);
        for (lo, hi) in extension.iter() {
            state.have.insert(lo, hi);
        }
        self.cover_from = self.cover_from.max(eof);
        LoaderShared::notify_client(&state);
    }

    /// Interruptible sleep: returns early on stop or request change.
    fn idle_wait(&self, secs: f64) {
        let mut state = self.shared.state.lock();
        if self.shared.stop.load(Ordering::SeqCst) {
            return;
        }
        self.shared
            .wake
            .wait_for(&mut state, Duration::from_secs_f64(secs.max(0.0)));
    }

    fn fail(&mut self, err: LoaderError) {
        error!(
            path = %self.shared.path.display(),
            error = %err,
            "Frame loader failed; freezing"
        );
        let mut state = self.shared.state.lock();
        state.error = Some(Arc::new(err));
        LoaderShared::notify_client(&state);
    }
}

/// The request, clamped to exclude anything at or past a known EOF.
fn clamped_request(state: &LoaderState) -> IntervalSet<Seconds> {
    let mut wanted = state.request.clone();
    if let Some(eof) = state.eof {
        wanted.erase(eof, Seconds(f64::INFINITY));
    }
    wanted
}
