//! End-to-end tests for the frame loader against a scripted decoder.
//!
//! The fake decoder emits frames at a fixed rate with keyframes at a
//! fixed spacing, records every seek and every decoded frame time, and
//! reports EOF at a fixed duration. The display driver is the in-memory
//! software driver, so "import" is observable through import ids.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sl_common::{
    DisplayError, ImageBuffer, IntervalSet, LoaderConfig, MediaError, PixelFormat, Seconds,
    ThreadSignal,
};
use sl_display::{DisplayDriver, DisplayLayer, DisplayMode, DisplayStatus, LoadedImage};
use sl_display::SoftwareDriver;
use sl_loader::{FrameLoader, LoaderContent, MediaFrameLoader};
use sl_media::{DecoderFactory, MediaDecoder, MediaFrame, MediaInfo};

// ---------------------------------------------------------------------------
// Scripted fake decoder
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DecodeLog {
    seeks: Mutex<Vec<f64>>,
    decoded: Mutex<Vec<f64>>,
}

impl DecodeLog {
    fn seek_count(&self) -> usize {
        self.seeks.lock().len()
    }

    fn last_seek(&self) -> Option<f64> {
        self.seeks.lock().last().copied()
    }

    fn decode_count_at(&self, t: f64) -> usize {
        self.decoded
            .lock()
            .iter()
            .filter(|&&x| (x - t).abs() < 1e-9)
            .count()
    }
}

/// Emits frames at `fps` with keyframes every `keyframe_every` seconds,
/// EOF at `duration`. Seeks snap to the keyframe at or before the target.
struct FakeDecoder {
    info: MediaInfo,
    fps: f64,
    keyframe_every: f64,
    duration: f64,
    /// Media time of the next frame to emit.
    position: f64,
    at_eof: bool,
    log: Arc<DecodeLog>,
}

impl FakeDecoder {
    fn new(fps: f64, keyframe_every: f64, duration: f64, log: Arc<DecodeLog>) -> Self {
        Self {
            info: MediaInfo {
                container: "mp4".into(),
                codec: "h264".into(),
                pixel_format: "RGBA8".into(),
                width: Some(64),
                height: Some(36),
                duration: Some(Seconds(duration)),
                frame_rate: Some(fps),
                bit_rate: None,
            },
            fps,
            keyframe_every,
            duration,
            position: 0.0,
            at_eof: false,
            log,
        }
    }
}

impl MediaDecoder for FakeDecoder {
    fn info(&self) -> &MediaInfo {
        &self.info
    }

    fn seek(&mut self, target: Seconds) -> Result<(), MediaError> {
        self.log.seeks.lock().push(target.as_secs());
        let last_kf =
            ((self.duration - 1e-9) / self.keyframe_every).floor() * self.keyframe_every;
        let kf = (target.as_secs().max(0.0) / self.keyframe_every).floor() * self.keyframe_every;
        self.position = kf.min(last_kf);
        self.at_eof = false;
        Ok(())
    }

    fn get_frame_if_ready(&mut self) -> Result<Option<MediaFrame>, MediaError> {
        if self.position >= self.duration - 1e-9 {
            self.at_eof = true;
            return Ok(None);
        }
        let n = (self.position * self.fps).round();
        let time = n / self.fps;
        self.position = (n + 1.0) / self.fps;
        self.log.decoded.lock().push(time);

        let frames_per_gop = (self.keyframe_every * self.fps).round();
        let is_key = n % frames_per_gop == 0.0;
        Ok(Some(MediaFrame {
            media_time: Seconds(time),
            layers: vec![ImageBuffer::allocate_packed(PixelFormat::Rgba8, 64, 36).unwrap()],
            frame_type: if is_key { "I" } else { "P" }.into(),
            is_key_frame: is_key,
            is_corrupt: false,
        }))
    }

    fn reached_eof(&self) -> bool {
        self.at_eof
    }
}

fn fake_factory(fps: f64, kf: f64, duration: f64, log: Arc<DecodeLog>) -> DecoderFactory {
    Arc::new(move |_path: &Path| {
        Ok(Box::new(FakeDecoder::new(fps, kf, duration, Arc::clone(&log))) as Box<dyn MediaDecoder>)
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn start_loader(log: &Arc<DecodeLog>) -> (MediaFrameLoader, Arc<ThreadSignal>) {
    let driver: Arc<dyn DisplayDriver> = Arc::new(SoftwareDriver::new(Vec::new()));
    let loader = MediaFrameLoader::open(
        driver,
        "clip.mp4",
        fake_factory(30.0, 1.0, 10.0, Arc::clone(log)),
        LoaderConfig::default(),
    )
    .unwrap();
    (loader, Arc::new(ThreadSignal::new()))
}

fn request(intervals: &[(f64, f64)]) -> IntervalSet<Seconds> {
    intervals
        .iter()
        .map(|&(lo, hi)| (Seconds(lo), Seconds(hi)))
        .collect()
}

fn covered(content: &LoaderContent, lo: f64, hi: f64) -> bool {
    IntervalSet::of(Seconds(lo), Seconds(hi))
        .difference(&content.cover)
        .is_empty()
}

fn wait_for(
    loader: &dyn FrameLoader,
    signal: &ThreadSignal,
    what: &str,
    pred: impl Fn(&LoaderContent) -> bool,
) -> LoaderContent {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let content = loader.content();
        if pred(&content) {
            return content;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {what}: {content:?}"
        );
        signal.wait_for(0.05);
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn single_clip_play() {
    let log = Arc::new(DecodeLog::default());
    let (loader, signal) = start_loader(&log);

    loader.set_request(request(&[(0.0, 1.0)]), Some(Arc::clone(&signal)));
    let content = wait_for(&loader, &signal, "cover of [0,1)", |c| covered(c, 0.0, 1.0));

    let keys_in_window = content
        .frames
        .range(Seconds(0.0)..Seconds(1.0))
        .count();
    assert!(keys_in_window >= 30, "got {keys_in_window} frames");
    assert_eq!(content.eof, None);
    assert!(content.error.is_none());

    // The decoder's reported rate is published for consumers.
    let period = content.frame_period.expect("frame period not published");
    assert!((period - 1.0 / 30.0).abs() < 1e-9);
}

#[test]
fn slide_forward_reuses_cache() {
    let log = Arc::new(DecodeLog::default());
    let (loader, signal) = start_loader(&log);

    loader.set_request(request(&[(0.0, 1.0)]), Some(Arc::clone(&signal)));
    let first = wait_for(&loader, &signal, "cover of [0,1)", |c| covered(c, 0.0, 1.0));

    loader.set_request(request(&[(0.5, 1.5)]), Some(Arc::clone(&signal)));
    let second = wait_for(&loader, &signal, "slide to [0.5,1.5)", |c| {
        covered(c, 0.5, 1.5) && !c.frames.keys().any(|k| k.0 < 0.45)
    });

    // Frames in the overlap survived as the same imports (no re-decode).
    let mut overlapping = 0;
    for (t, image) in second.frames.range(Seconds(0.5)..Seconds(0.995)) {
        let original = first
            .frames
            .get(t)
            .unwrap_or_else(|| panic!("frame {t} missing from the first window"));
        assert_eq!(original.import_id, image.import_id, "frame {t} was re-imported");
        overlapping += 1;
    }
    assert!(overlapping >= 14, "expected the overlap retained, got {overlapping}");

    // Forward decode sufficed: still only the initial seek, and the
    // overlap frames were each decoded exactly once.
    assert_eq!(log.seek_count(), 1);
    assert_eq!(log.decode_count_at(15.0 / 30.0), 1);
    assert_eq!(log.decode_count_at(20.0 / 30.0), 1);
}

#[test]
fn seek_backward() {
    let log = Arc::new(DecodeLog::default());
    let (loader, signal) = start_loader(&log);

    loader.set_request(request(&[(9.0, 10.0)]), Some(Arc::clone(&signal)));
    wait_for(&loader, &signal, "cover of [9,10)", |c| covered(c, 9.0, 10.0));

    loader.set_request(request(&[(0.0, 0.5)]), Some(Arc::clone(&signal)));
    let content = wait_for(&loader, &signal, "cover of [0,0.5)", |c| {
        covered(c, 0.0, 0.5) && !c.frames.keys().any(|k| k.0 > 0.6)
    });

    assert_eq!(log.seek_count(), 2);
    assert_eq!(log.last_seek(), Some(0.0));
    // The first request's frames are gone.
    assert!(content.frames.keys().all(|k| k.0 < 0.6));
}

#[test]
fn eof_discovery() {
    let log = Arc::new(DecodeLog::default());
    let (loader, signal) = start_loader(&log);

    loader.set_request(request(&[(0.0, 100.0)]), Some(Arc::clone(&signal)));
    let content = wait_for(&loader, &signal, "EOF discovery", |c| {
        c.eof.is_some() && covered(c, 0.0, 9.9)
    });

    let eof = content.eof.unwrap().as_secs();
    assert!((eof - 10.0).abs() < 0.05, "eof was {eof}");
    let count = content.frames.len();
    assert!((295..=305).contains(&count), "got {count} frames");
    assert!(content.error.is_none());
}

#[test]
fn request_idempotence() {
    let log = Arc::new(DecodeLog::default());
    let (loader, signal) = start_loader(&log);

    let req = request(&[(1.0, 2.0)]);
    loader.set_request(req.clone(), Some(Arc::clone(&signal)));
    let first = wait_for(&loader, &signal, "cover of [1,2)", |c| covered(c, 1.0, 2.0));

    loader.set_request(req, Some(Arc::clone(&signal)));
    std::thread::sleep(Duration::from_millis(50));
    let second = loader.content();

    let first_keys: Vec<Seconds> = first.frames.keys().copied().collect();
    let second_keys: Vec<Seconds> = second.frames.keys().copied().collect();
    assert_eq!(first_keys, second_keys);
    assert_eq!(first.cover, second.cover);
}

#[test]
fn content_grows_monotonically_between_request_changes() {
    let log = Arc::new(DecodeLog::default());
    let (loader, signal) = start_loader(&log);

    loader.set_request(request(&[(0.0, 2.0)]), Some(Arc::clone(&signal)));

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut prev = loader.content();
    loop {
        let current = loader.content();
        assert!(current.frames.len() >= prev.frames.len(), "frame set shrank");
        assert!(
            prev.cover.difference(&current.cover).is_empty(),
            "cover regressed from {:?} to {:?}",
            prev.cover,
            current.cover
        );
        if covered(&current, 0.0, 2.0) {
            break;
        }
        assert!(Instant::now() < deadline, "timed out");
        signal.wait_for(0.01);
        prev = current;
    }
}

#[test]
fn open_failure_freezes_loader() {
    let driver: Arc<dyn DisplayDriver> = Arc::new(SoftwareDriver::new(Vec::new()));
    let factory: DecoderFactory = Arc::new(|path: &Path| {
        Err(MediaError::NotFound {
            path: path.display().to_string(),
        })
    });
    let loader = MediaFrameLoader::open(
        driver,
        "missing.mp4",
        factory,
        LoaderConfig::default(),
    )
    .unwrap();
    let signal = Arc::new(ThreadSignal::new());

    loader.set_request(request(&[(0.0, 1.0)]), Some(Arc::clone(&signal)));
    let content = wait_for(&loader, &signal, "open failure", |c| c.error.is_some());
    assert!(content.frames.is_empty());
    assert!(content.error.unwrap().to_string().contains("missing.mp4"));

    // Further requests are accepted but do nothing.
    loader.set_request(request(&[(5.0, 6.0)]), Some(Arc::clone(&signal)));
    std::thread::sleep(Duration::from_millis(50));
    assert!(loader.content().frames.is_empty());
}

#[test]
fn decode_error_freezes_cache() {
    /// Emits `fail_after` frames, then a terminal decode error.
    struct FailingDecoder {
        info: MediaInfo,
        emitted: usize,
        fail_after: usize,
    }
    impl MediaDecoder for FailingDecoder {
        fn info(&self) -> &MediaInfo {
            &self.info
        }
        fn seek(&mut self, _target: Seconds) -> Result<(), MediaError> {
            Ok(())
        }
        fn get_frame_if_ready(&mut self) -> Result<Option<MediaFrame>, MediaError> {
            if self.emitted >= self.fail_after {
                return Err(MediaError::Decode {
                    path: "broken.mp4".into(),
                    reason: "checksum mismatch".into(),
                });
            }
            let time = self.emitted as f64 / 30.0;
            self.emitted += 1;
            Ok(Some(MediaFrame {
                media_time: Seconds(time),
                layers: vec![ImageBuffer::allocate_packed(PixelFormat::Rgba8, 8, 8).unwrap()],
                frame_type: "I".into(),
                is_key_frame: true,
                is_corrupt: false,
            }))
        }
        fn reached_eof(&self) -> bool {
            false
        }
    }

    let driver: Arc<dyn DisplayDriver> = Arc::new(SoftwareDriver::new(Vec::new()));
    let factory: DecoderFactory = Arc::new(|_path: &Path| {
        Ok(Box::new(FailingDecoder {
            info: MediaInfo {
                container: "mp4".into(),
                codec: "h264".into(),
                frame_rate: Some(30.0),
                ..Default::default()
            },
            emitted: 0,
            fail_after: 10,
        }) as Box<dyn MediaDecoder>)
    });
    let loader =
        MediaFrameLoader::open(driver, "broken.mp4", factory, LoaderConfig::default()).unwrap();
    let signal = Arc::new(ThreadSignal::new());

    loader.set_request(request(&[(0.0, 5.0)]), Some(Arc::clone(&signal)));
    let content = wait_for(&loader, &signal, "decode error", |c| c.error.is_some());

    // The ten good frames are frozen in place.
    assert_eq!(content.frames.len(), 10);
    assert!(content.error.unwrap().to_string().contains("checksum mismatch"));

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(loader.content().frames.len(), 10);
}

#[test]
fn transient_import_failures_are_retried() {
    /// Fails the first N imports with an out-of-memory error.
    struct FlakyDriver {
        inner: SoftwareDriver,
        failures_left: Mutex<usize>,
    }
    impl DisplayDriver for FlakyDriver {
        fn scan_outputs(&self) -> Result<Vec<DisplayStatus>, DisplayError> {
            self.inner.scan_outputs()
        }
        fn make_buffer(
            &self,
            width: u32,
            height: u32,
            format: PixelFormat,
        ) -> Result<ImageBuffer, DisplayError> {
            self.inner.make_buffer(width, height, format)
        }
        fn import_image(&self, buffer: ImageBuffer) -> Result<LoadedImage, DisplayError> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                return Err(DisplayError::OutOfMemory {
                    width: buffer.width,
                    height: buffer.height,
                });
            }
            drop(left);
            self.inner.import_image(buffer)
        }
        fn ready_for_update(&self, connector_id: u32) -> bool {
            self.inner.ready_for_update(connector_id)
        }
        fn update_output(
            &self,
            connector_id: u32,
            mode: &DisplayMode,
            layers: &[DisplayLayer],
        ) -> Result<(), DisplayError> {
            self.inner.update_output(connector_id, mode, layers)
        }
    }

    let log = Arc::new(DecodeLog::default());
    let driver = Arc::new(FlakyDriver {
        inner: SoftwareDriver::new(Vec::new()),
        failures_left: Mutex::new(3),
    });
    let config = LoaderConfig {
        retry_backoff_start: 0.001,
        retry_backoff_cap: 0.010,
        ..Default::default()
    };
    let loader = MediaFrameLoader::open(
        Arc::clone(&driver) as Arc<dyn DisplayDriver>,
        "clip.mp4",
        fake_factory(30.0, 1.0, 10.0, Arc::clone(&log)),
        config,
    )
    .unwrap();
    let signal = Arc::new(ThreadSignal::new());

    loader.set_request(request(&[(0.0, 0.3)]), Some(Arc::clone(&signal)));
    let content = wait_for(&loader, &signal, "cover despite OOM", |c| {
        covered(c, 0.0, 0.3)
    });

    assert!(content.error.is_none());
    assert_eq!(*driver.failures_left.lock(), 0, "retries consumed the budget");
}

#[test]
fn frame_cache_respects_capacity_cap() {
    let log = Arc::new(DecodeLog::default());
    let driver: Arc<dyn DisplayDriver> = Arc::new(SoftwareDriver::new(Vec::new()));
    let config = LoaderConfig {
        max_cached_frames: 10,
        ..Default::default()
    };
    let loader = MediaFrameLoader::open(
        driver,
        "clip.mp4",
        fake_factory(30.0, 1.0, 10.0, Arc::clone(&log)),
        config,
    )
    .unwrap();
    let signal = Arc::new(ThreadSignal::new());

    loader.set_request(request(&[(0.0, 1.0)]), Some(Arc::clone(&signal)));
    wait_for(&loader, &signal, "cache to fill", |c| c.frames.len() >= 10);

    std::thread::sleep(Duration::from_millis(100));
    let content = loader.content();
    assert_eq!(content.frames.len(), 10, "cap exceeded");
    assert!(content.error.is_none());

    // Sliding the request forward frees space and decoding resumes.
    loader.set_request(request(&[(0.8, 1.0)]), Some(Arc::clone(&signal)));
    let content = wait_for(&loader, &signal, "cover after slide", |c| {
        covered(c, 0.8, 1.0)
    });
    assert!(content.frames.len() <= 10);
}

#[test]
fn drop_mid_decode_does_not_hang() {
    let log = Arc::new(DecodeLog::default());
    let (loader, signal) = start_loader(&log);
    loader.set_request(request(&[(0.0, 100.0)]), Some(Arc::clone(&signal)));
    // Give the worker a moment to get going, then drop it mid-stream.
    signal.wait_for(1.0);
    drop(loader);
}
