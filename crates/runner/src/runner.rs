//! Script execution: loaders and players reconciled against the plan.

use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use sl_common::{
    Clock, IntervalSet, LoaderConfig, LoaderError, MediaError, PlayerConfig, RunnerConfig, Seconds,
    ThreadSignal,
};
use sl_display::{DisplayDriver, DisplayLayer, DisplayMode, DisplayStatus};
use sl_loader::{FrameLoader, LoaderContent, MediaFrameLoader};
use sl_media::{DecoderFactory, MediaInfo};
use sl_player::{FramePlayer, TimelineEntry, VsyncFramePlayer};

use crate::script::{LayerPlan, Script, ScreenPlan};

/// Builds a loader for a media file (dependency-injection seam).
pub type LoaderFactory =
    Arc<dyn Fn(&Path) -> Result<Box<dyn FrameLoader>, LoaderError> + Send + Sync>;

/// Builds a player for a `(connector, mode)` pair.
pub type PlayerFactory =
    Arc<dyn Fn(u32, DisplayMode) -> std::io::Result<Box<dyn FramePlayer>> + Send + Sync>;

/// Everything a runner needs from its embedder.
pub struct RunnerContext {
    pub driver: Arc<dyn DisplayDriver>,
    pub clock: Arc<dyn Clock>,
    pub make_loader: LoaderFactory,
    pub make_player: PlayerFactory,
    /// Used by `file_info` to probe metadata.
    pub open_decoder: DecoderFactory,
    /// Relative script paths resolve against this.
    pub media_root: PathBuf,
    pub config: RunnerConfig,
}

impl RunnerContext {
    /// Context wired to the real loader and player implementations with
    /// default tuning.
    pub fn new(
        driver: Arc<dyn DisplayDriver>,
        clock: Arc<dyn Clock>,
        open_decoder: DecoderFactory,
        media_root: impl Into<PathBuf>,
    ) -> Self {
        let loader_driver = Arc::clone(&driver);
        let loader_decoder = Arc::clone(&open_decoder);
        let make_loader: LoaderFactory = Arc::new(move |path: &Path| {
            MediaFrameLoader::open(
                Arc::clone(&loader_driver),
                path,
                Arc::clone(&loader_decoder),
                LoaderConfig::default(),
            )
            .map(|loader| Box::new(loader) as Box<dyn FrameLoader>)
        });

        let player_driver = Arc::clone(&driver);
        let player_clock = Arc::clone(&clock);
        let make_player: PlayerFactory = Arc::new(move |connector_id, mode| {
            VsyncFramePlayer::start(
                Arc::clone(&player_driver),
                Arc::clone(&player_clock),
                connector_id,
                mode,
                PlayerConfig::default(),
            )
            .map(|player| Box::new(player) as Box<dyn FramePlayer>)
        });

        Self {
            driver,
            clock,
            make_loader,
            make_player,
            open_decoder,
            media_root: media_root.into(),
            config: RunnerConfig::default(),
        }
    }
}

struct RunnerShared {
    script: Mutex<Option<Arc<Script>>>,
    /// Wakes the tick thread: script updates and loader notifications
    /// both land here.
    tick: Arc<ThreadSignal>,
    stop: AtomicBool,
}

/// Executes a [`Script`]: owns one loader per referenced file and one
/// player per active `(connector, mode)`, reconciling both each tick.
pub struct ScriptRunner {
    shared: Arc<RunnerShared>,
    open_decoder: DecoderFactory,
    media_root: PathBuf,
    info_cache: Mutex<HashMap<PathBuf, Arc<MediaInfo>>>,
    worker: Option<JoinHandle<()>>,
}

impl ScriptRunner {
    /// Spawn the reconciliation thread.
    pub fn start(ctx: RunnerContext) -> std::io::Result<Self> {
        let shared = Arc::new(RunnerShared {
            script: Mutex::new(None),
            tick: Arc::new(ThreadSignal::new()),
            stop: AtomicBool::new(false),
        });

        let open_decoder = Arc::clone(&ctx.open_decoder);
        let media_root = ctx.media_root.clone();
        let tick_loop = TickLoop {
            shared: Arc::clone(&shared),
            driver: ctx.driver,
            clock: ctx.clock,
            make_loader: ctx.make_loader,
            make_player: ctx.make_player,
            media_root: ctx.media_root,
            config: ctx.config,
            loaders: HashMap::new(),
            players: HashMap::new(),
            outputs: Vec::new(),
            last_scan: None,
        };
        let worker = std::thread::Builder::new()
            .name("script-runner".to_string())
            .spawn(move || tick_loop.run())?;

        Ok(Self {
            shared,
            open_decoder,
            media_root,
            info_cache: Mutex::new(HashMap::new()),
            worker: Some(worker),
        })
    }

    /// Replace the script. Cheap; the change takes effect on the next
    /// tick, and rapid consecutive updates coalesce to the latest one.
    pub fn update(&self, script: Script) {
        debug!(screens = script.screens.len(), "Script updated");
        *self.shared.script.lock() = Some(Arc::new(script));
        self.shared.tick.set();
    }

    /// Media metadata for the script front-end. Blocks for the decoder
    /// open on first use (bounded by the decoder's own open timeout);
    /// cached per path afterwards.
    pub fn file_info(&self, file: &str) -> Result<Arc<MediaInfo>, MediaError> {
        let path = resolve(&self.media_root, file);
        if let Some(info) = self.info_cache.lock().get(&path) {
            return Ok(Arc::clone(info));
        }
        // Opened outside the cache lock; a racing duplicate probe is
        // harmless.
        let decoder = (self.open_decoder)(&path)?;
        let info = Arc::new(decoder.info().clone());
        info!(path = %path.display(), info = %info, "Probed media file");
        self.info_cache.lock().insert(path, Arc::clone(&info));
        Ok(info)
    }
}

impl Drop for ScriptRunner {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.tick.set();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

struct LoaderEntry {
    loader: Box<dyn FrameLoader>,
    /// Last tick that referenced this file; unreferenced loaders survive
    /// the grace period to absorb brief script edits.
    last_used: Seconds,
}

struct TickLoop {
    shared: Arc<RunnerShared>,
    driver: Arc<dyn DisplayDriver>,
    clock: Arc<dyn Clock>,
    make_loader: LoaderFactory,
    make_player: PlayerFactory,
    media_root: PathBuf,
    config: RunnerConfig,
    loaders: HashMap<PathBuf, LoaderEntry>,
    players: HashMap<(u32, DisplayMode), Box<dyn FramePlayer>>,
    outputs: Vec<DisplayStatus>,
    last_scan: Option<Seconds>,
}

impl TickLoop {
    fn run(mut self) {
        info!("Script runner started");
        loop {
            if self.shared.stop.load(Ordering::SeqCst) {
                break;
            }
            let script = self.shared.script.lock().clone();
            if let Some(script) = script {
                self.reconcile(&script);
            }
            self.shared.tick.wait_for(self.config.tick_interval);
        }
        info!("Script runner stopped");
        // Dropping the pools joins every loader and player worker.
    }

    fn reconcile(&mut self, script: &Script) {
        let now = self.clock.now();
        self.rescan_outputs(now);

        // One content snapshot per loader per tick; request padding and
        // schedule sampling both read it.
        let contents: HashMap<PathBuf, LoaderContent> = self
            .loaders
            .iter()
            .map(|(path, entry)| (path.clone(), entry.loader.content()))
            .collect();

        // Per-file media-time requests over the prefetch horizon.
        let mut requests: HashMap<PathBuf, IntervalSet<Seconds>> = HashMap::new();
        for screen in &script.screens {
            for layer in &screen.layers {
                self.add_layer_request(layer, now, &contents, &mut requests);
            }
        }

        // Loaders: start newly-referenced files, refresh requests, retire
        // after the grace period.
        for (path, wanted) in &requests {
            let entry = match self.loaders.entry(path.clone()) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => match (self.make_loader)(path) {
                    Ok(loader) => {
                        info!(path = %path.display(), "Loader started");
                        vacant.insert(LoaderEntry {
                            loader,
                            last_used: now,
                        })
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "Failed to start loader");
                        continue;
                    }
                },
            };
            entry.last_used = now;
            entry
                .loader
                .set_request(wanted.clone(), Some(Arc::clone(&self.shared.tick)));
        }
        let grace = self.config.loader_grace;
        self.loaders.retain(|path, entry| {
            let keep = (now - entry.last_used).as_secs() <= grace;
            if !keep {
                info!(path = %path.display(), "Loader retired");
            }
            keep
        });

        // Players: one per detected (connector, mode) the script wants.
        let mut desired: HashMap<(u32, DisplayMode), Vec<TimelineEntry>> = HashMap::new();
        for screen in &script.screens {
            let Some(status) = self
                .outputs
                .iter()
                .find(|o| o.connector_name == screen.connector && o.display_detected)
            else {
                debug!(connector = %screen.connector, "Screen references an absent output");
                continue;
            };
            let Some(mode) = screen.mode.pick(&status.display_modes) else {
                warn!(
                    connector = %screen.connector,
                    spec = ?screen.mode,
                    "No matching display mode"
                );
                continue;
            };
            let schedule = self.screen_schedule(screen, mode, now, &contents);
            desired.insert((status.connector_id, mode.clone()), schedule);
        }

        // Mode changes, lost outputs, and dropped screens all land here.
        self.players.retain(|(connector_id, mode), _| {
            let keep = desired.contains_key(&(*connector_id, mode.clone()));
            if !keep {
                info!(connector_id = *connector_id, mode = %mode, "Player retired");
            }
            keep
        });
        for (key, schedule) in desired {
            let player = match self.players.entry(key.clone()) {
                Entry::Occupied(occupied) => occupied.into_mut(),
                Entry::Vacant(vacant) => match (self.make_player)(key.0, key.1.clone()) {
                    Ok(player) => {
                        info!(connector_id = key.0, mode = %key.1, "Player started");
                        vacant.insert(player)
                    }
                    Err(err) => {
                        error!(
                            connector_id = key.0,
                            error = %err,
                            "Failed to start player"
                        );
                        continue;
                    }
                },
            };
            player.set_timeline(schedule);
        }
    }

    /// Translate one layer's on-screen window into a media-time request
    /// via its play function.
    fn add_layer_request(
        &self,
        layer: &LayerPlan,
        now: Seconds,
        contents: &HashMap<PathBuf, LoaderContent>,
        requests: &mut HashMap<PathBuf, IntervalSet<Seconds>>,
    ) {
        let horizon = layer.buffer.unwrap_or(self.config.prefetch_horizon);
        let window_lo = now.as_secs().max(layer.from);
        let window_hi = (now.as_secs() + horizon).min(layer.until);
        if window_lo >= window_hi {
            return;
        }
        let Some((media_lo, media_hi)) = layer.play.range(window_lo, window_hi) else {
            return;
        };
        let path = resolve(&self.media_root, &layer.file);
        // Pad the top so the frame serving media_hi itself is cached.
        let media_hi = media_hi + self.frame_tolerance(contents.get(&path));
        requests
            .entry(path)
            .or_default()
            .insert(Seconds(media_lo), Seconds(media_hi));
    }

    /// Sample the screen's layers at each vsync slot in the horizon.
    fn screen_schedule(
        &self,
        screen: &ScreenPlan,
        mode: &DisplayMode,
        now: Seconds,
        contents: &HashMap<PathBuf, LoaderContent>,
    ) -> Vec<TimelineEntry> {
        let refresh = mode.refresh_period().as_secs();
        let slots = (self.config.prefetch_horizon / refresh).ceil().max(1.0) as usize;
        let paths: Vec<PathBuf> = screen
            .layers
            .iter()
            .map(|layer| resolve(&self.media_root, &layer.file))
            .collect();

        let mut misses = 0usize;
        let mut entries = Vec::with_capacity(slots);

        for slot in 0..slots {
            let t = now + refresh * slot as f64;
            let wall = t.as_secs();
            let mut layers = Vec::new();
            for (layer, path) in screen.layers.iter().zip(&paths) {
                if !layer.active_at(wall) {
                    continue;
                }
                let Some(media_time) = layer.play.eval(wall) else {
                    continue;
                };
                let content = contents.get(path);
                let tolerance = self.frame_tolerance(content);
                let Some(image) =
                    content.and_then(|c| c.frame_at(Seconds(media_time), tolerance))
                else {
                    // An uncached (or errored) frame skips the layer, not
                    // the presentation.
                    misses += 1;
                    continue;
                };
                let Some(source) = layer.source.source_at(wall) else {
                    continue;
                };
                let Some(dest) = layer.dest.screen_at(wall) else {
                    continue;
                };
                layers.push(DisplayLayer {
                    image: Arc::clone(image),
                    source,
                    dest,
                });
            }
            entries.push(TimelineEntry { time: t, layers });
        }

        if misses > 0 {
            debug!(
                connector = %screen.connector,
                misses,
                "Frames not yet cached for some slots"
            );
        }
        entries
    }

    fn rescan_outputs(&mut self, now: Seconds) {
        let due = match self.last_scan {
            None => true,
            Some(at) => {
                let age = (now - at).as_secs();
                age >= self.config.output_rescan || age < 0.0
            }
        };
        if !due {
            return;
        }
        match self.driver.scan_outputs() {
            Ok(outputs) => {
                debug!(outputs = outputs.len(), "Scanned display outputs");
                self.outputs = outputs;
            }
            Err(err) => error!(error = %err, "Output scan failed"),
        }
        self.last_scan = Some(now);
    }

    /// Matching tolerance for a file: the configured override, else half
    /// the frame period its loader has detected, else half the default
    /// loader period hint.
    fn frame_tolerance(&self, content: Option<&LoaderContent>) -> f64 {
        if let Some(tolerance) = self.config.frame_tolerance {
            return tolerance;
        }
        let period = content
            .and_then(|c| c.frame_period)
            .unwrap_or(LoaderConfig::default().frame_period_hint);
        period * 0.5
    }
}

fn resolve(root: &Path, file: &str) -> PathBuf {
    let path = Path::new(file);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_respects_absolute_paths() {
        assert_eq!(
            resolve(Path::new("/media"), "clip.mp4"),
            PathBuf::from("/media/clip.mp4")
        );
        assert_eq!(
            resolve(Path::new("/media"), "/tmp/clip.mp4"),
            PathBuf::from("/tmp/clip.mp4")
        );
    }
}
