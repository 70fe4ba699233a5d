//! Vsync-paced presentation of a timed layer schedule.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

use sl_common::{Clock, PlayerConfig, Seconds};
use sl_display::{DisplayDriver, DisplayLayer, DisplayMode};

/// One schedule entry: the layer list to show from `time` onward.
#[derive(Clone, Debug)]
pub struct TimelineEntry {
    /// System time at which this layer list becomes current.
    pub time: Seconds,
    pub layers: Vec<DisplayLayer>,
}

/// Presenter for one display output.
pub trait FramePlayer: Send + Sync {
    /// Replace the upcoming schedule. Entries with `time` at or before
    /// now count as immediate; among simultaneously-eligible entries the
    /// latest wins.
    fn set_timeline(&self, timeline: Vec<TimelineEntry>);
}

struct PlayerState {
    /// Upcoming entries, sorted by time.
    timeline: Vec<TimelineEntry>,
    /// Timestamp of the last presented entry; presentations are strictly
    /// monotone in this.
    presented: Option<Seconds>,
}

struct PlayerShared {
    state: Mutex<PlayerState>,
    wake: Condvar,
    stop: AtomicBool,
}

/// [`FramePlayer`] that posts atomic commits from its own thread, one per
/// vsync slot.
pub struct VsyncFramePlayer {
    shared: Arc<PlayerShared>,
    connector_id: u32,
    worker: Option<JoinHandle<()>>,
}

impl VsyncFramePlayer {
    /// Spawn the presentation thread for `(connector_id, mode)`.
    pub fn start(
        driver: Arc<dyn DisplayDriver>,
        clock: Arc<dyn Clock>,
        connector_id: u32,
        mode: DisplayMode,
        config: PlayerConfig,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(PlayerShared {
            state: Mutex::new(PlayerState {
                timeline: Vec::new(),
                presented: None,
            }),
            wake: Condvar::new(),
            stop: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("player:{connector_id}"))
            .spawn(move || run(worker_shared, driver, clock, connector_id, mode, config))?;

        Ok(Self {
            shared,
            connector_id,
            worker: Some(worker),
        })
    }

    pub fn connector_id(&self) -> u32 {
        self.connector_id
    }
}

impl FramePlayer for VsyncFramePlayer {
    fn set_timeline(&self, mut timeline: Vec<TimelineEntry>) {
        timeline.sort_by_key(|e| e.time);
        let mut state = self.shared.state.lock();
        debug!(
            connector_id = self.connector_id,
            entries = timeline.len(),
            "Schedule replaced"
        );
        state.timeline = timeline;
        self.shared.wake.notify_all();
    }
}

impl Drop for VsyncFramePlayer {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        debug!(connector_id = self.connector_id, "Frame player stopped");
    }
}

enum Step {
    Present(TimelineEntry),
    /// Nothing due yet; sleep up to this many seconds (or a schedule
    /// change).
    Sleep(f64),
}

fn run(
    shared: Arc<PlayerShared>,
    driver: Arc<dyn DisplayDriver>,
    clock: Arc<dyn Clock>,
    connector_id: u32,
    mode: DisplayMode,
    config: PlayerConfig,
) {
    info!(connector_id, mode = %mode, "Frame player started");
    let refresh = mode.refresh_period().as_secs();

    while !shared.stop.load(Ordering::SeqCst) {
        let now = clock.now();
        let step = select(&shared, now, refresh);

        match step {
            Step::Present(entry) => {
                if !driver.ready_for_update(connector_id) {
                    // The vsync slot is occupied; poll again shortly.
                    sleep(&shared, config.poll_interval);
                    continue;
                }
                match driver.update_output(connector_id, &mode, &entry.layers) {
                    Ok(()) => {
                        debug!(
                            connector_id,
                            time = %entry.time,
                            layers = entry.layers.len(),
                            "Presented"
                        );
                        let mut state = shared.state.lock();
                        state.presented = Some(entry.time);
                        state.timeline.retain(|e| e.time > entry.time);
                    }
                    Err(err) => {
                        error!(
                            connector_id,
                            error = %err,
                            "Commit failed; discarding schedule"
                        );
                        shared.state.lock().timeline.clear();
                    }
                }
            }
            Step::Sleep(secs) => sleep(&shared, secs.min(refresh.max(config.poll_interval))),
        }
    }
    debug!(connector_id, "Player worker exiting");
}

/// Pick the entry with the greatest `time <= now + refresh`, dropping the
/// entries it supersedes; otherwise report how long until the earliest
/// future entry.
fn select(shared: &PlayerShared, now: Seconds, refresh: f64) -> Step {
    let horizon = now + refresh;
    let mut state = shared.state.lock();

    let mut latest_eligible = None;
    for (i, entry) in state.timeline.iter().enumerate() {
        if entry.time <= horizon {
            latest_eligible = Some(i);
        } else {
            break;
        }
    }

    match latest_eligible {
        Some(i) => {
            if i > 0 {
                // Entries superseded before ever being shown.
                state.timeline.drain(..i);
            }
            let entry = &state.timeline[0];
            if state.presented.is_some_and(|p| entry.time <= p) {
                // Nothing newer than what is already on screen.
                match state.timeline.get(1) {
                    Some(next) => Step::Sleep((next.time - now).as_secs()),
                    None => Step::Sleep(refresh),
                }
            } else {
                Step::Present(entry.clone())
            }
        }
        None => match state.timeline.first() {
            Some(next) => Step::Sleep((next.time - now).as_secs()),
            None => Step::Sleep(refresh),
        },
    }
}

/// Interruptible sleep; wakes early on stop or schedule change.
fn sleep(shared: &PlayerShared, secs: f64) {
    let mut state = shared.state.lock();
    if shared.stop.load(Ordering::SeqCst) {
        return;
    }
    shared
        .wake
        .wait_for(&mut state, Duration::from_secs_f64(secs.max(0.0)));
}
