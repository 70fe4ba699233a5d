//! Clock abstraction, thread signaling, and wall-clock parse/format.
//!
//! The clock is a passed-in capability rather than a process global so
//! components can be tested against a manual clock. All timed waits take
//! real-valued seconds; conversion to monotonic durations happens only at
//! the wait sites.

use chrono::{DateTime, Local, NaiveDateTime};
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::types::Seconds;

/// Source of wall-clock time (seconds since the UNIX epoch).
pub trait Clock: Send + Sync {
    fn now(&self) -> Seconds;
}

/// The real system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Seconds {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Seconds(since_epoch.as_secs_f64())
    }
}

/// A settable clock for dependency-injected tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: Seconds) -> Self {
        Self {
            now: Mutex::new(start.0),
        }
    }

    pub fn set(&self, t: Seconds) {
        *self.now.lock() = t.0;
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Seconds {
        Seconds(*self.now.lock())
    }
}

/// A one-shot latch for waking a waiting thread.
///
/// `set` marks the signal; `wait`/`wait_for` consume the mark. Multiple
/// sets before a wait collapse into one wake, which is exactly what the
/// loader/runner notification path wants.
#[derive(Debug, Default)]
pub struct ThreadSignal {
    flag: Mutex<bool>,
    condvar: Condvar,
}

impl ThreadSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the signal and wake any waiter.
    pub fn set(&self) {
        let mut flag = self.flag.lock();
        if !*flag {
            *flag = true;
            self.condvar.notify_all();
        }
    }

    /// Block until the signal is marked, then consume the mark.
    pub fn wait(&self) {
        let mut flag = self.flag.lock();
        while !*flag {
            self.condvar.wait(&mut flag);
        }
        *flag = false;
    }

    /// Block up to `timeout_secs`. Returns true (and consumes the mark) if
    /// the signal was set, false on timeout. Timeouts are clamped to
    /// [0, one day] so non-finite inputs cannot panic the wait site.
    pub fn wait_for(&self, timeout_secs: f64) -> bool {
        let secs = timeout_secs.clamp(0.0, 86_400.0);
        let secs = if secs.is_finite() { secs } else { 0.0 };
        let deadline = Instant::now() + Duration::from_secs_f64(secs);
        let mut flag = self.flag.lock();
        loop {
            if *flag {
                *flag = false;
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.condvar.wait_for(&mut flag, deadline - now);
        }
    }
}

/// Error from [`parse_time`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unrecognized time: {0:?}")]
pub struct TimeParseError(pub String);

/// Parse a time string into epoch seconds.
///
/// Accepts a bare seconds literal (`"12.5"`), RFC 3339
/// (`"2024-03-01T12:00:00Z"`), or `"%Y-%m-%d %H:%M:%S"` (treated as UTC,
/// fractional seconds allowed).
pub fn parse_time(s: &str) -> Result<Seconds, TimeParseError> {
    if let Ok(v) = s.trim().parse::<f64>() {
        return Ok(Seconds(v));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Seconds(dt.timestamp_micros() as f64 / 1e6));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Seconds(naive.and_utc().timestamp_micros() as f64 / 1e6));
        }
    }
    Err(TimeParseError(s.to_string()))
}

/// Format epoch seconds as a local date-time with millisecond precision,
/// e.g. `2024-03-01 13:45:30.250 +0100`.
pub fn format_date_time(t: Seconds) -> String {
    match as_local(t) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f %z").to_string(),
        None => format!("{:+.3}", t.0),
    }
}

/// Short local time-of-day form, e.g. `13:45:30.250`.
pub fn abbrev_time(t: Seconds) -> String {
    match as_local(t) {
        Some(dt) => dt.format("%H:%M:%S%.3f").to_string(),
        None => format!("{:+.3}", t.0),
    }
}

fn as_local(t: Seconds) -> Option<DateTime<Local>> {
    let micros = (t.0 * 1e6).round();
    if !micros.is_finite() || micros.abs() >= i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64).map(|dt| dt.with_timezone(&Local))
}

// ── Tests ────────────────────────────────────────────────────────────
