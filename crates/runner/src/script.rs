//! Declarative playout script model.
//!
//! A [`Script`] names which clips appear on which outputs, when, and
//! where. The runner samples it: each layer carries a *play* function
//! (system time → media time) and placement functions (system time →
//! source/destination rect), all piecewise-linear.

use serde::{Deserialize, Serialize};
use sl_common::{ScreenRect, SourceRect};
use sl_display::DisplayMode;

/// Piecewise-linear function of time.
///
/// Anchors must be sorted by `t`. Evaluation clamps to the first/last
/// anchor value outside the anchored range; an empty curve evaluates to
/// nothing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Curve {
    pub points: Vec<CurvePoint>,
}

/// One anchor of a [`Curve`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub t: f64,
    pub v: f64,
}

impl Curve {
    /// A curve that is `v` everywhere.
    pub fn constant(v: f64) -> Self {
        Self {
            points: vec![CurvePoint { t: 0.0, v }],
        }
    }

    /// Linear ramp from `(t0, v0)` to `(t1, v1)`, clamped outside.
    pub fn linear(t0: f64, v0: f64, t1: f64, v1: f64) -> Self {
        Self {
            points: vec![CurvePoint { t: t0, v: v0 }, CurvePoint { t: t1, v: v1 }],
        }
    }

    pub fn eval(&self, t: f64) -> Option<f64> {
        let first = self.points.first()?;
        if t <= first.t || self.points.len() == 1 {
            return Some(first.v);
        }
        let last = self.points[self.points.len() - 1];
        if t >= last.t {
            return Some(last.v);
        }
        let idx = self.points.partition_point(|p| p.t <= t);
        let a = self.points[idx - 1];
        let b = self.points[idx];
        if b.t <= a.t {
            return Some(a.v);
        }
        let frac = (t - a.t) / (b.t - a.t);
        Some(a.v + (b.v - a.v) * frac)
    }

    /// Exact value range over the window `[t0, t1]`: the endpoint values
    /// plus any interior anchors. Piecewise-linearity makes this the true
    /// min/max.
    pub fn range(&self, t0: f64, t1: f64) -> Option<(f64, f64)> {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for v in [self.eval(t0)?, self.eval(t1)?] {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        for p in &self.points {
            if p.t > t0 && p.t < t1 {
                lo = lo.min(p.v);
                hi = hi.max(p.v);
            }
        }
        Some((lo, hi))
    }
}

/// Time-varying rectangle, one curve per component.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RectCurve {
    pub x: Curve,
    pub y: Curve,
    pub width: Curve,
    pub height: Curve,
}

impl RectCurve {
    /// A rectangle that never moves.
    pub fn fixed(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x: Curve::constant(x),
            y: Curve::constant(y),
            width: Curve::constant(width),
            height: Curve::constant(height),
        }
    }

    /// Sample as a source rect (image coordinates).
    pub fn source_at(&self, t: f64) -> Option<SourceRect> {
        Some(SourceRect::new(
            self.x.eval(t)?,
            self.y.eval(t)?,
            self.width.eval(t)?,
            self.height.eval(t)?,
        ))
    }

    /// Sample as a screen rect (rounded to integer pixels).
    pub fn screen_at(&self, t: f64) -> Option<ScreenRect> {
        Some(ScreenRect::new(
            self.x.eval(t)?.round() as i32,
            self.y.eval(t)?.round() as i32,
            self.width.eval(t)?.round() as i32,
            self.height.eval(t)?.round() as i32,
        ))
    }
}

/// Which display mode a screen plan wants; `refresh_hz` unset accepts any
/// refresh rate at the given geometry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModeSpec {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub refresh_hz: Option<u32>,
}

impl ModeSpec {
    pub fn matches(&self, mode: &DisplayMode) -> bool {
        self.width == mode.width
            && self.height == mode.height
            && self.refresh_hz.is_none_or(|hz| hz == mode.refresh_hz)
    }

    /// First matching mode in driver preference order.
    pub fn pick<'a>(&self, modes: &'a [DisplayMode]) -> Option<&'a DisplayMode> {
        modes.iter().find(|m| self.matches(m))
    }
}

/// One clip on one output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerPlan {
    /// Media file path, resolved against the runner's media root.
    pub file: String,
    /// System time when the layer appears.
    pub from: f64,
    /// System time when the layer disappears.
    pub until: f64,
    /// System time → media time.
    pub play: Curve,
    /// System time → sample region in the decoded image.
    pub source: RectCurve,
    /// System time → destination region on screen.
    pub dest: RectCurve,
    /// Per-layer prefetch override in seconds ahead; the runner default
    /// applies when unset.
    #[serde(default)]
    pub buffer: Option<f64>,
}

impl LayerPlan {
    pub fn active_at(&self, t: f64) -> bool {
        t >= self.from && t < self.until
    }
}

/// Layer stack for one display output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScreenPlan {
    /// Connector name, e.g. "HDMI-1".
    pub connector: String,
    pub mode: ModeSpec,
    /// Bottom-to-top layer stack.
    pub layers: Vec<LayerPlan>,
}

/// The whole declarative plan: one entry per output.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub screens: Vec<ScreenPlan>,
}

// ── Tests ────────────────────────────────────────────────────────────
