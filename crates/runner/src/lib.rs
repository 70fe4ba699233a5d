//! `sl-runner` — Declarative script execution for the Scanline playout
//! engine.
//!
//! A [`Script`] describes which clips map to which outputs, at which
//! times, with which geometry. The [`ScriptRunner`] translates it into
//! work for the other subsystems each tick: per-file frame-loader
//! requests over a prefetch horizon, and per-output player schedules
//! sampled at vsync granularity. Script updates are cheap and may arrive
//! many times per second; loaders survive brief edits through a grace
//! period so frames in flight are not lost.

pub mod runner;
pub mod script;

pub use runner::{LoaderFactory, PlayerFactory, RunnerContext, ScriptRunner};
pub use script::{Curve, CurvePoint, LayerPlan, ModeSpec, RectCurve, ScreenPlan, Script};
