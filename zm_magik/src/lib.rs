// THEORY:
// This file is the main entry point for the `zm_magik` library crate, the core of
// the `zmmagik` tool. It analyses recorded surveillance events in one of three
// mutually exclusive ways: searching clips for a reference image, blending the
// motion of many clips into one summary video, or annotating every clip on its own.
//
// The public surface is small: build a `MagikConfig`, `validate()` it into a
// `RunPlan`, and hand the plan, a `VideoBackend` and a `ClipProvider` to the
// `Orchestrator` together with the events to process. Everything codec- or
// network-specific lives behind those traits, so the crate itself is pure Rust and
// fully testable on synthetic frames.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod event;
pub mod image_sequence;
pub mod media;
pub mod orchestrator;
pub mod report;

pub use config::{EventQuery, EventSource, MagikConfig, Mode};
pub use error::{MagikError, Result};
pub use event::{Event, EventId, MonitorId};
pub use media::{ClipProvider, FrameObserver, LocalClipProvider, MaterializedClip, VideoBackend};
pub use orchestrator::{Orchestrator, RunPlan, RunSummary};
pub use report::RunReport;
