// THEORY:
// The `Orchestrator` is the run loop. It receives the retrieved events, puts them
// into their processing order, and drives each one through the run's single
// engine, strictly one event at a time:
//
//     materialize clip -> open decoder -> engine -> release decoder -> remove clip
//
// Error boundary: anything that goes wrong inside an event (the clip cannot be
// fetched or opened, a frame fails to decode, an output cannot be written) fails
// that event only. It is logged, recorded in the report, its temporary clip and
// partial output are removed by their guards, and the loop moves on. Errors
// classified as fatal end the run immediately.
//
// The blend composite and the report are the only state that outlives an event,
// and both are owned here and threaded through explicitly. The report is written
// even when finalizing the composite fails, so per-event outcomes are never lost.

use crate::config::Mode;
use crate::core_modules::annotation_overlay::AnnotationOverlay;
use crate::core_modules::blend_compositor::BlendCompositor;
use crate::core_modules::frame_source::FrameSource;
use crate::core_modules::template_search::TemplateSearch;
use crate::error::Result;
use crate::event::{Event, OrderKey, Ordering, schedule};
use crate::media::{ClipProvider, EventOutput, FrameObserver, VideoBackend, output_file_name};
use crate::report::{EventOutcome, MatchRecord, RunReport};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// The run's engine, chosen once at startup.
pub enum Engine {
    Search(TemplateSearch),
    Blend(BlendCompositor),
    Annotate(AnnotationOverlay),
}

impl Engine {
    pub fn mode(&self) -> Mode {
        match self {
            Engine::Search(_) => Mode::Search,
            Engine::Blend(_) => Mode::Blend,
            Engine::Annotate(_) => Mode::Annotate,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub stride: u32,
    pub resize: Option<f64>,
    /// Seconds read from each clip; `None` reads it whole.
    pub duration: Option<f64>,
    /// Log a progress line every this many frames.
    pub progress_every: Option<u64>,
    pub ordering: Ordering,
    pub order_key: OrderKey,
    pub output_dir: PathBuf,
    pub blend_output: String,
    pub dump_json: bool,
}

/// A validated run: settings plus the one engine.
pub struct RunPlan {
    pub settings: RunSettings,
    pub engine: Engine,
}

#[derive(Debug)]
pub struct RunSummary {
    pub report: RunReport,
    pub report_path: Option<PathBuf>,
    pub elapsed: Duration,
}

pub struct Orchestrator<'a> {
    settings: RunSettings,
    engine: Engine,
    backend: &'a dyn VideoBackend,
    clips: &'a mut dyn ClipProvider,
    observer: &'a mut dyn FrameObserver,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        plan: RunPlan,
        backend: &'a dyn VideoBackend,
        clips: &'a mut dyn ClipProvider,
        observer: &'a mut dyn FrameObserver,
    ) -> Self {
        Self {
            settings: plan.settings,
            engine: plan.engine,
            backend,
            clips,
            observer,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn run(&mut self, events: Vec<Event>) -> Result<RunSummary> {
        let started = Instant::now();
        let events = schedule(events, self.settings.ordering, self.settings.order_key);
        let total = events.len();
        let mut report = RunReport::new(self.engine.mode());
        info!(mode = ?report.mode, events = total, ordering = ?self.settings.ordering, "starting run");

        for (n, event) in events.iter().enumerate() {
            info!(
                event_id = event.id,
                monitor_id = event.monitor_id,
                "processing event {} of {}",
                n + 1,
                total
            );
            match self.process_event(event) {
                Ok((records, output)) => {
                    if let Some(path) = &output {
                        info!(event_id = event.id, path = %path.display(), "output written");
                    }
                    report.record(EventOutcome::processed(event, records, output));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(event_id = event.id, monitor_id = event.monitor_id, "event failed: {e}");
                    report.record(EventOutcome::failed(event, &e));
                }
            }
        }

        if total > 0 && report.events_failed == total {
            warn!("every event failed");
        }

        let finalized = match &mut self.engine {
            Engine::Blend(compositor) => {
                let name = output_file_name(&self.settings.blend_output, self.backend.extension());
                compositor.finalize(&self.settings.output_dir.join(name))
            }
            _ => Ok(None),
        };
        match &finalized {
            Ok(composite) => report.composite = composite.clone(),
            Err(e) => error!("composite could not be written: {e}"),
        }

        let report_path = if self.settings.dump_json {
            let path = report.write_json(&self.settings.output_dir, chrono::Local::now().naive_local())?;
            info!(path = %path.display(), "report written");
            Some(path)
        } else {
            None
        };

        finalized?;

        let elapsed = started.elapsed();
        info!(
            considered = report.events_considered,
            failed = report.events_failed,
            elapsed_secs = elapsed.as_secs_f64(),
            "run complete"
        );
        Ok(RunSummary {
            report,
            report_path,
            elapsed,
        })
    }

    fn process_event(&mut self, event: &Event) -> Result<(Vec<MatchRecord>, Option<PathBuf>)> {
        // Dropped on every exit path, which removes a downloaded clip.
        let clip = self.clips.materialize(event)?;
        let decoder = self.backend.open(clip.path())?;
        let mut source = FrameSource::new(decoder, self.settings.stride, self.settings.resize)
            .with_duration(self.settings.duration)
            .with_progress(self.settings.progress_every);
        let fps = source.output_fps();
        let output_path = self
            .settings
            .output_dir
            .join(event.output_name(self.backend.extension()));

        let result = match &mut self.engine {
            Engine::Search(search) => {
                let mut output = EventOutput::new(self.backend, output_path, fps);
                let records = search.search_event(event, &mut source, &mut output, &mut *self.observer)?;
                (records, output.finish()?)
            }
            Engine::Blend(compositor) => (
                compositor.blend_event(event, &mut source, self.backend, &mut *self.observer)?,
                None,
            ),
            Engine::Annotate(overlay) => {
                let mut output = EventOutput::new(self.backend, output_path, fps);
                let records = overlay.annotate_event(event, &mut source, &mut output, &mut *self.observer)?;
                (records, output.finish()?)
            }
        };
        source.close();
        drop(clip);
        Ok(result)
    }
}
