// THEORY:
// The `BlendCompositor` folds the activity of many events into one summary video.
//
// The composite is a timeline of frame slots. Each event is laid onto the timeline
// starting at slot `cumulative_delay * fps`: the first event starts at slot 0, and
// every event after it starts `delay` seconds later than the one before, so
// overlapping clips play side by side. An event's relevant frames fill consecutive
// slots from its start slot. A slot that already holds content receives only the
// new frame's accepted regions (or the whole frame, for full-frame blending); an
// empty slot takes the whole frame, which is how the first event provides the
// backdrop.
//
// The timeline lives on disk, never in memory. Merging an event is one streaming
// pass: the committed timeline is decoded frame by frame through the
// `VideoBackend`, merged with the event's frames, and encoded into a fresh
// intermediate next to the final output. Only the frame being merged is held at
// any time. When the pass completes, the new intermediate replaces the old one;
// when it fails half way, the new intermediate is discarded and the composite is
// exactly as it was.
//
// Every merged region is stamped with `event_start_time + cumulative_delay`, a
// readability offset rather than real synchronisation.
//
// Lifecycle: INIT (nothing merged) -> ACCUMULATING (at least one event merged) ->
// FINALIZED (the last intermediate moved to the output path).

use crate::core_modules::detection::{BoundingBox, Detection};
use crate::core_modules::detector::DetectionStep;
use crate::core_modules::draw::{BOX_COLOR, draw_box, write_text};
use crate::core_modules::frame_source::{FrameDecoder, FrameSource};
use crate::core_modules::intensity_balancer::{balance_region, match_intensity};
use crate::error::{MagikError, Result};
use crate::event::{Event, EventId};
use crate::media::{EventOutput, FrameObserver, VideoBackend, output_file_name, remove_output};
use crate::report::MatchRecord;
use chrono::{NaiveDateTime, TimeDelta};
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
/// Which pixels of a new frame are merged into an occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendArea {
    /// The rectangles of the accepted detections.
    #[default]
    Boxes,
    /// Foreground pixels inside the accepted detections. Falls back to `Boxes` when
    /// the detection source has no foreground mask.
    Foreground,
    /// The entire frame.
    FullFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositePhase {
    Init,
    Accumulating,
    Finalized,
}

/// A time label stamped onto the composite.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnLabel {
    pub event_id: EventId,
    pub slot: usize,
    pub text: String,
    pub time: NaiveDateTime,
    pub region: BoundingBox,
}

#[derive(Debug, Clone)]
pub struct BlendSettings {
    /// Seconds added to the cumulative delay after each event.
    pub delay_secs: f64,
    /// Skip frames without accepted detections.
    pub relevant_only: bool,
    /// Events without a single accepted detection contribute nothing.
    pub object_only: bool,
    pub draw_boxes: bool,
    pub balance_intensity: bool,
    pub area: BlendArea,
    pub font_scale: f32,
}

impl Default for BlendSettings {
    fn default() -> Self {
        Self {
            delay_secs: 2.0,
            relevant_only: true,
            object_only: false,
            draw_boxes: false,
            balance_intensity: false,
            area: BlendArea::Boxes,
            font_scale: 1.0,
        }
    }
}

/// The run-wide composite. Exactly one exists per blend run.
#[derive(Debug)]
pub struct CompositeState {
    /// The committed timeline, once something was merged.
    timeline: Option<PathBuf>,
    len: usize,
    dims: Option<(u32, u32)>,
    fps: Option<f64>,
    cumulative_delay: f64,
    min_area: f64,
    drawn_labels: Vec<DrawnLabel>,
    phase: CompositePhase,
    events_merged: usize,
}

impl CompositeState {
    pub fn new(min_area: f64) -> Self {
        Self {
            timeline: None,
            len: 0,
            dims: None,
            fps: None,
            cumulative_delay: 0.0,
            min_area,
            drawn_labels: Vec::new(),
            phase: CompositePhase::Init,
            events_merged: 0,
        }
    }

    pub fn phase(&self) -> CompositePhase {
        self.phase
    }

    /// Path of the committed intermediate timeline.
    pub fn timeline(&self) -> Option<&Path> {
        self.timeline.as_deref()
    }

    /// Number of slots in the timeline.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Frame rate of the timeline, fixed by the first merged event.
    pub fn fps(&self) -> Option<f64> {
        self.fps
    }

    pub fn cumulative_delay(&self) -> f64 {
        self.cumulative_delay
    }

    pub fn min_area(&self) -> f64 {
        self.min_area
    }

    pub fn drawn_labels(&self) -> &[DrawnLabel] {
        &self.drawn_labels
    }

    pub fn events_merged(&self) -> usize {
        self.events_merged
    }

    /// Swaps in a completed pass and releases the timeline it replaces.
    fn commit(&mut self, pass: MergePass) {
        if let Some(old) = self.timeline.replace(pass.timeline) {
            if let Err(e) = remove_output(&old) {
                warn!(path = %old.display(), "could not remove superseded timeline: {e}");
            }
        }
        self.len = pass.len;
        self.dims = Some(pass.dims);
        self.fps.get_or_insert(pass.fps);
        self.drawn_labels.extend(pass.labels);
        self.events_merged += 1;
        self.phase = CompositePhase::Accumulating;
    }
}

/// The outcome of one successful merge pass, not yet committed.
struct MergePass {
    timeline: PathBuf,
    len: usize,
    dims: (u32, u32),
    fps: f64,
    labels: Vec<DrawnLabel>,
}

/// Reads the committed timeline back one slot at a time.
struct TimelineReader {
    decoder: Option<Box<dyn FrameDecoder>>,
    dims: Option<(u32, u32)>,
}

impl TimelineReader {
    fn open(backend: &dyn VideoBackend, state: &CompositeState) -> Result<Self> {
        let decoder = state.timeline.as_deref().map(|path| backend.open(path)).transpose()?;
        Ok(Self {
            decoder,
            dims: state.dims,
        })
    }

    fn next(&mut self) -> Result<Option<RgbImage>> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(None);
        };
        match decoder.decode_next()? {
            Some(frame) => Ok(Some(match self.dims {
                // Codecs may pad odd sizes; slots are always merged at the timeline's size.
                Some((w, h)) if frame.dimensions() != (w, h) => imageops::resize(&frame, w, h, FilterType::Triangle),
                _ => frame,
            })),
            None => {
                self.decoder = None;
                Ok(None)
            }
        }
    }
}

pub struct BlendCompositor {
    state: CompositeState,
    settings: BlendSettings,
    detection: DetectionStep,
    work_dir: PathBuf,
    passes: u64,
}

impl BlendCompositor {
    /// Intermediate timelines are written to `work_dir`.
    pub fn new(detection: DetectionStep, settings: BlendSettings, min_area: f64, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            state: CompositeState::new(min_area),
            settings,
            detection,
            work_dir: work_dir.into(),
            passes: 0,
        }
    }

    pub fn state(&self) -> &CompositeState {
        &self.state
    }

    pub fn settings(&self) -> &BlendSettings {
        &self.settings
    }

    /// Runs one event through detection and merges it into the composite.
    pub fn blend_event<D: FrameDecoder>(
        &mut self,
        event: &Event,
        source: &mut FrameSource<D>,
        backend: &dyn VideoBackend,
        observer: &mut dyn FrameObserver,
    ) -> Result<Vec<MatchRecord>> {
        if self.state.phase == CompositePhase::Finalized {
            return Err(MagikError::Configuration("composite is already finalized".into()));
        }
        self.detection.begin_event(event)?;

        let fps = source.fps();
        let timeline_fps = self.state.fps.unwrap_or(source.output_fps());
        let offset = (self.state.cumulative_delay * timeline_fps).round().max(0.0) as usize;
        let label_time =
            event.start_time + TimeDelta::milliseconds((self.state.cumulative_delay * 1000.0).round() as i64);
        let label_text = label_time.format("%H:%M:%S").to_string();
        debug!(event_id = event.id, offset, %label_time, "blending event");

        self.passes += 1;
        let staging_path = self.work_dir.join(output_file_name(
            &format!(".zm_magik-timeline-{}", self.passes),
            backend.extension(),
        ));
        let mut staged = EventOutput::new(backend, &staging_path, timeline_fps);
        let mut base = TimelineReader::open(backend, &self.state)?;
        let mut last: Option<RgbImage> = None;
        let mut written = 0usize;
        let mut merged = 0usize;
        let mut dims = self.state.dims;
        let mut labels = Vec::new();
        let mut records = Vec::new();
        let mut detected_any = false;

        while let Some(frame) = source.next_frame()? {
            let detections = self.detection.detect(event, &frame)?;
            if detections.is_empty() && self.settings.relevant_only {
                continue;
            }
            detected_any |= !detections.is_empty();

            let size = *dims.get_or_insert(frame.image.dimensions());
            let (incoming, regions, foreground) = fit(&frame.image, &detections, self.detection.foreground(), size);

            // Bring the timeline up to the event's start slot. Past the end of the
            // committed timeline the last slot is held; with nothing committed yet
            // the event's own unlabelled frame stands in.
            while written < offset {
                let filler = match base.next()? {
                    Some(slot) => slot,
                    None => last.clone().unwrap_or_else(|| incoming.clone()),
                };
                staged.write(&filler)?;
                last = Some(filler);
                written += 1;
            }

            let slot = written;
            let under = base.next()?;
            let mut composed = self.compose(incoming, &regions, foreground.as_ref(), under.as_ref());
            for (region, detection) in regions.iter().zip(&detections) {
                if self.settings.draw_boxes {
                    draw_box(&mut composed, region, BOX_COLOR, 2);
                }
                let text = match &detection.label {
                    Some(label) => format!("{label} {label_text}"),
                    None => label_text.clone(),
                };
                if let Some(area) = write_text(
                    &mut composed,
                    &text,
                    region.x as i64,
                    region.y as i64,
                    self.settings.font_scale,
                    true,
                ) {
                    labels.push(DrawnLabel {
                        event_id: event.id,
                        slot,
                        text,
                        time: label_time,
                        region: area,
                    });
                }
            }

            records.extend(detections.iter().map(|d| MatchRecord::detection(event, &frame, fps, d)));
            observer.observe(&composed)?;
            staged.write(&composed)?;
            last = Some(composed);
            written += 1;
            merged += 1;
        }

        if merged == 0 || (self.settings.object_only && !detected_any) {
            info!(event_id = event.id, "no accepted detections, event left out of the composite");
        } else {
            // Carry over the committed slots past the end of this event.
            while let Some(slot) = base.next()? {
                staged.write(&slot)?;
                written += 1;
            }
            drop(base);
            if let (Some(timeline), Some(dims)) = (staged.finish()?, dims) {
                info!(event_id = event.id, frames = merged, offset, slots = written, "merged into composite");
                self.state.commit(MergePass {
                    timeline,
                    len: written,
                    dims,
                    fps: timeline_fps,
                    labels,
                });
            }
        }
        self.state.cumulative_delay += self.settings.delay_secs;
        Ok(records)
    }

    /// Merges `incoming` into the committed slot `base`. Without a base slot the
    /// incoming frame is taken whole.
    fn compose(
        &self,
        mut incoming: RgbImage,
        regions: &[BoundingBox],
        foreground: Option<&GrayImage>,
        base: Option<&RgbImage>,
    ) -> RgbImage {
        let Some(base) = base else {
            return incoming;
        };
        let dims = incoming.dimensions();

        if self.settings.balance_intensity {
            match self.settings.area {
                BlendArea::FullFrame => incoming = match_intensity(&incoming, base),
                BlendArea::Boxes | BlendArea::Foreground => {
                    for region in regions {
                        balance_region(&mut incoming, base, region);
                    }
                }
            }
        }

        match (self.settings.area, foreground) {
            (BlendArea::FullFrame, _) => incoming,
            (BlendArea::Foreground, Some(mask)) => {
                let mut composed = base.clone();
                for region in regions {
                    for y in region.y..region.bottom().min(dims.1) {
                        for x in region.x..region.right().min(dims.0) {
                            if mask.get_pixel(x, y)[0] != 0 {
                                composed.put_pixel(x, y, *incoming.get_pixel(x, y));
                            }
                        }
                    }
                }
                composed
            }
            (BlendArea::Boxes | BlendArea::Foreground, _) => {
                let mut composed = base.clone();
                for region in regions {
                    if let Some(region) = region.clipped(dims.0, dims.1) {
                        let patch =
                            imageops::crop_imm(&incoming, region.x, region.y, region.width, region.height).to_image();
                        imageops::replace(&mut composed, &patch, region.x as i64, region.y as i64);
                    }
                }
                composed
            }
        }
    }

    /// Moves the composite to `path` and enters FINALIZED. Nothing is written
    /// while the composite is still in INIT.
    pub fn finalize(&mut self, path: &Path) -> Result<Option<PathBuf>> {
        if self.state.phase != CompositePhase::Accumulating {
            if self.state.phase == CompositePhase::Init {
                info!("no events merged, composite not written");
            }
            return Ok(None);
        }
        let Some(timeline) = self.state.timeline.clone() else {
            return Ok(None);
        };
        remove_output(path).map_err(|e| MagikError::encode(path, e))?;
        std::fs::rename(&timeline, path).map_err(|e| MagikError::encode(path, e))?;
        self.state.timeline = None;
        self.state.phase = CompositePhase::Finalized;
        info!(frames = self.state.len, events = self.state.events_merged, "composite written");
        Ok(Some(path.to_path_buf()))
    }
}

impl Drop for BlendCompositor {
    fn drop(&mut self) {
        // An unfinalized composite is scratch data.
        if let Some(timeline) = self.state.timeline.take() {
            if let Err(e) = remove_output(&timeline) {
                warn!(path = %timeline.display(), "could not remove intermediate timeline: {e}");
            }
        }
    }
}

/// Brings a frame, its boxes and its foreground mask to the composite's size.
fn fit(
    image: &RgbImage,
    detections: &[Detection],
    foreground: Option<&GrayImage>,
    (width, height): (u32, u32),
) -> (RgbImage, Vec<BoundingBox>, Option<GrayImage>) {
    let boxes: Vec<BoundingBox> = detections.iter().map(|d| d.bounding_box).collect();
    if image.dimensions() == (width, height) {
        return (image.clone(), boxes, foreground.cloned());
    }
    let sx = width as f64 / image.width() as f64;
    let sy = height as f64 / image.height() as f64;
    let boxes = boxes
        .into_iter()
        .map(|b| {
            BoundingBox::new(
                (b.x as f64 * sx) as u32,
                (b.y as f64 * sy) as u32,
                ((b.width as f64 * sx) as u32).max(1),
                ((b.height as f64 * sy) as u32).max(1),
            )
        })
        .collect();
    let resized = imageops::resize(image, width, height, FilterType::Triangle);
    let mask = foreground.map(|m| imageops::resize(m, width, height, FilterType::Nearest));
    (resized, boxes, mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::background_model::BackgroundParams;
    use crate::core_modules::detection::DetectionFilter;
    use crate::core_modules::frame_source::MemoryDecoder;
    use crate::image_sequence::ImageSequenceBackend;
    use crate::media::NullObserver;
    use chrono::NaiveDate;
    use image::Rgb;
    use tempfile::TempDir;

    const BACKGROUND: Rgb<u8> = Rgb([30, 30, 30]);
    const SQUARE: Rgb<u8> = Rgb([230, 230, 230]);

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 6, 1).unwrap().and_hms_opt(9, 58, 0).unwrap()
    }

    fn clip(frames: usize, square: Option<(u32, u32)>) -> Vec<RgbImage> {
        (0..frames)
            .map(|i| {
                let mut image = RgbImage::from_pixel(160, 120, BACKGROUND);
                if let (Some((x, y)), true) = (square, i > 0) {
                    let x = x + 2 * i as u32;
                    for yy in y..y + 50 {
                        for xx in x..x + 50 {
                            image.put_pixel(xx, yy, SQUARE);
                        }
                    }
                }
                image
            })
            .collect()
    }

    struct Fixture {
        dir: TempDir,
        backend: ImageSequenceBackend,
        compositor: BlendCompositor,
    }

    fn fixture(settings: BlendSettings) -> Fixture {
        let params = BackgroundParams {
            blur_sigma: 0.0,
            dilate_radius: 0,
            ..BackgroundParams::default()
        };
        let filter = DetectionFilter {
            min_area: Some(1500.0),
            ..DetectionFilter::accept_all()
        };
        let dir = tempfile::tempdir().unwrap();
        let compositor = BlendCompositor::new(DetectionStep::motion(params, filter), settings, 1500.0, dir.path());
        Fixture {
            dir,
            backend: ImageSequenceBackend::new(10.0),
            compositor,
        }
    }

    impl Fixture {
        fn run(&mut self, event: &Event, frames: Vec<RgbImage>) -> Vec<MatchRecord> {
            let mut source = FrameSource::new(MemoryDecoder::new(frames, 10.0), 1, None);
            self.compositor
                .blend_event(event, &mut source, &self.backend, &mut NullObserver)
                .unwrap()
        }

        fn slots(&self) -> Vec<RgbImage> {
            let Some(path) = self.compositor.state().timeline() else {
                return Vec::new();
            };
            let mut decoder = self.backend.open(path).unwrap();
            std::iter::from_fn(|| decoder.decode_next().unwrap()).collect()
        }

        fn work_entries(&self) -> usize {
            std::fs::read_dir(self.dir.path()).unwrap().count()
        }
    }

    #[test]
    fn starts_in_init() {
        let f = fixture(BlendSettings::default());
        assert_eq!(f.compositor.state().phase(), CompositePhase::Init);
        assert!(f.compositor.state().timeline().is_none());
        assert!(f.compositor.state().is_empty());
    }

    #[test]
    fn first_event_provides_backdrop_and_labels() {
        let mut f = fixture(BlendSettings::default());
        let event = Event::new(1, 1, start(), "a");
        let records = f.run(&event, clip(6, Some((10, 10))));
        assert_eq!(records.len(), 5);
        assert_eq!(f.compositor.state().phase(), CompositePhase::Accumulating);
        assert_eq!(f.compositor.state().len(), 5);
        assert_eq!(f.slots().len(), 5);
        assert_eq!(f.compositor.state().drawn_labels()[0].text, "09:58:00");
        assert_eq!(f.compositor.state().cumulative_delay(), 2.0);
    }

    #[test]
    fn object_only_skips_empty_event_but_advances_delay() {
        let mut f = fixture(BlendSettings {
            object_only: true,
            relevant_only: false,
            ..BlendSettings::default()
        });
        f.run(&Event::new(1, 1, start(), "a"), clip(5, None));
        assert_eq!(f.compositor.state().phase(), CompositePhase::Init);
        assert!(f.compositor.state().is_empty());
        assert_eq!(f.compositor.state().cumulative_delay(), 2.0);
        // The discarded pass leaves nothing behind.
        assert_eq!(f.work_entries(), 0);
    }

    #[test]
    fn later_event_lands_at_delay_offset_and_keeps_earlier_content() {
        let mut f = fixture(BlendSettings {
            delay_secs: 0.2,
            ..BlendSettings::default()
        });
        f.run(&Event::new(1, 1, start(), "a"), clip(8, Some((0, 0))));
        f.run(&Event::new(2, 1, start(), "b"), clip(4, Some((80, 60))));

        // 0.2 s at 10 fps: the second event starts at slot 2.
        let slots = f.slots();
        assert_eq!(slots.len(), 7);
        assert_eq!(f.compositor.state().len(), 7);
        let slot = &slots[2];
        // Second event's first detected square, first event's fourth.
        assert_eq!(slot.get_pixel(100, 100), &SQUARE);
        assert_eq!(slot.get_pixel(30, 40), &SQUARE);
        let second = f.compositor.state().drawn_labels().iter().find(|l| l.event_id == 2).unwrap();
        assert_eq!(second.slot, 2);
        assert_eq!(second.time - start(), TimeDelta::milliseconds(200));
    }

    #[test]
    fn merging_streams_through_a_single_intermediate() {
        let mut f = fixture(BlendSettings {
            delay_secs: 0.3,
            ..BlendSettings::default()
        });
        let squares = [(0, 0), (90, 0), (0, 60), (90, 60)];
        for (n, square) in squares.into_iter().enumerate() {
            f.run(&Event::new(n as u64 + 1, 1, start(), "clip"), clip(6, Some(square)));
            // Only the committed timeline is on disk, the previous one is gone.
            assert_eq!(f.work_entries(), 1);
            assert_eq!(f.compositor.state().events_merged(), n + 1);
        }

        // Five frames each at offsets 0, 3, 6 and 9.
        assert_eq!(f.compositor.state().len(), 14);
        let slots = f.slots();
        assert_eq!(slots.len(), 14);
        // Slot 3 holds the first event's fourth frame and the second event's first.
        assert_eq!(slots[3].get_pixel(20, 45), &SQUARE);
        assert_eq!(slots[3].get_pixel(115, 45), &SQUARE);
        // Slot 12 lies past every earlier event and takes the last event whole.
        assert_eq!(slots[12].get_pixel(115, 85), &SQUARE);
        assert_eq!(slots[12].get_pixel(20, 45), &BACKGROUND);

        let timeline = f.compositor.state().timeline().unwrap().to_path_buf();
        let out = f.dir.path().join("blended");
        assert_eq!(f.compositor.finalize(&out).unwrap(), Some(out.clone()));
        assert_eq!(f.compositor.state().phase(), CompositePhase::Finalized);
        assert!(!timeline.exists());
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 14);
        assert_eq!(f.work_entries(), 1);
    }

    #[test]
    fn failed_pass_keeps_committed_timeline() {
        struct Broken(MemoryDecoder);
        impl FrameDecoder for Broken {
            fn fps(&self) -> f64 {
                self.0.fps()
            }
            fn decode_next(&mut self) -> Result<Option<RgbImage>> {
                match self.0.decode_next()? {
                    Some(frame) => Ok(Some(frame)),
                    None => Err(MagikError::Decode {
                        frame: 4,
                        reason: "truncated".into(),
                    }),
                }
            }
        }

        let mut f = fixture(BlendSettings::default());
        f.run(&Event::new(1, 1, start(), "a"), clip(5, Some((10, 10))));
        let committed = f.compositor.state().timeline().unwrap().to_path_buf();

        let mut source = FrameSource::new(Broken(MemoryDecoder::new(clip(4, Some((80, 60))), 10.0)), 1, None);
        let err = f
            .compositor
            .blend_event(&Event::new(2, 1, start(), "b"), &mut source, &f.backend, &mut NullObserver)
            .unwrap_err();
        assert!(matches!(err, MagikError::Decode { .. }));
        assert_eq!(f.compositor.state().timeline(), Some(committed.as_path()));
        assert_eq!(f.compositor.state().events_merged(), 1);
        assert_eq!(f.slots().len(), 4);
        assert_eq!(f.work_entries(), 1);
    }

    #[test]
    fn gap_before_first_merge_uses_unlabelled_frame() {
        let mut f = fixture(BlendSettings {
            delay_secs: 0.3,
            object_only: true,
            ..BlendSettings::default()
        });
        f.run(&Event::new(1, 1, start(), "a"), clip(5, None));
        f.run(&Event::new(2, 1, start(), "b"), clip(5, Some((10, 60))));

        let slots = f.slots();
        assert_eq!(slots.len(), 7);
        let label = f.compositor.state().drawn_labels()[0].region;
        assert_eq!(f.compositor.state().drawn_labels()[0].slot, 3);
        assert_eq!(slots[3].get_pixel(label.x, label.y), &crate::core_modules::draw::LABEL_BACKGROUND);
        for gap in &slots[..3] {
            assert_eq!(gap.get_pixel(label.x, label.y), &BACKGROUND);
            assert_eq!(gap.get_pixel(30, 80), &SQUARE);
        }
    }

    #[test]
    fn finalize_in_init_writes_nothing() {
        let mut f = fixture(BlendSettings::default());
        let path = f.dir.path().join("blended");
        assert_eq!(f.compositor.finalize(&path).unwrap(), None);
        assert!(!path.exists());
        assert_eq!(f.compositor.state().phase(), CompositePhase::Init);
    }

    #[test]
    fn dropping_unfinalized_compositor_removes_timeline() {
        let mut f = fixture(BlendSettings::default());
        f.run(&Event::new(1, 1, start(), "a"), clip(3, Some((10, 10))));
        let timeline = f.compositor.state().timeline().unwrap().to_path_buf();
        assert!(timeline.exists());
        let Fixture { dir, compositor, .. } = f;
        drop(compositor);
        assert!(!timeline.exists());
        drop(dir);
    }

    #[test]
    fn fitting_rescales_boxes() {
        let image = RgbImage::new(320, 240);
        let detections = vec![Detection::motion(BoundingBox::new(40, 20, 100, 60), 6000.0)];
        let (resized, boxes, _) = fit(&image, &detections, None, (160, 120));
        assert_eq!(resized.dimensions(), (160, 120));
        assert_eq!(boxes[0], BoundingBox::new(20, 10, 50, 30));
    }
}
