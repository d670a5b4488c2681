// THEORY:
// The detection step is shared by the Blend Compositor and the Annotation
// Overlay. It hides which of the two mutually exclusive detection sources is in use:
//
// - **Motion**: the per-event `MotionExtractor` (background subtraction + blobs).
// - **Model**: an `ObjectDetector` that attaches labels and confidences. The
//   library ships `PrecomputedDetector`, which replays the output of a pre-trained
//   detector that was run ahead of time and saved as JSON.
//
// Either way the raw detections go through the same `DetectionFilter`, so the
// consuming engine only ever sees accepted detections.

use crate::core_modules::background_model::{BackgroundParams, MotionExtractor};
use crate::core_modules::detection::{BoundingBox, Detection, DetectionFilter};
use crate::core_modules::frame_source::Frame;
use crate::error::{MagikError, Result};
use crate::event::{Event, EventId};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    #[default]
    BackgroundExtraction,
    ObjectModel,
}

/// A labelled-object detector backed by a pre-trained model.
pub trait ObjectDetector {
    /// Called once before the first frame of every event.
    fn begin_event(&mut self, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn detect(&mut self, event: &Event, frame: &Frame) -> Result<Vec<Detection>>;
}

/// One line of a detector's saved output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecomputedEntry {
    pub event_id: EventId,
    pub frame_index: u64,
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
}

/// Replays detections saved by an external model, keyed by event and original
/// frame index. Boxes are in original video coordinates and are scaled by the run's
/// resize factor.
#[derive(Debug, Default)]
pub struct PrecomputedDetector {
    by_frame: HashMap<(EventId, u64), Vec<Detection>>,
}

impl PrecomputedDetector {
    pub fn new(entries: Vec<PrecomputedEntry>, resize: Option<f64>) -> Self {
        let mut by_frame: HashMap<(EventId, u64), Vec<Detection>> = HashMap::new();
        for entry in entries {
            let bounding_box = match resize {
                Some(factor) => entry.bounding_box.scaled(factor),
                None => entry.bounding_box,
            };
            by_frame
                .entry((entry.event_id, entry.frame_index))
                .or_default()
                .push(Detection::labelled(bounding_box, entry.label, entry.confidence));
        }
        Self { by_frame }
    }

    pub fn load(path: &Path, resize: Option<f64>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MagikError::DetectionInput(format!("cannot read detections {}: {e}", path.display())))?;
        let entries: Vec<PrecomputedEntry> = serde_json::from_str(&raw)
            .map_err(|e| MagikError::DetectionInput(format!("malformed detections {}: {e}", path.display())))?;
        Ok(Self::new(entries, resize))
    }
}

impl ObjectDetector for PrecomputedDetector {
    fn detect(&mut self, event: &Event, frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.by_frame.get(&(event.id, frame.index)).cloned().unwrap_or_default())
    }
}

pub enum DetectionSource {
    Motion(MotionExtractor),
    Model(Box<dyn ObjectDetector>),
}

/// Detection source plus acceptance filter.
pub struct DetectionStep {
    source: DetectionSource,
    filter: DetectionFilter,
}

impl DetectionStep {
    pub fn motion(params: BackgroundParams, filter: DetectionFilter) -> Self {
        Self {
            source: DetectionSource::Motion(MotionExtractor::new(params)),
            filter,
        }
    }

    pub fn model(detector: Box<dyn ObjectDetector>, filter: DetectionFilter) -> Self {
        Self {
            source: DetectionSource::Model(detector),
            filter,
        }
    }

    pub fn filter(&self) -> &DetectionFilter {
        &self.filter
    }

    /// Resets all per-event state. Must be called before the first frame of each event.
    pub fn begin_event(&mut self, event: &Event) -> Result<()> {
        match &mut self.source {
            DetectionSource::Motion(extractor) => {
                extractor.begin_event();
                Ok(())
            }
            DetectionSource::Model(detector) => detector.begin_event(event),
        }
    }

    /// Accepted detections for one frame.
    pub fn detect(&mut self, event: &Event, frame: &Frame) -> Result<Vec<Detection>> {
        let raw = match &mut self.source {
            DetectionSource::Motion(extractor) => extractor.detect(&frame.gray()),
            DetectionSource::Model(detector) => detector.detect(event, frame)?,
        };
        let found = raw.len();
        let accepted = self.filter.apply(raw);
        if found > 0 {
            debug!(event_id = event.id, frame = frame.index, found, accepted = accepted.len(), "detections");
        }
        Ok(accepted)
    }

    /// Foreground mask of the last frame, for motion sources.
    pub fn foreground(&self) -> Option<&GrayImage> {
        match &self.source {
            DetectionSource::Motion(extractor) => extractor.foreground(),
            DetectionSource::Model(_) => None,
        }
    }
}
