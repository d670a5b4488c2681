// THEORY:
// The `AnnotationOverlay` is the stateless cousin of the Blend Compositor. Every
// event is handled on its own: frames go through the shared detection step, the
// accepted detections are boxed and labelled on the frame itself, and the result
// is written to one output video per event. Nothing is carried from one event to
// the next except the detector's configuration.

use crate::core_modules::detector::DetectionStep;
use crate::core_modules::draw::{BOX_COLOR, draw_box, write_text};
use crate::core_modules::frame_source::{FrameDecoder, FrameSource};
use crate::error::Result;
use crate::event::Event;
use crate::media::{EventOutput, FrameObserver};
use crate::report::{MatchRecord, frame_timestamp};
use tracing::info;

#[derive(Debug, Clone)]
pub struct OverlaySettings {
    /// Only frames with accepted detections are written.
    pub relevant_only: bool,
    pub font_scale: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            relevant_only: true,
            font_scale: 1.0,
        }
    }
}

pub struct AnnotationOverlay {
    detection: DetectionStep,
    settings: OverlaySettings,
}

impl AnnotationOverlay {
    pub fn new(detection: DetectionStep, settings: OverlaySettings) -> Self {
        Self { detection, settings }
    }

    pub fn annotate_event<D: FrameDecoder>(
        &mut self,
        event: &Event,
        source: &mut FrameSource<D>,
        output: &mut EventOutput<'_>,
        observer: &mut dyn FrameObserver,
    ) -> Result<Vec<MatchRecord>> {
        self.detection.begin_event(event)?;
        let fps = source.fps();
        let mut records = Vec::new();

        while let Some(frame) = source.next_frame()? {
            let detections = self.detection.detect(event, &frame)?;
            if detections.is_empty() && self.settings.relevant_only {
                continue;
            }

            let stamp = frame_timestamp(event, &frame, fps).format("%H:%M:%S").to_string();
            let mut annotated = frame.image.clone();
            for detection in &detections {
                draw_box(&mut annotated, &detection.bounding_box, BOX_COLOR, 2);
                let text = match (&detection.label, detection.confidence) {
                    (Some(label), Some(confidence)) => format!("{label} {:.0}%", confidence * 100.0),
                    (Some(label), None) => label.clone(),
                    _ => stamp.clone(),
                };
                write_text(
                    &mut annotated,
                    &text,
                    detection.bounding_box.x as i64,
                    detection.bounding_box.y as i64,
                    self.settings.font_scale,
                    true,
                );
                records.push(MatchRecord::detection(event, &frame, fps, detection));
            }

            observer.observe(&annotated)?;
            output.write(&annotated)?;
        }

        info!(
            event_id = event.id,
            frames = output.frames_written(),
            detections = records.len(),
            "annotated"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detection::DetectionFilter;
    use crate::core_modules::detector::{PrecomputedDetector, PrecomputedEntry};
    use crate::core_modules::detection::BoundingBox;
    use crate::core_modules::frame_source::MemoryDecoder;
    use crate::image_sequence::ImageSequenceBackend;
    use crate::media::NullObserver;
    use chrono::NaiveDateTime;
    use image::{Rgb, RgbImage};

    fn overlay(relevant_only: bool) -> AnnotationOverlay {
        let entries = vec![PrecomputedEntry {
            event_id: 4,
            frame_index: 2,
            label: "person".into(),
            confidence: 0.8,
            bounding_box: BoundingBox::new(20, 30, 40, 40),
        }];
        let step = DetectionStep::model(
            Box::new(PrecomputedDetector::new(entries, None)),
            DetectionFilter::accept_all(),
        );
        AnnotationOverlay::new(
            step,
            OverlaySettings {
                relevant_only,
                font_scale: 1.0,
            },
        )
    }

    fn source() -> FrameSource<MemoryDecoder> {
        let frames = (0..5).map(|_| RgbImage::from_pixel(100, 100, Rgb([50, 50, 50]))).collect();
        FrameSource::new(MemoryDecoder::new(frames, 5.0), 1, None)
    }

    #[test]
    fn writes_only_relevant_frames() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ImageSequenceBackend::new(5.0);
        let event = Event::new(4, 1, NaiveDateTime::default(), "clip");
        let mut output = EventOutput::new(&backend, dir.path().join("out"), 5.0);

        let records = overlay(true)
            .annotate_event(&event, &mut source(), &mut output, &mut NullObserver)
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].frame_index, 2);
        assert_eq!(output.frames_written(), 1);
    }

    #[test]
    fn annotated_frame_carries_box() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ImageSequenceBackend::new(5.0);
        let event = Event::new(4, 1, NaiveDateTime::default(), "clip");
        let path = dir.path().join("out");
        let mut output = EventOutput::new(&backend, &path, 5.0);
        overlay(false)
            .annotate_event(&event, &mut source(), &mut output, &mut NullObserver)
            .unwrap();
        assert_eq!(output.frames_written(), 5);
        output.finish().unwrap();

        let third = image::open(path.join("frame_000002.png")).unwrap().to_rgb8();
        assert_eq!(third.get_pixel(20, 69), &BOX_COLOR);
        let first = image::open(path.join("frame_000000.png")).unwrap().to_rgb8();
        assert_eq!(first.get_pixel(20, 69), &Rgb([50, 50, 50]));
    }

    #[test]
    fn event_without_detections_creates_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ImageSequenceBackend::new(5.0);
        let event = Event::new(99, 1, NaiveDateTime::default(), "clip");
        let path = dir.path().join("out");
        let mut output = EventOutput::new(&backend, &path, 5.0);
        overlay(true)
            .annotate_event(&event, &mut source(), &mut output, &mut NullObserver)
            .unwrap();
        assert_eq!(output.finish().unwrap(), None);
        assert!(!path.exists());
    }
}
