// THEORY:
// The `BackgroundModel` is the temporal half of motion extraction. It keeps a
// running estimate of what the static scene looks like and reports, for every new
// frame, which pixels differ from that estimate.
//
// Key principles:
// 1.  **Adaptive memory**: the background is an exponential moving average of
//     (lightly blurred) grayscale frames. The learning rate is a tunable: low rates
//     remember the scene for longer, high rates absorb slow lighting changes faster.
// 2.  **Seeding**: the first frame of an event becomes the background outright and
//     produces an empty foreground mask.
// 3.  **Per-event lifetime**: a model belongs to exactly one event. `reset` is
//     called at the start of every event, so no scene knowledge leaks between
//     clips (or cameras).
//
// The `MotionExtractor` combines the model with the spatial `blob_detector` and
// turns every blob into a `Detection` with its bounding box and pixel area.

use crate::core_modules::blob_detector::blob_detector;
use crate::core_modules::detection::Detection;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundParams {
    /// Weight of the newest frame in the running average, in (0, 1].
    pub learning_rate: f32,
    /// Minimum absolute intensity difference for a pixel to be foreground.
    pub diff_threshold: u8,
    /// Gaussian blur applied before comparison; 0 disables it.
    pub blur_sigma: f32,
    /// Dilation radius used to close small gaps inside moving objects; 0 disables it.
    pub dilate_radius: u8,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            diff_threshold: 25,
            blur_sigma: 1.0,
            dilate_radius: 2,
        }
    }
}

pub struct BackgroundModel {
    params: BackgroundParams,
    background: Option<Vec<f32>>,
    dimensions: (u32, u32),
    frames_seen: u64,
}

impl BackgroundModel {
    pub fn new(params: BackgroundParams) -> Self {
        Self {
            params,
            background: None,
            dimensions: (0, 0),
            frames_seen: 0,
        }
    }

    pub fn reset(&mut self) {
        self.background = None;
        self.dimensions = (0, 0);
        self.frames_seen = 0;
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Computes the foreground mask of `frame` against the current background, then
    /// folds `frame` into the background.
    pub fn apply(&mut self, frame: &GrayImage) -> GrayImage {
        let smoothed = if self.params.blur_sigma > 0.0 {
            gaussian_blur_f32(frame, self.params.blur_sigma)
        } else {
            frame.clone()
        };
        let (width, height) = smoothed.dimensions();
        self.frames_seen += 1;

        let background = match &mut self.background {
            Some(bg) if self.dimensions == (width, height) => bg,
            _ => {
                // First frame of the event (or the stream changed size): seed.
                self.background = Some(smoothed.pixels().map(|p| p[0] as f32).collect());
                self.dimensions = (width, height);
                return GrayImage::new(width, height);
            }
        };

        let threshold = self.params.diff_threshold as f32;
        let rate = self.params.learning_rate.clamp(0.0, 1.0);
        let mut mask = GrayImage::new(width, height);
        for ((bg, pixel), out) in background.iter_mut().zip(smoothed.pixels()).zip(mask.pixels_mut()) {
            let value = pixel[0] as f32;
            if (value - *bg).abs() > threshold {
                *out = Luma([255]);
            }
            *bg += rate * (value - *bg);
        }

        if self.params.dilate_radius > 0 {
            dilate(&mask, Norm::LInf, self.params.dilate_radius)
        } else {
            mask
        }
    }
}

/// Background subtraction followed by blob extraction.
pub struct MotionExtractor {
    model: BackgroundModel,
    last_foreground: Option<GrayImage>,
}

impl MotionExtractor {
    pub fn new(params: BackgroundParams) -> Self {
        Self {
            model: BackgroundModel::new(params),
            last_foreground: None,
        }
    }

    /// Forgets the previous event's scene.
    pub fn begin_event(&mut self) {
        self.model.reset();
        self.last_foreground = None;
    }

    /// Every blob in the frame as an unfiltered detection.
    pub fn detect(&mut self, frame: &GrayImage) -> Vec<Detection> {
        let mask = self.model.apply(frame);
        let detections = blob_detector::find_blobs(&mask)
            .into_iter()
            .map(|blob| Detection::motion(blob.bounding_box, blob.area as f64))
            .collect();
        self.last_foreground = Some(mask);
        detections
    }

    /// The foreground mask computed for the most recent frame.
    pub fn foreground(&self) -> Option<&GrayImage> {
        self.last_foreground.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detection::BoundingBox;

    fn crisp() -> BackgroundParams {
        BackgroundParams {
            learning_rate: 0.05,
            diff_threshold: 25,
            blur_sigma: 0.0,
            dilate_radius: 0,
        }
    }

    fn scene(square_at: Option<(u32, u32)>) -> GrayImage {
        GrayImage::from_fn(200, 150, |x, y| match square_at {
            Some((sx, sy)) if x >= sx && x < sx + 50 && y >= sy && y < sy + 50 => Luma([220]),
            _ => Luma([20]),
        })
    }

    #[test]
    fn first_frame_seeds_without_foreground() {
        let mut model = BackgroundModel::new(crisp());
        let mask = model.apply(&scene(Some((10, 10))));
        assert!(mask.pixels().all(|p| p[0] == 0));
        assert_eq!(model.frames_seen(), 1);
    }

    #[test]
    fn new_object_becomes_foreground() {
        let mut extractor = MotionExtractor::new(crisp());
        extractor.detect(&scene(None));
        let detections = extractor.detect(&scene(Some((100, 60))));
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bounding_box, BoundingBox::new(100, 60, 50, 50));
        assert_eq!(detections[0].area, 2500.0);
        assert!(extractor.foreground().is_some());
    }

    #[test]
    fn static_object_is_absorbed_over_time() {
        let mut model = BackgroundModel::new(BackgroundParams {
            learning_rate: 0.5,
            ..crisp()
        });
        model.apply(&scene(None));
        let with_square = scene(Some((20, 20)));
        let mut foreground = usize::MAX;
        for _ in 0..10 {
            let mask = model.apply(&with_square);
            foreground = mask.pixels().filter(|p| p[0] != 0).count();
        }
        assert_eq!(foreground, 0);
    }

    #[test]
    fn reset_forgets_the_scene() {
        let mut extractor = MotionExtractor::new(crisp());
        extractor.detect(&scene(None));
        extractor.begin_event();
        // After a reset the changed scene is a fresh seed, not motion.
        assert!(extractor.detect(&scene(Some((0, 0)))).is_empty());
    }

    #[test]
    fn dilation_merges_nearby_fragments() {
        let mut params = crisp();
        params.dilate_radius = 3;
        let mut model = BackgroundModel::new(params);
        model.apply(&GrayImage::from_pixel(60, 60, Luma([0])));
        let mut frame = GrayImage::from_pixel(60, 60, Luma([0]));
        for y in 10..20 {
            for x in 10..20 {
                frame.put_pixel(x, y, Luma([200]));
            }
            for x in 23..33 {
                frame.put_pixel(x, y, Luma([200]));
            }
        }
        let mask = model.apply(&frame);
        assert_eq!(blob_detector::find_blobs(&mask).len(), 1);
    }
}
