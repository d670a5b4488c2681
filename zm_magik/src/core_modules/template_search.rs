// THEORY:
// The `TemplateSearch` engine answers "in which frames of this clip does the
// reference image appear?" (or, inverted, "where is it missing?").
//
// Algorithm: zero-mean normalized cross-correlation. For every placement of the
// template inside the grayscale frame we compute
//
//     score = Σ (T - mean T)(I - mean I) / sqrt(Σ (T - mean T)² · Σ (I - mean I)²)
//
// over the window, which lies in [-1, 1] and is insensitive to uniform brightness
// and contrast changes. The best placement is the match candidate; the verdict is a
// plain inclusive threshold test on its score.
//
// Rows of the correlation surface are independent, so they are scored in parallel;
// the reduction picks the first best placement in row-major order so results are
// deterministic.

use crate::core_modules::detection::BoundingBox;
use crate::core_modules::draw::{MATCH_COLOR, draw_box};
use crate::core_modules::frame_source::{Frame, FrameDecoder, FrameSource};
use crate::error::{MagikError, Result};
use crate::event::Event;
use crate::media::{EventOutput, FrameObserver};
use crate::report::MatchRecord;
use image::GrayImage;
use rayon::prelude::*;
use tracing::{debug, info};

/// A correlation threshold in (0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchThreshold(f32);

impl MatchThreshold {
    pub fn new(value: f32) -> Result<Self> {
        if value > 0.0 && value <= 1.0 {
            Ok(Self(value))
        } else {
            Err(MagikError::Configuration(format!("threshold {value} is not in (0, 1]")))
        }
    }

    pub fn value(&self) -> f32 {
        self.0
    }

    /// Inclusive: a score exactly at the threshold is a match.
    pub fn is_match(&self, score: f32) -> bool {
        score >= self.0
    }
}

/// The best placement of the template in a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemplateMatch {
    pub score: f32,
    pub location: BoundingBox,
}

#[derive(Debug, Clone)]
pub struct SearchPolicy {
    pub threshold: MatchThreshold,
    /// Report frames that contain the template; `false` reports frames without it.
    pub present: bool,
    /// Keep scanning after the first qualifying frame.
    pub process_all: bool,
    /// Frames written after each qualifying frame when output is enabled.
    pub trail_frames: u32,
    pub write_output: bool,
}

/// Reference grayscale image prepared for correlation.
#[derive(Debug, Clone)]
pub struct Template {
    width: u32,
    height: u32,
    /// Pixel values with the template mean subtracted, row-major.
    centered: Vec<f64>,
    /// Σ (T - mean T)²
    energy: f64,
}

impl Template {
    pub fn new(image: &GrayImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(MagikError::DetectionInput("reference image is empty".into()));
        }
        let n = (width * height) as f64;
        let mean = image.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
        let centered: Vec<f64> = image.pixels().map(|p| p[0] as f64 - mean).collect();
        let energy = centered.iter().map(|v| v * v).sum();
        Ok(Self {
            width,
            height,
            centered,
            energy,
        })
    }

    /// Loads a reference image from disk as grayscale, optionally resized.
    pub fn load(path: &std::path::Path, resize: Option<f64>) -> Result<Self> {
        let image = image::open(path)
            .map_err(|e| MagikError::DetectionInput(format!("cannot read reference image {}: {e}", path.display())))?
            .to_luma8();
        let image = match resize {
            Some(factor) => crate::core_modules::frame_source::resize_image(&image, factor),
            None => image,
        };
        Self::new(&image)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Finds the best-correlated placement in `frame`. `None` if the template does
    /// not fit inside the frame.
    pub fn best_match(&self, frame: &GrayImage) -> Option<TemplateMatch> {
        let (fw, fh) = frame.dimensions();
        if self.width > fw || self.height > fh {
            return None;
        }
        let max_x = fw - self.width;
        let max_y = fh - self.height;
        let pixels = frame.as_raw();
        let stride = fw as usize;
        let n = (self.width * self.height) as f64;

        let row_bests: Vec<(f64, u32, u32)> = (0..=max_y)
            .into_par_iter()
            .map(|y| {
                let mut best = (f64::NEG_INFINITY, 0, y);
                for x in 0..=max_x {
                    let score = self.score_at(pixels, stride, x as usize, y as usize, n);
                    if score > best.0 {
                        best = (score, x, y);
                    }
                }
                best
            })
            .collect();

        let (score, x, y) = row_bests
            .into_iter()
            .fold((f64::NEG_INFINITY, 0, 0), |acc, row| if row.0 > acc.0 { row } else { acc });

        Some(TemplateMatch {
            score: score.clamp(-1.0, 1.0) as f32,
            location: BoundingBox::new(x, y, self.width, self.height),
        })
    }

    fn score_at(&self, pixels: &[u8], stride: usize, x: usize, y: usize, n: f64) -> f64 {
        let tw = self.width as usize;
        let mut cross = 0.0;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for row in 0..self.height as usize {
            let frame_row = &pixels[(y + row) * stride + x..(y + row) * stride + x + tw];
            let template_row = &self.centered[row * tw..(row + 1) * tw];
            for (&p, &t) in frame_row.iter().zip(template_row) {
                let v = p as f64;
                cross += t * v;
                sum += v;
                sum_sq += v * v;
            }
        }
        // Σ T'(I - mean I) == Σ T'·I because Σ T' == 0.
        let window_energy = sum_sq - sum * sum / n;
        let denominator = (self.energy * window_energy).sqrt();
        if denominator < 1e-9 {
            // A flat template or a flat window carries no structure to correlate.
            return 0.0;
        }
        cross / denominator
    }
}

/// Verdict for a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub score: f32,
    /// Where the template is, for `present` searches.
    pub location: Option<BoundingBox>,
}

pub struct TemplateSearch {
    template: Template,
    policy: SearchPolicy,
}

impl TemplateSearch {
    pub fn new(template: Template, policy: SearchPolicy) -> Self {
        Self { template, policy }
    }

    pub fn policy(&self) -> &SearchPolicy {
        &self.policy
    }

    /// Applies the threshold test (negated in absent mode) to one frame.
    pub fn evaluate(&self, frame: &GrayImage) -> Option<SearchHit> {
        let best = self.template.best_match(frame);
        let score = best.map_or(0.0, |m| m.score);
        let found = self.policy.threshold.is_match(score);
        if found == self.policy.present {
            Some(SearchHit {
                score,
                location: if self.policy.present { best.map(|m| m.location) } else { None },
            })
        } else {
            None
        }
    }

    /// Scans one event. Qualifying frames, and the trailing frames after each, are
    /// written to `output` when writing is enabled.
    pub fn search_event<D: FrameDecoder>(
        &self,
        event: &Event,
        source: &mut FrameSource<D>,
        output: &mut EventOutput<'_>,
        observer: &mut dyn FrameObserver,
    ) -> Result<Vec<MatchRecord>> {
        let fps = source.fps();
        let mut records = Vec::new();
        let mut trail_left = 0u32;
        let mut done = false;

        while let Some(frame) = source.next_frame()? {
            if done {
                if trail_left == 0 {
                    break;
                }
                self.write_plain(&frame, output)?;
                trail_left -= 1;
                continue;
            }

            match self.evaluate(&frame.gray()) {
                Some(hit) => {
                    info!(
                        event_id = event.id,
                        frame = frame.index,
                        score = hit.score,
                        "{} template",
                        if self.policy.present { "found" } else { "missing" }
                    );
                    records.push(MatchRecord::search(event, &frame, fps, hit));
                    let mut marked = frame.image.clone();
                    if let Some(location) = hit.location {
                        draw_box(&mut marked, &location, MATCH_COLOR, 2);
                    }
                    observer.observe(&marked)?;
                    if self.policy.write_output {
                        output.write(&marked)?;
                    }
                    trail_left = self.policy.trail_frames;
                    if !self.policy.process_all {
                        done = true;
                    }
                }
                None if trail_left > 0 => {
                    self.write_plain(&frame, output)?;
                    trail_left -= 1;
                }
                None => debug!(event_id = event.id, frame = frame.index, "no verdict"),
            }
        }
        Ok(records)
    }

    fn write_plain(&self, frame: &Frame, output: &mut EventOutput<'_>) -> Result<()> {
        if self.policy.write_output {
            output.write(&frame.image)?;
        }
        Ok(())
    }
}
