// THEORY:
// A `Detection` is the common currency between the detectors and the engines that
// consume them. Whether a region came from the background model or from an object
// model, it is reduced to a bounding box, an area, and an optional label and
// confidence. Acceptance (mask containment, minimum area, confidence, label pattern)
// is decided in one place, `DetectionFilter`, so every engine filters identically.

use crate::core_modules::polygon_mask::PolygonMask;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// An axis-aligned box in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn centroid(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            x: (self.x as f64 * factor) as u32,
            y: (self.y as f64 * factor) as u32,
            width: (self.width as f64 * factor) as u32,
            height: (self.height as f64 * factor) as u32,
        }
    }

    /// Intersection over union of two boxes, 0 when they do not overlap.
    pub fn iou(&self, other: &Self) -> f64 {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        let intersection = x1.saturating_sub(x0) as u64 * y1.saturating_sub(y0) as u64;
        let union = self.area() + other.area() - intersection;
        if union == 0 { 0.0 } else { intersection as f64 / union as f64 }
    }

    /// Clips the box to a `width` x `height` frame. Returns `None` if nothing is left.
    pub fn clipped(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        (w > 0 && h > 0).then(|| Self::new(self.x, self.y, w, h))
    }
}

/// A region of interest reported for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    /// Pixel area of the region (foreground pixel count for motion blobs).
    pub area: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Detection {
    pub fn motion(bounding_box: BoundingBox, area: f64) -> Self {
        Self {
            bounding_box,
            area,
            label: None,
            confidence: None,
        }
    }

    pub fn labelled(bounding_box: BoundingBox, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            area: bounding_box.area() as f64,
            bounding_box,
            label: Some(label.into()),
            confidence: Some(confidence),
        }
    }
}

/// Decides which detections an engine accepts.
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    pub mask: Option<PolygonMask>,
    pub min_area: Option<f64>,
    pub min_confidence: Option<f32>,
    pub label_pattern: Option<Regex>,
}

impl DetectionFilter {
    pub fn accept_all() -> Self {
        Self {
            mask: None,
            min_area: None,
            min_confidence: None,
            label_pattern: None,
        }
    }

    pub fn accepts(&self, detection: &Detection) -> bool {
        if let Some(min_area) = self.min_area {
            if detection.area < min_area {
                return false;
            }
        }
        if let Some(min_confidence) = self.min_confidence {
            if detection.confidence.is_some_and(|c| c < min_confidence) {
                return false;
            }
        }
        if let (Some(pattern), Some(label)) = (&self.label_pattern, &detection.label) {
            if !pattern.is_match(label) {
                return false;
            }
        }
        self.mask
            .as_ref()
            .is_none_or(|mask| mask.contains(&detection.bounding_box))
    }

    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections.into_iter().filter(|d| self.accepts(d)).collect()
    }
}
