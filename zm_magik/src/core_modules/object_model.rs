// THEORY:
// The library side of inference-backed object detection. Running a network needs
// a native runtime and lives in the CLI; what the network produces does not. A
// Darknet YOLO model emits, per output layer, one row per candidate:
//
//     [cx, cy, w, h, objectness, score_0, score_1, ...]
//
// with the box normalised to the input image. `OutputDecoder` turns those rows into
// labelled `Detection`s in frame pixels and suppresses overlapping candidates. The
// run's `DetectionFilter` still has the final say on confidence, label and mask.
//
// `ModelFiles` gathers the model description from the configuration: network
// config, weights, and the class labels, read either from a names file or from the
// `names =` entry of a Darknet meta (`.data`) file.

use crate::core_modules::detection::{BoundingBox, Detection};
use crate::error::{MagikError, Result};
use std::path::{Path, PathBuf};

/// Candidates scoring below this are dropped before overlap suppression.
pub const SCORE_FLOOR: f32 = 0.1;
/// Candidates overlapping a stronger one by more than this are dropped.
pub const OVERLAP_LIMIT: f64 = 0.45;

/// Number of leading values in a row before the class scores.
const ROW_HEADER: usize = 5;

/// A Darknet-format model ready to be loaded by an inference backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub weights: PathBuf,
    pub labels: Vec<String>,
    pub gpu: bool,
}

/// Reads one class label per non-empty line.
pub fn load_labels(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| MagikError::DetectionInput(format!("cannot read labels {}: {e}", path.display())))?;
    let labels: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    if labels.is_empty() {
        return Err(MagikError::DetectionInput(format!("no labels in {}", path.display())));
    }
    Ok(labels)
}

/// Reads the labels named by the `names` entry of a Darknet meta file. A relative
/// names path is tried next to the meta file first.
pub fn labels_from_meta(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| MagikError::DetectionInput(format!("cannot read meta file {}: {e}", path.display())))?;
    let names = raw
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(key, _)| key.trim() == "names")
        .map(|(_, value)| PathBuf::from(value.trim()))
        .ok_or_else(|| MagikError::DetectionInput(format!("{} has no names entry", path.display())))?;
    let beside = path.parent().map(|dir| dir.join(&names));
    match beside {
        Some(candidate) if names.is_relative() && candidate.exists() => load_labels(&candidate),
        _ => load_labels(&names),
    }
}

/// Turns raw YOLO output rows into detections.
#[derive(Debug, Clone)]
pub struct OutputDecoder {
    labels: Vec<String>,
    score_floor: f32,
    overlap_limit: f64,
}

impl OutputDecoder {
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            score_floor: SCORE_FLOOR,
            overlap_limit: OVERLAP_LIMIT,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Decodes `rows` (row-major, `row_len` values each) for a `width` x `height`
    /// frame. Trailing values that do not fill a row are ignored.
    pub fn decode(&self, rows: &[f32], row_len: usize, (width, height): (u32, u32)) -> Vec<Detection> {
        if row_len <= ROW_HEADER {
            return Vec::new();
        }
        let (fw, fh) = (width as f32, height as f32);
        let candidates = rows.chunks_exact(row_len).filter_map(|row| {
            let (class, score) = row[ROW_HEADER..]
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))?;
            if score < self.score_floor {
                return None;
            }
            let (cx, cy, w, h) = (row[0] * fw, row[1] * fh, row[2] * fw, row[3] * fh);
            let x0 = (cx - w / 2.0).clamp(0.0, fw).round();
            let y0 = (cy - h / 2.0).clamp(0.0, fh).round();
            let x1 = (cx + w / 2.0).clamp(0.0, fw).round();
            let y1 = (cy + h / 2.0).clamp(0.0, fh).round();
            if x1 - x0 < 1.0 || y1 - y0 < 1.0 {
                return None;
            }
            let bounding_box = BoundingBox::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32);
            let label = self.labels.get(class).cloned().unwrap_or_else(|| format!("class {class}"));
            Some(Detection::labelled(bounding_box, label, score))
        });
        suppress_overlaps(candidates.collect(), self.overlap_limit)
    }
}

/// Keeps the strongest of every group of boxes overlapping by more than `limit`.
pub fn suppress_overlaps(mut detections: Vec<Detection>, limit: f64) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.unwrap_or(0.0).total_cmp(&a.confidence.unwrap_or(0.0)));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for detection in detections {
        if kept
            .iter()
            .all(|k| k.bounding_box.iou(&detection.bounding_box) <= limit)
        {
            kept.push(detection);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::detection::DetectionFilter;
    use regex::Regex;

    fn labels() -> Vec<String> {
        ["person", "bicycle", "car"].into_iter().map(String::from).collect()
    }

    /// Output of a three-class model for a 200x100 frame.
    #[rustfmt::skip]
    const ROWS: [f32; 8 * 5] = [
        // cx    cy    w     h     obj   person bicycle car
        0.25, 0.50, 0.20, 0.60, 0.95, 0.91, 0.01, 0.02,
        0.26, 0.50, 0.22, 0.58, 0.90, 0.85, 0.02, 0.01,
        0.75, 0.50, 0.30, 0.40, 0.80, 0.05, 0.03, 0.72,
        0.50, 0.20, 0.10, 0.10, 0.40, 0.02, 0.35, 0.01,
        0.50, 0.50, 0.50, 0.50, 0.05, 0.02, 0.01, 0.03,
    ];

    #[test]
    fn rows_become_labelled_boxes_in_frame_pixels() {
        let found = OutputDecoder::new(labels()).decode(&ROWS, 8, (200, 100));
        // The second person overlaps the first and is suppressed; the last row is noise.
        assert_eq!(found.len(), 3);
        assert_eq!(found[0].label.as_deref(), Some("person"));
        assert_eq!(found[0].confidence, Some(0.91));
        assert_eq!(found[0].bounding_box, BoundingBox::new(30, 20, 40, 60));
        assert_eq!(found[1].label.as_deref(), Some("car"));
        assert_eq!(found[1].bounding_box, BoundingBox::new(120, 30, 60, 40));
    }

    #[test]
    fn decoded_output_goes_through_the_run_filter() {
        let found = OutputDecoder::new(labels()).decode(&ROWS, 8, (200, 100));
        let filter = DetectionFilter {
            min_confidence: Some(0.6),
            label_pattern: Some(Regex::new("person|car").unwrap()),
            ..DetectionFilter::accept_all()
        };
        let accepted = filter.apply(found);
        let names: Vec<_> = accepted.iter().filter_map(|d| d.label.as_deref()).collect();
        assert_eq!(names, vec!["person", "car"]);

        let people_only = DetectionFilter {
            label_pattern: Some(Regex::new("^person$").unwrap()),
            ..DetectionFilter::accept_all()
        };
        let found = OutputDecoder::new(labels()).decode(&ROWS, 8, (200, 100));
        assert_eq!(people_only.apply(found).len(), 1);
    }

    #[test]
    fn unknown_class_and_short_rows() {
        let decoder = OutputDecoder::new(vec!["person".into()]);
        let row = [0.5, 0.5, 0.5, 0.5, 0.9, 0.1, 0.8];
        let found = decoder.decode(&row, 7, (100, 100));
        assert_eq!(found[0].label.as_deref(), Some("class 1"));
        assert!(decoder.decode(&row, 5, (100, 100)).is_empty());
    }

    #[test]
    fn labels_come_from_names_or_meta_file() {
        let dir = tempfile::tempdir().unwrap();
        let names = dir.path().join("coco.names");
        std::fs::write(&names, "person\nbicycle\n\ncar\n").unwrap();
        assert_eq!(load_labels(&names).unwrap(), labels());

        let meta = dir.path().join("coco.data");
        std::fs::write(&meta, "classes = 3\nnames = coco.names\nbackup = backup/\n").unwrap();
        assert_eq!(labels_from_meta(&meta).unwrap(), labels());

        std::fs::write(&meta, "classes = 3\n").unwrap();
        assert!(matches!(labels_from_meta(&meta), Err(MagikError::DetectionInput(_))));
    }
}
