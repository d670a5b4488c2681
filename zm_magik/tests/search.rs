// THEORY:
// End-to-end template search over image-sequence clips.

mod common;

use chrono::TimeDelta;
use common::*;
use image::{GrayImage, Luma, Rgb, RgbImage, imageops};
use zm_magik::image_sequence::ImageSequenceBackend;
use zm_magik::media::NullObserver;
use zm_magik::{Event, LocalClipProvider, MagikConfig, Orchestrator};

fn reference() -> GrayImage {
    GrayImage::from_fn(16, 16, |x, y| {
        let cell = (x / 4) + 4 * (y / 4);
        Luma([(30 + (cell * 37) % 200) as u8])
    })
}

fn as_rgb(gray: &GrayImage) -> RgbImage {
    RgbImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y)[0];
        Rgb([v, v, v])
    })
}

/// 100 frames of noise; frames 40 to 45 carry an exact copy of the reference.
fn clip() -> Vec<RgbImage> {
    let patch = as_rgb(&reference());
    (0..100)
        .map(|i| {
            let mut frame = noise(64, 48, i);
            if (40..=45).contains(&i) {
                imageops::replace(&mut frame, &patch, 20, 16);
            }
            frame
        })
        .collect()
}

fn config(dir: &std::path::Path, present: bool) -> MagikConfig {
    let template = dir.join("reference.png");
    reference().save(&template).unwrap();
    MagikConfig {
        find: Some(template),
        threshold: 0.9,
        present,
        write: true,
        output_dir: dir.to_path_buf(),
        ..MagikConfig::default()
    }
}

#[test]
fn first_match_is_reported_once_at_frame_40() {
    let dir = tempfile::tempdir().unwrap();
    let video = write_clip(dir.path(), "clip", &clip());
    let plan = config(dir.path(), true).validate().unwrap();

    let backend = ImageSequenceBackend::new(FPS);
    let mut clips = LocalClipProvider;
    let mut observer = NullObserver;
    let mut orchestrator = Orchestrator::new(plan, &backend, &mut clips, &mut observer);
    let event = Event::new(7, 3, start(), video.to_string_lossy());
    let summary = orchestrator.run(vec![event]).unwrap();

    let records: Vec<_> = summary.report.records().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].frame_index, 40);
    assert_eq!(records[0].timestamp, start() + TimeDelta::seconds(4));
    let location = records[0].bounding_box.unwrap();
    assert_eq!((location.x, location.y), (20, 16));

    // The match plus ten trailing frames.
    let output = dir.path().join("analyzed-mID_3-Event-7");
    assert_eq!(summary.report.events[0].output.as_deref(), Some(output.as_path()));
    assert_eq!(frame_count(&output), 11);
}

#[test]
fn absent_mode_reports_first_frame_without_reference() {
    let dir = tempfile::tempdir().unwrap();
    let frames: Vec<RgbImage> = clip().into_iter().skip(40).collect();
    let video = write_clip(dir.path(), "clip", &frames);
    let mut cfg = config(dir.path(), false);
    cfg.write = false;
    let plan = cfg.validate().unwrap();

    let backend = ImageSequenceBackend::new(FPS);
    let mut clips = LocalClipProvider;
    let mut observer = NullObserver;
    let summary = Orchestrator::new(plan, &backend, &mut clips, &mut observer)
        .run(vec![Event::new(1, 1, start(), video.to_string_lossy())])
        .unwrap();

    let records: Vec<_> = summary.report.records().collect();
    assert_eq!(records.len(), 1);
    // Frames 0..=5 of this clip carry the reference.
    assert_eq!(records[0].frame_index, 6);
    assert_eq!(records[0].bounding_box, None);
    assert!(summary.report.events[0].output.is_none());
}

#[test]
fn skip_stride_keeps_original_frame_indices() {
    let dir = tempfile::tempdir().unwrap();
    let video = write_clip(dir.path(), "clip", &clip());
    let mut cfg = config(dir.path(), true);
    cfg.skip_frames = 3;
    cfg.write = false;
    let plan = cfg.validate().unwrap();

    let backend = ImageSequenceBackend::new(FPS);
    let mut clips = LocalClipProvider;
    let mut observer = NullObserver;
    let summary = Orchestrator::new(plan, &backend, &mut clips, &mut observer)
        .run(vec![Event::new(1, 1, start(), video.to_string_lossy())])
        .unwrap();

    // Yielded frames are 0, 3, 6, ...; the first one inside 40..=45 is 42.
    let records: Vec<_> = summary.report.records().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].frame_index, 42);
}
