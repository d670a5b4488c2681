// THEORY:
// Shared fixtures for the integration tests: synthetic frames and clip writing.

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use zm_magik::image_sequence::ImageSequenceBackend;
use zm_magik::media::VideoBackend;

pub const FPS: f64 = 10.0;

pub fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 6, 1).unwrap().and_hms_opt(9, 58, 0).unwrap()
}

/// Deterministic grey-level noise.
pub fn noise(width: u32, height: u32, seed: u32) -> RgbImage {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    RgbImage::from_fn(width, height, |_, _| {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        let v = 40 + ((state >> 24) % 120) as u8;
        Rgb([v, v, v])
    })
}

pub fn paint_square(image: &mut RgbImage, x: u32, y: u32, size: u32, color: Rgb<u8>) {
    for yy in y..y + size {
        for xx in x..x + size {
            image.put_pixel(xx, yy, color);
        }
    }
}

/// Writes `frames` as an image-sequence clip and returns its path.
pub fn write_clip(dir: &Path, name: &str, frames: &[RgbImage]) -> PathBuf {
    let path = dir.join(name);
    let backend = ImageSequenceBackend::new(FPS);
    let (w, h) = frames[0].dimensions();
    let mut sink = backend.create(&path, FPS, w, h).unwrap();
    for frame in frames {
        sink.write(frame).unwrap();
    }
    sink.finish().unwrap();
    path
}

pub fn frame_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}
