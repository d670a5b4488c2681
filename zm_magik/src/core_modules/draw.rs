// THEORY:
// Drawing primitives shared by the three engines: hollow boxes around detections
// and small text labels on a filled background. Boxes and text both go through
// `imageproc`. Labels are rendered with DejaVu Sans Mono, bundled into the binary,
// so a label's width depends only on its character count. All drawing clips
// against the frame, so callers may pass coordinates that hang off the edge.

use crate::core_modules::detection::BoundingBox;
use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::sync::LazyLock;
use tracing::warn;

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const MATCH_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
pub const LABEL_FOREGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Line height in pixels at font scale 1.0.
const BASE_TEXT_HEIGHT: f32 = 20.0;
const LABEL_PADDING: i64 = 2;

static FONT_DATA: &[u8] = include_bytes!("../../assets/DejaVuSansMono.ttf");

static LABEL_FONT: LazyLock<Option<FontRef<'static>>> = LazyLock::new(|| match FontRef::try_from_slice(FONT_DATA) {
    Ok(font) => Some(font),
    Err(e) => {
        warn!("bundled label font is unusable, labels are drawn without text: {e}");
        None
    }
});

pub fn draw_box(frame: &mut RgbImage, bounding_box: &BoundingBox, color: Rgb<u8>, thickness: u32) {
    for inset in 0..thickness {
        let w = bounding_box.width.saturating_sub(2 * inset);
        let h = bounding_box.height.saturating_sub(2 * inset);
        if w == 0 || h == 0 {
            break;
        }
        let rect = Rect::at((bounding_box.x + inset) as i32, (bounding_box.y + inset) as i32).of_size(w, h);
        draw_hollow_rect_mut(frame, rect, color);
    }
}

fn text_scale(font_scale: f32) -> PxScale {
    PxScale::from((BASE_TEXT_HEIGHT * font_scale).max(1.0))
}

/// Width and height in pixels of `text` at `font_scale`, without padding.
pub fn text_size(text: &str, font_scale: f32) -> (u32, u32) {
    let scale = text_scale(font_scale);
    let Some(font) = LABEL_FONT.as_ref() else {
        return (0, scale.y.round() as u32);
    };
    let scaled = font.as_scaled(scale);
    let width: f32 = text.chars().map(|c| scaled.h_advance(font.glyph_id(c))).sum();
    (width.ceil() as u32, scaled.height().round() as u32)
}

/// Writes `text` on a black box whose bottom-left corner is at (`x`, `y`).
///
/// With `adjust`, a label that would run off the right or bottom edge is pulled
/// back inside the frame. Returns the area the label occupies, clipped to the
/// frame.
pub fn write_text(frame: &mut RgbImage, text: &str, x: i64, y: i64, font_scale: f32, adjust: bool) -> Option<BoundingBox> {
    let (tw, th) = text_size(text, font_scale);
    let (tw, th) = (tw as i64, th as i64);
    let box_w = tw + 2 * LABEL_PADDING;
    let box_h = th + 2 * LABEL_PADDING;

    let mut left = x;
    let mut top = y - box_h;
    if adjust {
        let (fw, fh) = (frame.width() as i64, frame.height() as i64);
        if left + box_w > fw {
            left = (fw - box_w).max(0);
        }
        if top + box_h > fh {
            top = (fh - box_h).max(0);
        }
        top = top.max(0);
    }

    fill(frame, left, top, box_w, box_h, LABEL_BACKGROUND);
    if let Some(font) = LABEL_FONT.as_ref() {
        draw_text_mut(
            frame,
            LABEL_FOREGROUND,
            (left + LABEL_PADDING) as i32,
            (top + LABEL_PADDING) as i32,
            text_scale(font_scale),
            font,
            text,
        );
    }

    clip(left, top, box_w, box_h, frame.width(), frame.height())
}

fn fill(frame: &mut RgbImage, x: i64, y: i64, w: i64, h: i64, color: Rgb<u8>) {
    if w <= 0 || h <= 0 {
        return;
    }
    draw_filled_rect_mut(frame, Rect::at(x as i32, y as i32).of_size(w as u32, h as u32), color);
}

fn clip(x: i64, y: i64, w: i64, h: i64, fw: u32, fh: u32) -> Option<BoundingBox> {
    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + w).min(fw as i64);
    let y1 = (y + h).min(fh as i64);
    (x1 > x0 && y1 > y0).then(|| BoundingBox::new(x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
}
