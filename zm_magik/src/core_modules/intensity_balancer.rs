// THEORY:
// The `intensity_balancer` makes a region cut from a new frame look like it was
// filmed under the same light as the composite it is pasted into. It performs
// classic histogram matching per colour channel: each channel's cumulative
// distribution is remapped so it follows the reference's distribution, which moves
// brightness and contrast while leaving the spatial content untouched.
//
// It is a pure function of its two inputs. Matching an image against itself
// returns it unchanged.

use crate::core_modules::detection::BoundingBox;
use image::{GrayImage, RgbImage, imageops};
use imageproc::contrast::match_histogram;

fn channel(image: &RgbImage, c: usize) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| image::Luma([image.get_pixel(x, y)[c]]))
}

/// Remaps `source` so its per-channel histograms follow `reference`'s.
/// The images may differ in size; only their distributions are compared.
pub fn match_intensity(source: &RgbImage, reference: &RgbImage) -> RgbImage {
    let matched: Vec<GrayImage> = (0..3)
        .map(|c| match_histogram(&channel(source, c), &channel(reference, c)))
        .collect();
    RgbImage::from_fn(source.width(), source.height(), |x, y| {
        image::Rgb([
            matched[0].get_pixel(x, y)[0],
            matched[1].get_pixel(x, y)[0],
            matched[2].get_pixel(x, y)[0],
        ])
    })
}

/// Balances only the `region` of `frame` against the same region of `composite`.
/// Both images must have the same dimensions.
pub fn balance_region(frame: &mut RgbImage, composite: &RgbImage, region: &BoundingBox) {
    let Some(region) = region.clipped(frame.width(), frame.height()) else {
        return;
    };
    let source = imageops::crop_imm(&*frame, region.x, region.y, region.width, region.height).to_image();
    let reference = imageops::crop_imm(composite, region.x, region.y, region.width, region.height).to_image();
    let balanced = match_intensity(&source, &reference);
    imageops::replace(frame, &balanced, region.x as i64, region.y as i64);
}
