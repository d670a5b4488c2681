// THEORY:
// The `blob_detector` is the spatial grouping step of motion extraction. It takes a
// binary foreground mask for a single frame and groups foreground pixels into
// connected regions ("blobs"), each summarised by its bounding box and its pixel
// area. Like the rest of the spatial layer it is stateless: one mask in, one list of
// blobs out, no memory of previous frames.
//
// Connectivity is 8-way, so diagonal neighbours belong to the same blob. Regions are
// grown with an explicit stack rather than recursion, so a frame-sized blob cannot
// overflow the call stack.

use crate::core_modules::detection::BoundingBox;
use image::GrayImage;

/// A connected foreground region.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub bounding_box: BoundingBox,
    /// Number of foreground pixels in the region.
    pub area: usize,
}

pub mod blob_detector {
    use super::*;

    /// Finds every connected region of non-zero pixels in `mask`, in row-major order
    /// of each region's first pixel.
    pub fn find_blobs(mask: &GrayImage) -> Vec<Blob> {
        let (width, height) = mask.dimensions();
        let mut visited = vec![false; (width * height) as usize];
        let mut blobs = Vec::new();

        for y in 0..height {
            for x in 0..width {
                let index = (y * width + x) as usize;
                if visited[index] || mask.get_pixel(x, y)[0] == 0 {
                    continue;
                }
                blobs.push(grow_blob(mask, &mut visited, x, y));
            }
        }
        blobs
    }

    fn grow_blob(mask: &GrayImage, visited: &mut [bool], seed_x: u32, seed_y: u32) -> Blob {
        let (width, height) = mask.dimensions();
        let mut stack = vec![(seed_x, seed_y)];
        visited[(seed_y * width + seed_x) as usize] = true;

        let (mut min_x, mut min_y, mut max_x, mut max_y) = (seed_x, seed_y, seed_x, seed_y);
        let mut area = 0usize;

        while let Some((x, y)) = stack.pop() {
            area += 1;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = x as i64 + dx;
                    let ny = y as i64 + dy;
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let (nx, ny) = (nx as u32, ny as u32);
                    let index = (ny * width + nx) as usize;
                    if !visited[index] && mask.get_pixel(nx, ny)[0] != 0 {
                        visited[index] = true;
                        stack.push((nx, ny));
                    }
                }
            }
        }

        Blob {
            bounding_box: BoundingBox::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1),
            area,
        }
    }
}
