// THEORY:
// The `FrameSource` is the only way the engines see video. It wraps a raw
// `FrameDecoder` (OpenCV, an image sequence, or an in-memory clip) and applies the
// two sampling policies every engine shares:
//
// 1.  **Skip-stride**: after yielding a frame, the next N-1 frames are discarded
//     without being decoded into an image. Yielded frames keep their index in the
//     *original* stream, so `index / fps` is always a real offset into the clip.
// 2.  **Resize**: every yielded frame is scaled by the same factor in both
//     dimensions, with the same interpolation, so masks and templates scaled by the
//     same factor stay aligned with it.
// 3.  **Duration cap**: an optional number of seconds per event. Frames whose
//     original index reaches `fps * duration` are never decoded.
//
// Outputs built from a strided source hold one frame per stride, so they are
// written at `output_fps()` to play back in real time.
//
// A source is opened per event and dropped when that event finishes; dropping it
// releases the decoder.

use crate::error::Result;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Pixel, RgbImage};
use tracing::{debug, info};

/// A decoded frame together with its index in the original stream.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub image: RgbImage,
}

impl Frame {
    pub fn gray(&self) -> GrayImage {
        imageops::grayscale(&self.image)
    }

    /// Offset of this frame from the start of the clip, in seconds.
    pub fn offset_secs(&self, fps: f64) -> f64 {
        if fps > 0.0 { self.index as f64 / fps } else { 0.0 }
    }
}

/// A raw, sequential video decoder.
pub trait FrameDecoder {
    fn fps(&self) -> f64;

    /// Decodes the next frame, or `None` at end of stream.
    fn decode_next(&mut self) -> Result<Option<RgbImage>>;

    /// Advances past one frame without handing it out. Returns `false` at end of stream.
    fn skip_next(&mut self) -> Result<bool> {
        Ok(self.decode_next()?.is_some())
    }
}

impl<D: FrameDecoder + ?Sized> FrameDecoder for Box<D> {
    fn fps(&self) -> f64 {
        (**self).fps()
    }

    fn decode_next(&mut self) -> Result<Option<RgbImage>> {
        (**self).decode_next()
    }

    fn skip_next(&mut self) -> Result<bool> {
        (**self).skip_next()
    }
}

/// Sequential frame access with skip-stride and resize applied.
pub struct FrameSource<D> {
    decoder: D,
    stride: u32,
    resize: Option<f64>,
    next_index: u64,
    finished: bool,
    /// First original index that is no longer read.
    limit: Option<u64>,
    progress_every: Option<u64>,
    yielded: u64,
}

impl<D: FrameDecoder> FrameSource<D> {
    pub fn new(decoder: D, stride: u32, resize: Option<f64>) -> Self {
        Self {
            decoder,
            stride: stride.max(1),
            resize,
            next_index: 0,
            finished: false,
            limit: None,
            progress_every: None,
            yielded: 0,
        }
    }

    /// Stops reading after `secs` seconds of the clip. `None` reads to the end.
    pub fn with_duration(mut self, secs: Option<f64>) -> Self {
        self.limit = secs.map(|secs| (secs * self.decoder.fps()).round().max(0.0) as u64);
        self
    }

    /// Logs a progress line every `every` yielded frames.
    pub fn with_progress(mut self, every: Option<u64>) -> Self {
        self.progress_every = every.filter(|n| *n > 0);
        self
    }

    pub fn fps(&self) -> f64 {
        self.decoder.fps()
    }

    /// Frame rate at which the yielded frames play back in real time.
    pub fn output_fps(&self) -> f64 {
        self.fps() / self.stride as f64
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        if let Some(limit) = self.limit {
            if self.next_index >= limit {
                debug!(frames = self.next_index, "duration reached");
                self.finished = true;
                return Ok(None);
            }
        }
        let Some(image) = self.decoder.decode_next()? else {
            self.finished = true;
            return Ok(None);
        };
        let index = self.next_index;
        self.next_index += 1;

        for _ in 1..self.stride {
            if !self.decoder.skip_next()? {
                self.finished = true;
                break;
            }
            self.next_index += 1;
        }

        let image = match self.resize {
            Some(factor) => resize_image(&image, factor),
            None => image,
        };
        self.yielded += 1;
        if let Some(every) = self.progress_every {
            if self.yielded % every == 0 {
                info!(frames = self.yielded, index, "progress");
            }
        }
        Ok(Some(Frame { index, image }))
    }

    /// Releases the underlying decoder.
    pub fn close(self) {}
}

impl<D: FrameDecoder> Iterator for FrameSource<D> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

/// Scales a dimension pair by `factor`, truncating like an integer cast and never
/// collapsing below one pixel.
pub fn scaled_dimensions(width: u32, height: u32, factor: f64) -> (u32, u32) {
    let w = ((width as f64 * factor) as u32).max(1);
    let h = ((height as f64 * factor) as u32).max(1);
    (w, h)
}

/// Resizes any image by `factor` with bilinear interpolation.
pub fn resize_image<P>(image: &ImageBuffer<P, Vec<P::Subpixel>>, factor: f64) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    let (w, h) = scaled_dimensions(image.width(), image.height(), factor);
    if (w, h) == image.dimensions() {
        return image.clone();
    }
    imageops::resize(image, w, h, FilterType::Triangle)
}

/// A decoder over frames already held in memory.
pub struct MemoryDecoder {
    frames: std::vec::IntoIter<RgbImage>,
    fps: f64,
}

impl MemoryDecoder {
    pub fn new(frames: Vec<RgbImage>, fps: f64) -> Self {
        Self {
            frames: frames.into_iter(),
            fps,
        }
    }
}

impl FrameDecoder for MemoryDecoder {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn decode_next(&mut self) -> Result<Option<RgbImage>> {
        Ok(self.frames.next())
    }
}
