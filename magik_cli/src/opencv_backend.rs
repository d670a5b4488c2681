// THEORY:
// OpenCV is only linked into the binary. This module adapts it to the library's
// `VideoBackend` seam: `VideoCapture` becomes a `FrameDecoder`, `VideoWriter` a
// `FrameSink`. OpenCV speaks BGR while the library works in RGB, so every frame
// is converted exactly once on the way in and once on the way out.
//
// Skipped frames are only grabbed, never retrieved, which avoids the colour
// conversion and copy for frames the stride throws away.

use image::RgbImage;
use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use std::path::{Path, PathBuf};
use tracing::debug;
use zm_magik::core_modules::frame_source::FrameDecoder;
use zm_magik::media::{FrameSink, VideoBackend};
use zm_magik::{MagikError, Result};

/// BGR `Mat` to an owned RGB image.
pub fn mat_to_rgb(mat: &Mat) -> opencv::Result<Option<RgbImage>> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(mat, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
    let size = rgb.size()?;
    Ok(RgbImage::from_raw(
        size.width as u32,
        size.height as u32,
        rgb.data_bytes()?.to_vec(),
    ))
}

/// RGB image to a freshly allocated BGR `Mat`.
pub fn rgb_to_mat(frame: &RgbImage) -> opencv::Result<Mat> {
    let (w, h) = (frame.width() as i32, frame.height() as i32);
    let mut rgb = Mat::new_rows_cols_with_default(h, w, core::CV_8UC3, Scalar::all(0.0))?;
    rgb.data_bytes_mut()?.copy_from_slice(frame.as_raw());
    let mut bgr = Mat::default();
    imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;
    Ok(bgr)
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| MagikError::resource(path.display().to_string(), "path is not valid UTF-8"))
}

/// Decodes local files and URLs with `VideoCapture`, encodes with `mp4v`.
#[derive(Debug, Clone, Default)]
pub struct OpenCvBackend {
    /// Replaces whatever frame rate the container reports.
    fps_override: Option<f64>,
}

impl OpenCvBackend {
    pub fn new(fps_override: Option<f64>) -> Self {
        Self { fps_override }
    }
}

impl VideoBackend for OpenCvBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameDecoder>> {
        let locator = path_str(path)?;
        let fail = |e: opencv::Error| MagikError::resource(locator, e);
        let cap = VideoCapture::from_file(locator, videoio::CAP_ANY).map_err(fail)?;
        if !cap.is_opened().map_err(fail)? {
            return Err(MagikError::resource(locator, "video could not be opened"));
        }

        let fps = match self.fps_override {
            Some(fps) => fps,
            None => cap.get(videoio::CAP_PROP_FPS).map_err(fail)?,
        };
        if !(fps.is_finite() && fps > 0.0) {
            return Err(MagikError::resource(
                locator,
                "stream reports no frame rate; set fps explicitly",
            ));
        }
        debug!(locator, fps, "opened video");
        Ok(Box::new(OpenCvDecoder { cap, fps, frame: 0 }))
    }

    fn create(&self, path: &Path, fps: f64, width: u32, height: u32) -> Result<Box<dyn FrameSink>> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let fail = |e: opencv::Error| MagikError::encode(path, e);
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v').map_err(fail)?;
        let writer = VideoWriter::new(
            path_str(path)?,
            fourcc,
            fps,
            core::Size::new(width as i32, height as i32),
            true,
        )
        .map_err(fail)?;
        if !writer.is_opened().map_err(fail)? {
            return Err(MagikError::encode(path, "video writer could not be opened"));
        }
        Ok(Box::new(OpenCvWriter {
            writer,
            path: path.to_path_buf(),
        }))
    }
}

pub struct OpenCvDecoder {
    cap: VideoCapture,
    fps: f64,
    frame: u64,
}

impl FrameDecoder for OpenCvDecoder {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn decode_next(&mut self) -> Result<Option<RgbImage>> {
        let frame = self.frame;
        let fail = |e: opencv::Error| MagikError::Decode {
            frame,
            reason: e.to_string(),
        };
        let mut mat = Mat::default();
        if !self.cap.read(&mut mat).map_err(fail)? || mat.empty() {
            return Ok(None);
        }
        let image = mat_to_rgb(&mat).map_err(fail)?.ok_or_else(|| MagikError::Decode {
            frame,
            reason: "frame buffer has an unexpected layout".into(),
        })?;
        self.frame += 1;
        Ok(Some(image))
    }

    fn skip_next(&mut self) -> Result<bool> {
        let frame = self.frame;
        let grabbed = self.cap.grab().map_err(|e| MagikError::Decode {
            frame,
            reason: e.to_string(),
        })?;
        if grabbed {
            self.frame += 1;
        }
        Ok(grabbed)
    }
}

pub struct OpenCvWriter {
    writer: VideoWriter,
    path: PathBuf,
}

impl FrameSink for OpenCvWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        let mat = rgb_to_mat(frame).map_err(|e| MagikError::encode(&self.path, e))?;
        self.writer.write(&mat).map_err(|e| MagikError::encode(&self.path, e))
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        self.writer.release().map_err(|e| MagikError::encode(&self.path, e))
    }
}
