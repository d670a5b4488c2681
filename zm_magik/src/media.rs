// THEORY:
// The `media` module is the boundary between the engines and everything that
// touches the filesystem or a codec. The engines are written against three seams:
//
// - `VideoBackend`: opens a decoder for a local clip and creates encoders for
//   output videos. The core ships an image-sequence backend; the CLI adds OpenCV.
// - `ClipProvider`: turns an `Event` locator into something the backend can open,
//   downloading it if needed. The returned `MaterializedClip` owns any temporary
//   file and deletes it when dropped, whether the event succeeded or not.
// - `EventOutput`: a lazily-created output video that deletes itself on drop unless
//   it was finished successfully, so a failed event never leaves a partial file.

use crate::core_modules::frame_source::FrameDecoder;
use crate::error::{MagikError, Result};
use crate::event::Event;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// An encoder for one output video.
pub trait FrameSink {
    fn write(&mut self, frame: &RgbImage) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<()>;
}

pub trait VideoBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameDecoder>>;
    fn create(&self, path: &Path, fps: f64, width: u32, height: u32) -> Result<Box<dyn FrameSink>>;

    /// File extension for outputs created by this backend, without the dot.
    fn extension(&self) -> &str {
        "mp4"
    }
}

/// A clip ready to be opened by a `VideoBackend`.
#[derive(Debug)]
pub struct MaterializedClip {
    path: PathBuf,
    temporary: bool,
}

impl MaterializedClip {
    /// A clip that belongs to someone else and must not be deleted.
    pub fn borrowed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: false,
        }
    }

    /// A clip fetched for this event only; removed on drop.
    pub fn temporary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temporary: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MaterializedClip {
    fn drop(&mut self) {
        if self.temporary {
            match remove_output(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "removed downloaded clip"),
                Err(e) => warn!(path = %self.path.display(), "could not remove downloaded clip: {e}"),
            }
        }
    }
}

pub trait ClipProvider {
    fn materialize(&mut self, event: &Event) -> Result<MaterializedClip>;
}

/// Treats every locator as a path on the local filesystem.
#[derive(Debug, Default)]
pub struct LocalClipProvider;

impl ClipProvider for LocalClipProvider {
    fn materialize(&mut self, event: &Event) -> Result<MaterializedClip> {
        let path = PathBuf::from(&event.video);
        if !path.exists() {
            return Err(MagikError::resource(&event.video, "file does not exist"));
        }
        Ok(MaterializedClip::borrowed(path))
    }
}

/// Receives every frame an engine composes or annotates, e.g. for live display.
pub trait FrameObserver {
    fn observe(&mut self, frame: &RgbImage) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct NullObserver;

impl FrameObserver for NullObserver {
    fn observe(&mut self, _frame: &RgbImage) -> Result<()> {
        Ok(())
    }
}

/// Removes an output file, or an output directory for sequence backends.
/// A missing path is not an error.
pub fn remove_output(path: &Path) -> std::io::Result<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// File name for an output with the given stem. Sequence backends have no
/// extension.
pub fn output_file_name(stem: &str, extension: &str) -> String {
    if extension.is_empty() { stem.to_string() } else { format!("{stem}.{extension}") }
}

/// An output video that is only created once the first frame arrives.
pub struct EventOutput<'a> {
    backend: &'a dyn VideoBackend,
    path: PathBuf,
    fps: f64,
    sink: Option<Box<dyn FrameSink>>,
    frames_written: u64,
    committed: bool,
}

impl<'a> EventOutput<'a> {
    pub fn new(backend: &'a dyn VideoBackend, path: impl Into<PathBuf>, fps: f64) -> Self {
        Self {
            backend,
            path: path.into(),
            fps,
            sink: None,
            frames_written: 0,
            committed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn write(&mut self, frame: &RgbImage) -> Result<()> {
        if self.sink.is_none() {
            let (w, h) = frame.dimensions();
            self.sink = Some(self.backend.create(&self.path, self.fps, w, h)?);
        }
        if let Some(sink) = self.sink.as_mut() {
            sink.write(frame)?;
            self.frames_written += 1;
        }
        Ok(())
    }

    /// Flushes the encoder and keeps the file. Returns the path if anything was
    /// written.
    pub fn finish(mut self) -> Result<Option<PathBuf>> {
        self.committed = true;
        match self.sink.take() {
            Some(sink) => {
                sink.finish()?;
                Ok(Some(self.path.clone()))
            }
            None => Ok(None),
        }
    }
}

impl Drop for EventOutput<'_> {
    fn drop(&mut self) {
        if self.committed || self.sink.is_none() {
            return;
        }
        // Release the encoder before deleting what it wrote.
        self.sink = None;
        if let Err(e) = remove_output(&self.path) {
            warn!(path = %self.path.display(), "could not remove partial output: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_sequence::ImageSequenceBackend;
    use image::Rgb;

    #[test]
    fn temporary_clip_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("7-video.mp4");
        std::fs::write(&path, b"not really a video").unwrap();
        {
            let clip = MaterializedClip::temporary(&path);
            assert!(clip.path().exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn borrowed_clip_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.mp4");
        std::fs::write(&path, b"x").unwrap();
        drop(MaterializedClip::borrowed(&path));
        assert!(path.exists());
    }

    #[test]
    fn unfinished_output_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ImageSequenceBackend::new(10.0);
        let path = dir.path().join("out");
        {
            let mut output = EventOutput::new(&backend, &path, 10.0);
            output.write(&RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn finished_output_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ImageSequenceBackend::new(10.0);
        let path = dir.path().join("out");
        let mut output = EventOutput::new(&backend, &path, 10.0);
        output.write(&RgbImage::new(4, 4)).unwrap();
        output.write(&RgbImage::new(4, 4)).unwrap();
        assert_eq!(output.frames_written(), 2);
        assert_eq!(output.finish().unwrap(), Some(path.clone()));
        assert!(path.exists());
    }

    #[test]
    fn empty_output_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ImageSequenceBackend::new(10.0);
        let path = dir.path().join("never");
        let output = EventOutput::new(&backend, &path, 10.0);
        assert_eq!(output.finish().unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn output_name_follows_backend_extension() {
        assert_eq!(output_file_name("blended", "mp4"), "blended.mp4");
        assert_eq!(output_file_name("blended", ""), "blended");
    }

    #[test]
    fn local_provider_rejects_missing_file() {
        let event = Event::new(1, 1, chrono::NaiveDateTime::default(), "/definitely/not/here.mp4");
        let err = LocalClipProvider.materialize(&event).unwrap_err();
        assert!(matches!(err, MagikError::Resource { .. }));
    }
}
