// THEORY:
// A codec-free `VideoBackend`: a "video" is a directory of numbered still images.
// Decoding reads every image file in the directory in file-name order; encoding
// writes `frame_000000.png`, `frame_000001.png`, ... into a fresh directory. The
// frame rate is not stored on disk, so the backend carries a nominal one.
//
// This is what the library's own tests run against, and it lets the CLI process
// exported frame dumps without OpenCV.

use crate::core_modules::frame_source::FrameDecoder;
use crate::error::{MagikError, Result};
use crate::media::{FrameSink, VideoBackend};
use image::RgbImage;
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone)]
pub struct ImageSequenceBackend {
    fps: f64,
}

impl ImageSequenceBackend {
    pub fn new(fps: f64) -> Self {
        Self { fps }
    }
}

impl VideoBackend for ImageSequenceBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameDecoder>> {
        Ok(Box::new(ImageSequenceDecoder::open(path, self.fps)?))
    }

    fn create(&self, path: &Path, _fps: f64, width: u32, height: u32) -> Result<Box<dyn FrameSink>> {
        Ok(Box::new(ImageSequenceWriter::create(path, width, height)?))
    }

    fn extension(&self) -> &str {
        ""
    }
}

pub struct ImageSequenceDecoder {
    files: std::vec::IntoIter<PathBuf>,
    fps: f64,
    position: u64,
}

impl ImageSequenceDecoder {
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        let entries = std::fs::read_dir(dir).map_err(|e| MagikError::resource(dir.display().to_string(), e))?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        files.sort();
        Ok(Self {
            files: files.into_iter(),
            fps,
            position: 0,
        })
    }
}

impl FrameDecoder for ImageSequenceDecoder {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn decode_next(&mut self) -> Result<Option<RgbImage>> {
        let Some(file) = self.files.next() else {
            return Ok(None);
        };
        let frame = self.position;
        self.position += 1;
        let image = image::open(&file).map_err(|e| MagikError::Decode {
            frame,
            reason: format!("{}: {e}", file.display()),
        })?;
        Ok(Some(image.to_rgb8()))
    }

    fn skip_next(&mut self) -> Result<bool> {
        self.position += 1;
        Ok(self.files.next().is_some())
    }
}

pub struct ImageSequenceWriter {
    dir: PathBuf,
    width: u32,
    height: u32,
    next: u64,
}

impl ImageSequenceWriter {
    pub fn create(dir: &Path, width: u32, height: u32) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| MagikError::encode(dir, e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            width,
            height,
            next: 0,
        })
    }
}

impl FrameSink for ImageSequenceWriter {
    fn write(&mut self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.width, self.height) {
            return Err(MagikError::encode(
                &self.dir,
                format!(
                    "frame is {:?}, sequence was created for {:?}",
                    frame.dimensions(),
                    (self.width, self.height)
                ),
            ));
        }
        let path = self.dir.join(format!("frame_{:06}.png", self.next));
        frame.save(&path).map_err(|e| MagikError::encode(&path, e))?;
        self.next += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn writes_then_reads_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip");
        let backend = ImageSequenceBackend::new(5.0);

        let mut sink = backend.create(&clip, 5.0, 6, 4).unwrap();
        for v in [10u8, 20, 30] {
            sink.write(&RgbImage::from_pixel(6, 4, Rgb([v, v, v]))).unwrap();
        }
        sink.finish().unwrap();

        let mut decoder = backend.open(&clip).unwrap();
        assert_eq!(decoder.fps(), 5.0);
        assert!(decoder.skip_next().unwrap());
        let second = decoder.decode_next().unwrap().unwrap();
        assert_eq!(second.get_pixel(0, 0), &Rgb([20, 20, 20]));
        assert!(decoder.decode_next().unwrap().is_some());
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn rejects_mismatched_frame_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ImageSequenceWriter::create(&dir.path().join("o"), 4, 4).unwrap();
        let err = writer.write(&RgbImage::new(5, 4)).unwrap_err();
        assert!(matches!(err, MagikError::Encode { .. }));
    }

    #[test]
    fn missing_directory_is_a_resource_error() {
        let err = ImageSequenceDecoder::open(Path::new("/no/such/clip"), 10.0).err().unwrap();
        assert!(matches!(err, MagikError::Resource { .. }));
    }
}
