// THEORY:
// The optional live view. Every frame an engine produces is handed to the
// observer before it is written, so the window shows exactly what lands in the
// output. HighGUI needs BGR `Mat`s, hence the conversion through the OpenCV
// backend. A display error is a per-event failure like any other resource error.

use crate::opencv_backend::rgb_to_mat;
use image::RgbImage;
use opencv::highgui;
use tracing::{info, warn};
use zm_magik::{FrameObserver, MagikError, Result};

/// Shows every composed or annotated frame in a HighGUI window.
///
/// In interactive mode each frame waits for a key press; `c` switches to
/// continuous playback for the rest of the run.
pub struct HighGuiDisplay {
    window: String,
    interactive: bool,
}

impl HighGuiDisplay {
    pub fn new(window: impl Into<String>, interactive: bool) -> Result<Self> {
        let window = window.into();
        highgui::named_window(&window, highgui::WINDOW_NORMAL).map_err(display_error)?;
        Ok(Self { window, interactive })
    }
}

fn display_error(e: opencv::Error) -> MagikError {
    MagikError::resource("display", e)
}

impl FrameObserver for HighGuiDisplay {
    fn observe(&mut self, frame: &RgbImage) -> Result<()> {
        let mat = rgb_to_mat(frame).map_err(display_error)?;
        highgui::imshow(&self.window, &mat).map_err(display_error)?;
        if self.interactive {
            let key = highgui::wait_key(0).map_err(display_error)?;
            if key == 'c' as i32 {
                info!("interactive mode off");
                self.interactive = false;
            }
        } else {
            highgui::wait_key(1).map_err(display_error)?;
        }
        Ok(())
    }
}

impl Drop for HighGuiDisplay {
    fn drop(&mut self) {
        if let Err(e) = highgui::destroy_window(&self.window) {
            warn!("could not close display window: {e}");
        }
    }
}
