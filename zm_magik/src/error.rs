// THEORY:
// Every failure in the engine is classified at the point it happens, so the
// orchestrator can decide between "abort the run" and "skip this event" without
// inspecting strings.
//
// - `Configuration` and `DetectionInput` poison every event: they are raised
//   before the first event is touched and terminate the run.
// - `Resource`, `Decode` and `Encode` belong to a single event: the event is
//   dropped, its temporary files removed, and the run continues.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MagikError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("cannot open {locator}: {reason}")]
    Resource { locator: String, reason: String },
    #[error("invalid detection input: {0}")]
    DetectionInput(String),
    #[error("decode error at frame {frame}: {reason}")]
    Decode { frame: u64, reason: String },
    #[error("cannot write {path}: {reason}")]
    Encode { path: PathBuf, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MagikError {
    pub fn resource(locator: impl Into<String>, reason: impl ToString) -> Self {
        Self::Resource {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }

    pub fn encode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Encode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error must stop the whole run rather than a single event.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::DetectionInput(_) | Self::Toml(_))
    }
}

pub type Result<T> = std::result::Result<T, MagikError>;
