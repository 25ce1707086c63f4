use std::path::PathBuf;

use thiserror::Error;

/// Library error type for the background engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The source could not be opened (bad path, unsupported codec, zero dimensions).
    #[error("failed to open {}: {reason}", path.display())]
    SourceOpen { path: PathBuf, reason: String },

    /// An operation needed an open source but none is loaded.
    #[error("no source is open")]
    SourceClosed,

    /// A single frame could not be decoded or skipped.
    #[error("decode error: {0}")]
    Decode(String),

    /// Too many consecutive decode failures; the stream was abandoned.
    #[error("stream failed after {failures} consecutive decode errors")]
    Stream { failures: u32 },

    /// Resize or composition failed while fitting a frame to the canvas.
    #[error("transform error: {0}")]
    Transform(String),

    /// Playback speed must be a finite positive multiplier.
    #[error("invalid playback speed {0}")]
    InvalidSpeed(f64),

    /// A control command could not be parsed.
    #[error("invalid command: {0}")]
    Command(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn open(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::SourceOpen {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
