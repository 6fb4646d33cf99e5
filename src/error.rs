//! Error types for the media pipeline
//!
//! Session-level failures (open, close) are returned to the caller.
//! Per-frame failures (`DecodeTransient`, `Encode`, `Seek`) are logged and
//! counted by the pipeline and never unwind past the owning stage.

use thiserror::Error;

/// Errors produced by codec sessions and the capture path
#[derive(Debug, Error)]
pub enum MediaError {
    /// A file or stream could not be opened, read or written
    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    /// No usable decoder or encoder
    #[error("Failed to open codec: {0}")]
    CodecOpen(String),

    /// The container holds no video stream
    #[error("No video stream found in {0}")]
    StreamNotFound(String),

    /// The demuxer rejected a seek
    #[error("Seek to {target:.3}s rejected: {reason}")]
    Seek { target: f64, reason: String },

    /// A single packet failed to decode
    #[error("Decoding failed: {0}")]
    DecodeTransient(String),

    /// The encoder rejected a frame
    #[error("Encoding failed: {0}")]
    Encode(String),

    /// Raw FFmpeg error
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}

impl MediaError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        MediaError::Io {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the pipeline may continue after this error
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MediaError::Seek { .. } | MediaError::DecodeTransient(_) | MediaError::Encode(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MediaError::StreamNotFound("clip.mov".to_string());
        assert_eq!(err.to_string(), "No video stream found in clip.mov");

        let err = MediaError::Seek {
            target: 2.5,
            reason: "out of range".to_string(),
        };
        assert_eq!(err.to_string(), "Seek to 2.500s rejected: out of range");
    }

    #[test]
    fn test_transient_classification() {
        assert!(MediaError::DecodeTransient("bad packet".into()).is_transient());
        assert!(MediaError::Encode("rejected".into()).is_transient());
        assert!(!MediaError::CodecOpen("none".into()).is_transient());
        assert!(!MediaError::io("/tmp/missing.mov", "not found").is_transient());
    }
}
