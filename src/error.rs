//! Error types for the capture pipeline and the session driver.

use std::path::PathBuf;

use thiserror::Error;

use crate::live::TransportError;

pub type StreamResult<T> = std::result::Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    // ── Configuration ────────────────────────────────────────────
    /// A capture setting is outside its valid range.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The capture mode is unknown or was not compiled in.
    #[error("unsupported capture mode: {0}")]
    UnsupportedMode(String),

    // ── Device ───────────────────────────────────────────────────
    #[error("failed to open {device}: {reason}")]
    DeviceOpen { device: String, reason: String },

    #[error("monitor index {index} is out of range ({available} monitors available)")]
    InvalidMonitorIndex { index: usize, available: usize },

    /// The device was open but a read failed in a way that is not end-of-stream.
    #[error("capture failed: {0}")]
    Capture(String),

    /// Frames were requested from a source that is not open.
    #[error("frame source is {0}")]
    SourceLifecycle(&'static str),

    // ── Encoding ─────────────────────────────────────────────────
    #[error("invalid frame shape: {0}")]
    InvalidFrameShape(String),

    #[error("failed to encode frame: {0}")]
    Encode(String),

    // ── Session ──────────────────────────────────────────────────
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to write response text: {0}")]
    Output(std::io::Error),

    // ── Frame dump ───────────────────────────────────────────────
    #[error("frame dump directory does not exist: {}", .0.display())]
    DumpDirMissing(PathBuf),

    /// A blocking worker panicked or was torn down under us.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl From<image::ImageError> for StreamError {
    fn from(e: image::ImageError) -> Self {
        StreamError::Encode(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StreamError {
    fn from(e: tokio::task::JoinError) -> Self {
        StreamError::Worker(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_carry_context() {
        let e = StreamError::InvalidMonitorIndex {
            index: 7,
            available: 2,
        };
        assert!(e.to_string().contains('7'));
        assert!(e.to_string().contains('2'));

        let e = StreamError::DumpDirMissing(PathBuf::from("/nowhere/frames"));
        assert!(e.to_string().contains("/nowhere/frames"));
    }

    #[test]
    fn transport_errors_convert() {
        let e: StreamError = TransportError::Closed.into();
        assert!(matches!(e, StreamError::Transport(TransportError::Closed)));
    }
}
