pub mod capture;
#[cfg(feature = "camera")]
pub mod camera;
pub mod codec;
pub mod dump;
pub mod source;

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

/// MIME type of every payload the codec produces.
pub const JPEG_MIME_TYPE: &str = "image/jpeg";
/// Extension used for dumped frames.
pub const JPEG_EXTENSION: &str = "jpg";

/// Default capture settings (overridable from the command line).
pub const DEFAULT_FPS: f64 = 1.0;
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// A JPEG frame ready for the session, base64 encoded.
///
/// Serializes to the blob shape the live API expects:
/// `{"mimeType": "image/jpeg", "data": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
    mime_type: String,
    data: String,
}

impl FramePayload {
    /// Wrap already-compressed JPEG bytes.
    pub fn from_jpeg(jpeg: &[u8]) -> Self {
        Self {
            mime_type: JPEG_MIME_TYPE.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(jpeg),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The base64 text carried on the wire.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// The raw JPEG bytes behind the transport encoding.
    pub fn decoded(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(&self.data)
    }
}

/// Byte order of the colour channels in a [`RawFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    /// scrap and most desktop APIs hand out BGR(A).
    Bgr,
}

/// A decoded image as handed over by a capture backend.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub order: ChannelOrder,
    /// Bytes per row; may include padding beyond `width * channels`.
    pub stride: usize,
    pub data: Vec<u8>,
}

impl RawFrame {
    /// Tightly packed frame (no row padding).
    pub fn packed(width: u32, height: u32, channels: u8, order: ChannelOrder, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            channels,
            order,
            stride: width as usize * channels as usize,
            data,
        }
    }
}

/// Which backend produces the frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    Camera,
    Screen,
}

impl FromStr for CaptureMode {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "camera" => Ok(CaptureMode::Camera),
            "screen" => Ok(CaptureMode::Screen),
            other => Err(StreamError::UnsupportedMode(other.to_string())),
        }
    }
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Camera => f.write_str("camera"),
            CaptureMode::Screen => f.write_str("screen"),
        }
    }
}

/// How to build a frame source. Only the selector matching `mode` is used.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSpec {
    pub mode: CaptureMode,
    pub fps: f64,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub camera_index: u32,
    pub monitor_index: usize,
}

impl Default for CaptureSpec {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Screen,
            fps: DEFAULT_FPS,
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            camera_index: 0,
            monitor_index: 0,
        }
    }
}

impl CaptureSpec {
    pub fn validate(&self) -> StreamResult<()> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(StreamError::Configuration(format!(
                "frames per second must be positive, got {}",
                self.fps
            )));
        }
        if self.max_dimension == 0 {
            return Err(StreamError::Configuration(
                "maximum dimension must be positive".into(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(StreamError::Configuration(format!(
                "JPEG quality must be between 1 and 100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}
