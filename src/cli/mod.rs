use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::error::{StreamError, StreamResult};
use crate::live::gemini::{DEFAULT_LIVE_ENDPOINT, DEFAULT_MODEL};
use crate::live::SessionConfig;
use crate::screen::{
    CaptureMode, CaptureSpec, DEFAULT_FPS, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DIMENSION,
};
use crate::streamer::Protocol;

#[derive(Parser, Debug)]
#[command(name = "glance")]
#[command(about = "Stream camera or screen frames to a live multimodal model and print its replies", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Capture source: camera or screen (camera needs a build with `--features camera`)
    #[arg(long, default_value = "screen")]
    pub mode: CaptureMode,

    /// Frames sent per second
    #[arg(long, default_value_t = DEFAULT_FPS, value_parser = parse_fps)]
    pub fps: f64,

    /// Longer edge of sent frames, in pixels
    #[arg(long, default_value_t = DEFAULT_MAX_DIMENSION, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_dimension: u32,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,

    /// Camera device index (camera mode)
    #[arg(long, default_value_t = 0)]
    pub camera_index: u32,

    /// Monitor index, starting at 0 (screen mode)
    #[arg(long, default_value_t = 0)]
    pub monitor_index: usize,

    /// Model to open the session with
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Instruction sent once before the first frame
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// How frames are framed on the session
    #[arg(long, value_enum, default_value_t = Protocol::Realtime)]
    pub protocol: Protocol,

    /// Also write every sent frame as a JPEG into this directory
    #[arg(long)]
    pub dump_dir: Option<PathBuf>,

    /// Empty the dump directory before starting
    #[arg(long, requires = "dump_dir")]
    pub clean_dump_dir: bool,

    /// API key for the live endpoint
    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Live WebSocket endpoint
    #[arg(long, default_value = DEFAULT_LIVE_ENDPOINT)]
    pub endpoint: String,

    /// System instruction for the session
    #[arg(long)]
    pub system_instruction: Option<String>,

    /// JSON file merged into the session setup
    #[arg(long)]
    pub session_config: Option<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn capture_spec(&self) -> StreamResult<CaptureSpec> {
        let spec = CaptureSpec {
            mode: self.mode,
            fps: self.fps,
            max_dimension: self.max_dimension,
            jpeg_quality: self.jpeg_quality,
            camera_index: self.camera_index,
            monitor_index: self.monitor_index,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Session setup overrides: the `--session-config` file, if any, with
    /// `--system-instruction` layered on top.
    pub fn session_config(&self) -> StreamResult<SessionConfig> {
        let mut config = match &self.session_config {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    StreamError::Configuration(format!("cannot read {}: {e}", path.display()))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    StreamError::Configuration(format!("{} is not valid JSON: {e}", path.display()))
                })?
            }
            None => json!({}),
        };

        let Value::Object(fields) = &mut config else {
            return Err(StreamError::Configuration(
                "session config must be a JSON object".into(),
            ));
        };
        if let Some(text) = &self.system_instruction {
            fields.insert(
                "systemInstruction".into(),
                json!({ "parts": [{ "text": text }] }),
            );
        }
        Ok(config)
    }
}

fn parse_fps(s: &str) -> Result<f64, String> {
    let fps: f64 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if fps.is_finite() && fps > 0.0 {
        Ok(fps)
    } else {
        Err("frames per second must be greater than zero".into())
    }
}
