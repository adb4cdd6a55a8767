//! Webcam capture via `nokhwa`. Only built with the `camera` feature.

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use tracing::{debug, warn};

use super::source::{CaptureBackend, CaptureDevice};
use super::{ChannelOrder, RawFrame};
use crate::error::{StreamError, StreamResult};

pub struct CameraBackend {
    index: u32,
}

impl CameraBackend {
    pub fn new(index: u32) -> Self {
        Self { index }
    }
}

impl CaptureBackend for CameraBackend {
    type Device = CameraDevice;

    fn name(&self) -> String {
        format!("camera {}", self.index)
    }

    fn open(self) -> StreamResult<CameraDevice> {
        let open_error = |reason: String| StreamError::DeviceOpen {
            device: self.name(),
            reason,
        };

        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = Camera::new(CameraIndex::Index(self.index), requested)
            .map_err(|e| open_error(e.to_string()))?;

        if let Err(e) = camera.open_stream() {
            // Release whatever the driver handed out before giving up.
            let _ = camera.stop_stream();
            return Err(open_error(e.to_string()));
        }

        let resolution = camera.resolution();
        debug!(
            index = self.index,
            width = resolution.width(),
            height = resolution.height(),
            "camera stream open"
        );
        Ok(CameraDevice { camera })
    }
}

pub struct CameraDevice {
    camera: Camera,
}

impl CaptureDevice for CameraDevice {
    /// A failed read is treated as the camera going away: the stream ends.
    fn read_frame(&mut self) -> StreamResult<Option<RawFrame>> {
        let buffer = match self.camera.frame() {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(error = %e, "camera read failed; ending capture");
                return Ok(None);
            }
        };
        let image = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| StreamError::Capture(format!("camera frame could not be decoded: {e}")))?;

        let (width, height) = (image.width(), image.height());
        Ok(Some(RawFrame::packed(
            width,
            height,
            3,
            ChannelOrder::Rgb,
            image.into_raw(),
        )))
    }

    fn close(mut self) {
        if let Err(e) = self.camera.stop_stream() {
            warn!(error = %e, "failed to stop camera stream");
        }
    }
}
