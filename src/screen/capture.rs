//! Monitor capture via `scrap`.
//!
//! `scrap::Capturer` is not `Send` on X11, so the backend only carries the
//! monitor index; the capturer itself is created on the device thread.

use scrap::{Capturer, Display};
use std::io::ErrorKind;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::source::{CaptureBackend, CaptureDevice};
use super::{ChannelOrder, RawFrame};
use crate::error::{StreamError, StreamResult};

/// Polling interval while the compositor has no new frame for us.
const FRAME_POLL_INTERVAL: Duration = Duration::from_millis(5);
/// Without a new frame for this long the display is taken to be still.
const STILL_AFTER: Duration = Duration::from_secs(2);

pub struct ScreenBackend {
    monitor_index: usize,
}

impl ScreenBackend {
    pub fn new(monitor_index: usize) -> Self {
        Self { monitor_index }
    }
}

impl CaptureBackend for ScreenBackend {
    type Device = ScreenDevice;

    fn name(&self) -> String {
        format!("screen (monitor {})", self.monitor_index)
    }

    fn open(self) -> StreamResult<ScreenDevice> {
        let displays = Display::all().map_err(|e| StreamError::DeviceOpen {
            device: self.name(),
            reason: format!("cannot enumerate displays: {e}"),
        })?;
        let display = select_monitor(displays, self.monitor_index)?;
        let (width, height) = (display.width(), display.height());

        let capturer = Capturer::new(display).map_err(|e| StreamError::DeviceOpen {
            device: self.name(),
            reason: e.to_string(),
        })?;
        debug!(monitor = self.monitor_index, width, height, "screen capturer ready");

        Ok(ScreenDevice {
            capturer,
            width,
            height,
            last: None,
        })
    }
}

/// Picks the 0-based `index` out of the enumerated monitors.
fn select_monitor<D>(displays: Vec<D>, index: usize) -> StreamResult<D> {
    let available = displays.len();
    displays
        .into_iter()
        .nth(index)
        .ok_or(StreamError::InvalidMonitorIndex { index, available })
}

pub struct ScreenDevice {
    capturer: Capturer,
    width: usize,
    height: usize,
    /// Most recent frame, repeated while the display is unchanged.
    last: Option<RawFrame>,
}

impl CaptureDevice for ScreenDevice {
    fn read_frame(&mut self) -> StreamResult<Option<RawFrame>> {
        let (width, height) = (self.width, self.height);
        let capturer = &mut self.capturer;
        let grab = || match capturer.frame() {
            Ok(frame) => bgra_frame(&frame, width, height).map(Some),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => {
                warn!(error = %e, "screen grab failed");
                Err(StreamError::Capture(e.to_string()))
            }
        };
        poll_frame(grab, &mut self.last, STILL_AFTER).map(Some)
    }

    fn close(self) {
        drop(self.capturer);
    }
}

/// Polls `grab` until it yields a frame.
///
/// Some platforms only hand out a frame when the screen changed, so `grab`
/// returning `None` for `still_after` means nothing moved: the last frame
/// is sent again. Before the first frame there is nothing to repeat, and
/// polling simply goes on.
fn poll_frame<G>(
    mut grab: G,
    last: &mut Option<RawFrame>,
    still_after: Duration,
) -> StreamResult<RawFrame>
where
    G: FnMut() -> StreamResult<Option<RawFrame>>,
{
    let mut deadline = Instant::now() + still_after;
    loop {
        if let Some(frame) = grab()? {
            *last = Some(frame.clone());
            return Ok(frame);
        }
        if Instant::now() >= deadline {
            if let Some(frame) = last {
                debug!("display unchanged; repeating the last frame");
                return Ok(frame.clone());
            }
            debug!(waited = ?still_after, "still waiting for the first frame from the display");
            deadline = Instant::now() + still_after;
        }
        std::thread::sleep(FRAME_POLL_INTERVAL);
    }
}

/// Wraps a scrap buffer (BGRA, rows possibly padded) as a raw frame.
fn bgra_frame(buf: &[u8], width: usize, height: usize) -> StreamResult<RawFrame> {
    if height == 0 {
        return Err(StreamError::Capture("display reports zero height".into()));
    }
    Ok(RawFrame {
        width: width as u32,
        height: height as u32,
        channels: 4,
        order: ChannelOrder::Bgr,
        stride: buf.len() / height,
        data: buf.to_vec(),
    })
}
