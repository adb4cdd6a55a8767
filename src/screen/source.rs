//! Throttled, encoded frame sources.
//!
//! Each capture backend only knows how to open a device, read one raw
//! frame and close it. [`ThrottledSource`] adds everything else once:
//! lifecycle checks, a dedicated device thread (capture handles such as
//! `scrap::Capturer` are not `Send`), JPEG encoding on the blocking pool,
//! and the fixed delay after every yielded payload.

use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::capture::ScreenBackend;
use super::{codec, CaptureMode, CaptureSpec, FramePayload, RawFrame};
use crate::error::{StreamError, StreamResult};

/// A lazily produced, throttled sequence of payloads with an explicit
/// open/close lifecycle.
#[async_trait]
pub trait FrameSource: Send {
    async fn open(&mut self) -> StreamResult<()>;

    /// Next payload, or `None` once the device has no more frames.
    /// Fails with [`StreamError::SourceLifecycle`] unless the source is open.
    async fn next_payload(&mut self) -> StreamResult<Option<FramePayload>>;

    /// Releases the device. Idempotent.
    async fn close(&mut self);

    fn describe(&self) -> String;
}

/// Adapts a source into a `Stream`; the stream ends after the first error.
pub fn payloads<'a>(
    source: &'a mut (dyn FrameSource + 'a),
) -> impl Stream<Item = StreamResult<FramePayload>> + Send + 'a {
    stream::unfold(Some(source), |source| async move {
        let source = source?;
        match source.next_payload().await {
            Ok(Some(payload)) => Some((Ok(payload), Some(source))),
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
}

/// Opens a capture device. Runs on the device thread.
pub trait CaptureBackend: Send + 'static {
    type Device: CaptureDevice;

    fn name(&self) -> String;

    fn open(self) -> StreamResult<Self::Device>;
}

/// An open capture device, owned by its thread for its whole life.
pub trait CaptureDevice {
    /// One frame, or `None` when the device has nothing more to give.
    fn read_frame(&mut self) -> StreamResult<Option<RawFrame>>;

    fn close(self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Unopened,
    Open,
    Closed,
}

impl SourceState {
    fn describe(self) -> &'static str {
        match self {
            SourceState::Unopened => "not open yet",
            SourceState::Open => "already open",
            SourceState::Closed => "closed",
        }
    }
}

pub struct ThrottledSource<B: CaptureBackend> {
    name: String,
    backend: Option<B>,
    worker: Option<DeviceWorker>,
    state: SourceState,
    interval: Duration,
    max_dimension: u32,
    jpeg_quality: u8,
    /// A payload went out, so the next read waits one interval first.
    yielded: bool,
    exhausted: bool,
}

impl<B: CaptureBackend> ThrottledSource<B> {
    pub fn from_spec(backend: B, spec: &CaptureSpec) -> StreamResult<Self> {
        spec.validate()?;
        Ok(Self {
            name: backend.name(),
            backend: Some(backend),
            worker: None,
            state: SourceState::Unopened,
            interval: Duration::from_secs_f64(1.0 / spec.fps),
            max_dimension: spec.max_dimension,
            jpeg_quality: spec.jpeg_quality,
            yielded: false,
            exhausted: false,
        })
    }
}

#[async_trait]
impl<B: CaptureBackend> FrameSource for ThrottledSource<B> {
    async fn open(&mut self) -> StreamResult<()> {
        if self.state != SourceState::Unopened {
            return Err(StreamError::SourceLifecycle(self.state.describe()));
        }
        let backend = self
            .backend
            .take()
            .ok_or(StreamError::SourceLifecycle("missing its backend"))?;

        // Closed until the device is up, so a failed or cancelled open
        // can never be retried against a half-built worker.
        self.state = SourceState::Closed;
        self.worker = Some(DeviceWorker::start(backend).await?);
        self.state = SourceState::Open;
        info!(source = %self.name, "capture device open");
        Ok(())
    }

    async fn next_payload(&mut self) -> StreamResult<Option<FramePayload>> {
        if self.state != SourceState::Open {
            return Err(StreamError::SourceLifecycle(self.state.describe()));
        }
        if self.exhausted {
            return Ok(None);
        }
        if self.yielded {
            tokio::time::sleep(self.interval).await;
        }

        let worker = self
            .worker
            .as_ref()
            .ok_or(StreamError::SourceLifecycle("missing its device"))?;
        let Some(frame) = worker.read().await? else {
            debug!(source = %self.name, "device reported no more frames; stopping capture");
            self.exhausted = true;
            return Ok(None);
        };

        let (max_dimension, quality) = (self.max_dimension, self.jpeg_quality);
        let payload =
            tokio::task::spawn_blocking(move || codec::encode(&frame, max_dimension, quality))
                .await??;

        self.yielded = true;
        Ok(Some(payload))
    }

    async fn close(&mut self) {
        self.state = SourceState::Closed;
        self.backend = None;
        if let Some(worker) = self.worker.take() {
            worker.release().await;
            info!(source = %self.name, "capture device released");
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

// ── Device thread ────────────────────────────────────────────────

type ReadReply = oneshot::Sender<StreamResult<Option<RawFrame>>>;

/// Handle to the thread that owns an open device.
///
/// Dropping the handle (or calling [`release`](Self::release)) hangs up
/// the request channel; the thread then closes the device and exits.
struct DeviceWorker {
    requests: std_mpsc::Sender<ReadReply>,
    released: oneshot::Receiver<()>,
}

impl DeviceWorker {
    async fn start<B: CaptureBackend>(backend: B) -> StreamResult<Self> {
        let name = backend.name();
        let (opened_tx, opened_rx) = oneshot::channel();
        let (requests, request_rx) = std_mpsc::channel::<ReadReply>();
        let (released_tx, released) = oneshot::channel();

        std::thread::Builder::new()
            .name(format!("capture-{name}"))
            .spawn(move || {
                let mut device = match backend.open() {
                    Ok(device) => device,
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };
                let _ = opened_tx.send(Ok(()));

                while let Ok(reply) = request_rx.recv() {
                    // The reader gave up before the grab started.
                    if reply.is_closed() {
                        continue;
                    }
                    let _ = reply.send(device.read_frame());
                }

                device.close();
                let _ = released_tx.send(());
            })
            .map_err(|e| StreamError::Worker(format!("failed to spawn capture thread: {e}")))?;

        opened_rx
            .await
            .map_err(|_| StreamError::Worker(format!("capture thread for {name} exited during open")))??;

        Ok(Self { requests, released })
    }

    async fn read(&self) -> StreamResult<Option<RawFrame>> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(reply)
            .map_err(|_| StreamError::Worker("capture thread stopped".into()))?;
        response
            .await
            .map_err(|_| StreamError::Worker("capture thread dropped a read".into()))?
    }

    /// Hang up and wait until the device is closed.
    async fn release(self) {
        let Self { requests, released } = self;
        drop(requests);
        let _ = released.await;
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub fn create_frame_source(spec: &CaptureSpec) -> StreamResult<Box<dyn FrameSource>> {
    spec.validate()?;
    match spec.mode {
        CaptureMode::Screen => Ok(Box::new(ThrottledSource::from_spec(
            ScreenBackend::new(spec.monitor_index),
            spec,
        )?)),
        #[cfg(feature = "camera")]
        CaptureMode::Camera => Ok(Box::new(ThrottledSource::from_spec(
            super::camera::CameraBackend::new(spec.camera_index),
            spec,
        )?)),
        #[cfg(not(feature = "camera"))]
        CaptureMode::Camera => Err(StreamError::UnsupportedMode(
            "camera (built without the `camera` feature)".into(),
        )),
    }
}
