//! In-memory capture backends, sources, sessions and sinks for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::error::{StreamError, StreamResult};
use crate::live::{ContentPart, LiveSession, LiveTransport, ServerMessage, SessionConfig, TransportError};
use crate::screen::source::{CaptureBackend, CaptureDevice, FrameSource};
use crate::screen::{CaptureSpec, ChannelOrder, FramePayload, RawFrame};
use crate::streamer::output::TextSink;

pub fn spec_with_fps(fps: f64) -> CaptureSpec {
    CaptureSpec {
        fps,
        ..Default::default()
    }
}

pub fn payload(bytes: &[u8]) -> FramePayload {
    FramePayload::from_jpeg(bytes)
}

// ── Capture backend ──────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct BackendCounters {
    pub opened: AtomicUsize,
    pub reads: AtomicUsize,
    pub released: AtomicUsize,
}

/// Produces `frames` small gradient frames, then reports end of data.
pub struct SyntheticBackend {
    frames: usize,
    channels: u8,
    fail_open: bool,
    counters: Arc<BackendCounters>,
}

impl SyntheticBackend {
    pub fn new(frames: usize) -> Self {
        Self {
            frames,
            channels: 4,
            fail_open: false,
            counters: Arc::default(),
        }
    }

    /// Frames with `channels` interleaved samples per pixel.
    pub fn with_channels(frames: usize, channels: u8) -> Self {
        Self {
            channels,
            ..Self::new(frames)
        }
    }

    pub fn failing_open() -> Self {
        Self {
            fail_open: true,
            ..Self::new(0)
        }
    }

    pub fn counters(&self) -> Arc<BackendCounters> {
        self.counters.clone()
    }
}

impl CaptureBackend for SyntheticBackend {
    type Device = SyntheticDevice;

    fn name(&self) -> String {
        "synthetic".into()
    }

    fn open(self) -> StreamResult<SyntheticDevice> {
        if self.fail_open {
            return Err(StreamError::DeviceOpen {
                device: self.name(),
                reason: "no such device".into(),
            });
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(SyntheticDevice {
            remaining: self.frames,
            channels: self.channels,
            counters: self.counters,
        })
    }
}

pub struct SyntheticDevice {
    remaining: usize,
    channels: u8,
    counters: Arc<BackendCounters>,
}

impl CaptureDevice for SyntheticDevice {
    fn read_frame(&mut self) -> StreamResult<Option<RawFrame>> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;

        let (width, height) = (32u32, 24u32);
        let data = (0..width * height * self.channels as u32)
            .map(|i| (i % 256) as u8)
            .collect();
        Ok(Some(RawFrame::packed(width, height, self.channels, ChannelOrder::Bgr, data)))
    }

    fn close(self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Frame source ─────────────────────────────────────────────────

/// Yields a fixed list of payloads without throttling.
pub struct VecSource {
    payloads: VecDeque<FramePayload>,
    open: bool,
    stall_open: bool,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl VecSource {
    pub fn new(payloads: Vec<FramePayload>) -> Self {
        Self {
            payloads: payloads.into(),
            open: false,
            stall_open: false,
            opens: Arc::default(),
            closes: Arc::default(),
        }
    }

    /// A source whose open never completes.
    pub fn stalling_open() -> Self {
        Self {
            stall_open: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn opens(&self) -> Arc<AtomicUsize> {
        self.opens.clone()
    }

    pub fn closes(&self) -> Arc<AtomicUsize> {
        self.closes.clone()
    }
}

#[async_trait]
impl FrameSource for VecSource {
    async fn open(&mut self) -> StreamResult<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.stall_open {
            std::future::pending::<()>().await;
        }
        self.open = true;
        Ok(())
    }

    async fn next_payload(&mut self) -> StreamResult<Option<FramePayload>> {
        if !self.open {
            return Err(StreamError::SourceLifecycle("not open"));
        }
        Ok(self.payloads.pop_front())
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn describe(&self) -> String {
        "vec".into()
    }
}

// ── Session ──────────────────────────────────────────────────────

/// One recorded session call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Text { text: String, end_of_turn: bool },
    RealtimeMedia(FramePayload),
    Turn { parts: Vec<ContentPart>, turn_complete: bool },
    Close,
}

/// Shared view of everything a recording session was asked to do.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl SessionLog {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls except the final close(s).
    pub fn sends(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| *call != Call::Close)
            .collect()
    }

    pub fn closes(&self) -> usize {
        self.calls().iter().filter(|call| **call == Call::Close).count()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub type Inbound = mpsc::UnboundedSender<Result<ServerMessage, TransportError>>;

struct RecordingSession {
    log: SessionLog,
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<ServerMessage, TransportError>>>,
    fail_sends: bool,
    stall_sends: bool,
}

impl RecordingSession {
    async fn record(&self, call: Call) -> Result<(), TransportError> {
        if self.stall_sends {
            std::future::pending::<()>().await;
        }
        if self.fail_sends {
            return Err(TransportError::Server("send rejected".into()));
        }
        self.log.push(call);
        Ok(())
    }
}

#[async_trait]
impl LiveSession for RecordingSession {
    async fn send_text(&self, text: &str, end_of_turn: bool) -> Result<(), TransportError> {
        self.record(Call::Text {
            text: text.to_string(),
            end_of_turn,
        })
        .await
    }

    async fn send_realtime_media(&self, payload: &FramePayload) -> Result<(), TransportError> {
        self.record(Call::RealtimeMedia(payload.clone())).await
    }

    async fn send_conversation_turn(
        &self,
        parts: Vec<ContentPart>,
        turn_complete: bool,
    ) -> Result<(), TransportError> {
        self.record(Call::Turn {
            parts,
            turn_complete,
        })
        .await
    }

    /// Waits for scripted messages; the session ends when every sender is gone.
    async fn next_message(&self) -> Result<Option<ServerMessage>, TransportError> {
        match self.inbound.lock().await.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&self) {
        self.log.push(Call::Close);
    }
}

/// Hands out exactly one recording session.
pub struct RecordingTransport {
    log: SessionLog,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Result<ServerMessage, TransportError>>>>,
    fail_open: bool,
    fail_sends: bool,
    stall_sends: bool,
    opened_model: Mutex<Option<String>>,
}

impl RecordingTransport {
    /// The transport, its call log, and the handle that scripts inbound messages.
    /// Keep the handle alive to keep the session open.
    pub fn new() -> (Self, SessionLog, Inbound) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = SessionLog::default();
        let transport = Self {
            log: log.clone(),
            inbound: Mutex::new(Some(rx)),
            fail_open: false,
            fail_sends: false,
            stall_sends: false,
            opened_model: Mutex::new(None),
        };
        (transport, log, tx)
    }

    pub fn failing_open() -> (Self, SessionLog) {
        let (mut transport, log, _) = Self::new();
        transport.fail_open = true;
        (transport, log)
    }

    pub fn failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    /// Every send waits forever, like a connection that stopped draining.
    pub fn stalling_sends(mut self) -> Self {
        self.stall_sends = true;
        self
    }

    pub fn opened_model(&self) -> Option<String> {
        self.opened_model.lock().unwrap().clone()
    }
}

#[async_trait]
impl LiveTransport for RecordingTransport {
    async fn open(
        &self,
        model: &str,
        _config: &SessionConfig,
    ) -> Result<Box<dyn LiveSession>, TransportError> {
        if self.fail_open {
            return Err(TransportError::SetupNotAcknowledged);
        }
        let inbound = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportError::Config("session already opened".into()))?;
        *self.opened_model.lock().unwrap() = Some(model.to_string());

        Ok(Box::new(RecordingSession {
            log: self.log.clone(),
            inbound: tokio::sync::Mutex::new(inbound),
            fail_sends: self.fail_sends,
            stall_sends: self.stall_sends,
        }))
    }
}

// ── Text sink ────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecordingSink {
    pub output: String,
    pub fail: bool,
}

impl TextSink for RecordingSink {
    fn write_fragment(&mut self, text: &str) -> io::Result<()> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
        }
        self.output.push_str(text);
        Ok(())
    }

    fn end_turn(&mut self) -> io::Result<()> {
        self.write_fragment("\n")
    }
}

// ── Logs ─────────────────────────────────────────────────────────

/// Collects formatted tracing output for assertions.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        let writer = self.clone();
        tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
