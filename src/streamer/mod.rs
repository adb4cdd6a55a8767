//! Session driver: wires a frame source to a live session.
//!
//! Acquisition order is source, then session; release is the reverse.
//! While streaming, a send loop and a receive loop share the session and
//! run as one group: whichever finishes first cancels the other.

pub mod output;
pub mod protocol;

use futures_util::TryStreamExt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{StreamError, StreamResult};
use crate::live::{LiveSession, LiveTransport, SessionConfig};
use crate::screen::dump::FrameDump;
use crate::screen::source::{payloads, FrameSource};
use output::TextSink;
pub use protocol::Protocol;

pub struct StreamerOptions {
    pub transport: Arc<dyn LiveTransport>,
    pub protocol: Protocol,
    pub model: String,
    pub session_config: SessionConfig,
    /// Sent once before any frame.
    pub instruction: Option<String>,
    /// Every sent frame is also written here. Must already exist.
    pub dump_dir: Option<PathBuf>,
}

/// Where a run is. Each transition is logged at debug level under the
/// `glance::streamer` target; `state()` reports the final one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    SourceOpen,
    SessionOpen,
    Streaming,
    /// Releasing the session and then the source.
    Draining,
    Closed,
    Failed,
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    SourceExhausted,
    SessionEnded,
    Cancelled,
}

pub struct SessionDriver {
    options: StreamerOptions,
    state: DriverState,
}

impl SessionDriver {
    pub fn new(options: StreamerOptions) -> Self {
        Self {
            options,
            state: DriverState::Idle,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    fn set_state(&mut self, next: DriverState) {
        if self.state == next {
            return;
        }
        debug!(from = ?self.state, to = ?next, "driver state");
        self.state = next;
    }

    /// Runs one streaming session to completion.
    ///
    /// Every resource acquired here is released before this returns,
    /// whatever the outcome. Errors are reported only after that.
    pub async fn stream(
        &mut self,
        source: Box<dyn FrameSource>,
        sink: &mut dyn TextSink,
        cancel: &CancellationToken,
    ) -> StreamResult<StreamOutcome> {
        if self.state != DriverState::Idle {
            return Err(StreamError::Configuration(
                "a session driver runs only once".into(),
            ));
        }
        let mut source: Box<dyn FrameSource> = match &self.options.dump_dir {
            Some(dir) => Box::new(FrameDump::new(source, dir.clone())),
            None => source,
        };

        let result = self.acquire_and_stream(source.as_mut(), sink, cancel).await;
        self.set_state(DriverState::Draining);
        source.close().await;

        match &result {
            Ok(outcome) => {
                self.set_state(DriverState::Closed);
                info!(?outcome, "streaming finished");
            }
            Err(e) => {
                self.set_state(DriverState::Failed);
                error!(error = %e, "streaming failed");
            }
        }
        result
    }

    async fn acquire_and_stream(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn TextSink,
        cancel: &CancellationToken,
    ) -> StreamResult<StreamOutcome> {
        debug!(source = %source.describe(), "opening frame source");
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
            opened = source.open() => opened,
        };
        opened.inspect_err(|e| warn!(phase = "open source", error = %e))?;
        self.set_state(DriverState::SourceOpen);

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
            opened = self.options.transport.open(&self.options.model, &self.options.session_config) => opened,
        };
        let session = opened.inspect_err(|e| warn!(phase = "open session", error = %e))?;
        self.set_state(DriverState::SessionOpen);
        info!(model = %self.options.model, protocol = %self.options.protocol, "session open");

        let result = self.run_session(session.as_ref(), source, sink, cancel).await;

        self.set_state(DriverState::Draining);
        session.close().await;
        result
    }

    async fn run_session(
        &mut self,
        session: &dyn LiveSession,
        source: &mut dyn FrameSource,
        sink: &mut dyn TextSink,
        cancel: &CancellationToken,
    ) -> StreamResult<StreamOutcome> {
        let protocol = self.options.protocol;

        if let Some(text) = &self.options.instruction {
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamOutcome::Cancelled),
                sent = protocol.send_instruction(session, text) => sent,
            };
            sent.inspect_err(|e| warn!(phase = "send instruction", error = %e))?;
        }

        self.set_state(DriverState::Streaming);
        let group = LoopGroup::new(cancel);
        let (sent, received) = tokio::join!(
            group.run("send", send_loop(session, source, protocol)),
            group.run("receive", receive_loop(session, sink)),
        );

        match (sent, received) {
            (Some(Err(e)), _) | (_, Some(Err(e))) => Err(e),
            (Some(Ok(())), _) => Ok(StreamOutcome::SourceExhausted),
            (_, Some(Ok(()))) => Ok(StreamOutcome::SessionEnded),
            (None, None) => Ok(StreamOutcome::Cancelled),
        }
    }
}

/// Forwards payloads in capture order until the source runs dry.
async fn send_loop(
    session: &dyn LiveSession,
    source: &mut dyn FrameSource,
    protocol: Protocol,
) -> StreamResult<()> {
    let mut frames = pin!(payloads(source));
    let mut frame = 0u64;
    while let Some(payload) = frames.try_next().await? {
        protocol.send_payload(session, &payload).await?;
        frame += 1;
        debug!(frame, mime = payload.mime_type(), bytes = payload.data().len(), "frame sent");
    }
    info!(frames = frame, "frame source exhausted");
    Ok(())
}

/// Writes response text as it arrives until the server ends the session.
async fn receive_loop(session: &dyn LiveSession, sink: &mut dyn TextSink) -> StreamResult<()> {
    while let Some(message) = session.next_message().await? {
        if let Some(text) = &message.text {
            sink.write_fragment(text).map_err(StreamError::Output)?;
        }
        if message.turn_complete {
            sink.end_turn().map_err(StreamError::Output)?;
        }
    }
    info!("session ended by the server");
    Ok(())
}

/// Two loops sharing one cancellation scope.
///
/// The first loop to finish, for any reason, cancels the scope. A loop
/// interrupted by cancellation reports `None`, so only the result of the
/// loop that actually finished is ever seen.
struct LoopGroup {
    token: CancellationToken,
}

impl LoopGroup {
    fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
        }
    }

    async fn run<F>(&self, name: &'static str, task: F) -> Option<StreamResult<()>>
    where
        F: Future<Output = StreamResult<()>>,
    {
        let result = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!(task = name, "loop cancelled");
                None
            }
            result = task => Some(result),
        };
        if let Some(Err(e)) = &result {
            warn!(phase = "stream", task = name, error = %e, "loop failed");
        }
        self.token.cancel();
        result
    }
}
