//! Live session contract.
//!
//! The driver only talks to these traits. [`gemini`] implements them
//! over a WebSocket; tests use an in-memory recording session.

pub mod gemini;

use async_trait::async_trait;
use thiserror::Error;

use crate::screen::FramePayload;

/// Opaque session configuration, merged into the setup message by the transport.
pub type SessionConfig = serde_json::Value;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to encode or decode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session is closed")]
    Closed,

    #[error("server closed the connection before acknowledging setup")]
    SetupNotAcknowledged,

    #[error("server returned error: {0}")]
    Server(String),

    #[error("invalid session configuration: {0}")]
    Config(String),
}

/// One part of a conversational turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Media(FramePayload),
}

/// One inbound message of the current server turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMessage {
    pub text: Option<String>,
    /// Set on the last message of a turn.
    pub turn_complete: bool,
}

#[cfg(test)]
impl ServerMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            turn_complete: false,
        }
    }

    pub fn turn_complete() -> Self {
        Self {
            text: None,
            turn_complete: true,
        }
    }
}

/// An open bidirectional session.
///
/// Send and receive may be called concurrently from different tasks;
/// implementations serialize each direction on their own.
#[async_trait]
pub trait LiveSession: Send + Sync {
    async fn send_text(&self, text: &str, end_of_turn: bool) -> Result<(), TransportError>;

    async fn send_realtime_media(&self, payload: &FramePayload) -> Result<(), TransportError>;

    async fn send_conversation_turn(
        &self,
        parts: Vec<ContentPart>,
        turn_complete: bool,
    ) -> Result<(), TransportError>;

    /// Next inbound message, or `None` once the session has ended.
    async fn next_message(&self) -> Result<Option<ServerMessage>, TransportError>;

    /// Idempotent. Safe to call after a failure and never fails.
    async fn close(&self);
}

#[async_trait]
pub trait LiveTransport: Send + Sync {
    async fn open(
        &self,
        model: &str,
        config: &SessionConfig,
    ) -> Result<Box<dyn LiveSession>, TransportError>;
}
