//! Gemini Live over WebSocket.
//!
//! Connects, sends the `setup` frame, waits for `setupComplete`, then maps
//! the [`LiveSession`] calls onto `realtimeInput` / `clientContent`
//! messages. Inbound `serverContent` frames become [`ServerMessage`]s.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::{ContentPart, LiveSession, LiveTransport, ServerMessage, SessionConfig, TransportError};
use crate::screen::FramePayload;

/// Public endpoint for Gemini Live sessions.
pub const DEFAULT_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";

/// How long a close frame may take before the connection is just dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct GeminiTransport {
    endpoint: String,
    api_key: Option<String>,
}

impl GeminiTransport {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }

    fn url(&self) -> String {
        match &self.api_key {
            Some(key) => {
                let sep = if self.endpoint.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", self.endpoint, sep, key)
            }
            None => self.endpoint.clone(),
        }
    }
}

#[async_trait]
impl LiveTransport for GeminiTransport {
    async fn open(
        &self,
        model: &str,
        config: &SessionConfig,
    ) -> Result<Box<dyn LiveSession>, TransportError> {
        let setup = setup_message(model, config)?;

        let (ws_stream, _) = connect_async(self.url()).await?;
        let (sink, stream) = ws_stream.split();
        let session = GeminiSession {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        };

        let handshake = async {
            session.send_raw(setup.to_string()).await?;
            session.await_setup_complete().await
        };
        if let Err(e) = handshake.await {
            session.close().await;
            return Err(e);
        }

        info!(model, "live session ready");
        Ok(Box::new(session))
    }
}

/// `{"setup": {...}}` with TEXT responses by default; keys from `config`
/// override the defaults.
fn setup_message(model: &str, config: &SessionConfig) -> Result<Value, TransportError> {
    let mut setup = json!({
        "model": model,
        "generationConfig": { "responseModalities": ["TEXT"] },
    });

    match config {
        Value::Null => {}
        Value::Object(extra) => {
            if let Value::Object(base) = &mut setup {
                for (key, value) in extra {
                    base.insert(key.clone(), value.clone());
                }
            }
        }
        other => {
            return Err(TransportError::Config(format!(
                "expected a JSON object, got {other}"
            )))
        }
    }

    Ok(json!({ "setup": setup }))
}

pub struct GeminiSession {
    sink: Mutex<SplitSink<WsStream, WsMessage>>,
    stream: Mutex<SplitStream<WsStream>>,
    closed: AtomicBool,
}

impl GeminiSession {
    async fn send(&self, message: &ClientMessage<'_>) -> Result<(), TransportError> {
        let payload = serde_json::to_string(message)?;
        self.send_raw(payload).await
    }

    async fn send_raw(&self, payload: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.sink.lock().await.send(WsMessage::Text(payload)).await?;
        Ok(())
    }

    async fn await_setup_complete(&self) -> Result<(), TransportError> {
        let mut stream = self.stream.lock().await;
        while let Some(frame) = stream.next().await {
            let event = match frame? {
                WsMessage::Text(text) => parse_server_frame(text.as_bytes())?,
                WsMessage::Binary(bytes) => parse_server_frame(&bytes)?,
                WsMessage::Close(_) => return Err(TransportError::SetupNotAcknowledged),
                _ => continue,
            };
            match event {
                ServerEvent::SetupComplete => return Ok(()),
                ServerEvent::Error(message) => return Err(TransportError::Server(message)),
                other => debug!(?other, "ignoring message before setupComplete"),
            }
        }
        Err(TransportError::SetupNotAcknowledged)
    }
}

#[async_trait]
impl LiveSession for GeminiSession {
    async fn send_text(&self, text: &str, end_of_turn: bool) -> Result<(), TransportError> {
        let message = if end_of_turn {
            ClientMessage::ClientContent(ClientContent {
                turns: vec![UserTurn::new(vec![WirePart::Text(text)])],
                turn_complete: true,
            })
        } else {
            ClientMessage::RealtimeInput(RealtimeInput {
                text: Some(text),
                ..Default::default()
            })
        };
        self.send(&message).await
    }

    async fn send_realtime_media(&self, payload: &FramePayload) -> Result<(), TransportError> {
        self.send(&ClientMessage::RealtimeInput(RealtimeInput {
            video: Some(payload),
            ..Default::default()
        }))
        .await
    }

    async fn send_conversation_turn(
        &self,
        parts: Vec<ContentPart>,
        turn_complete: bool,
    ) -> Result<(), TransportError> {
        let wire_parts = parts.iter().map(WirePart::from).collect();
        self.send(&ClientMessage::ClientContent(ClientContent {
            turns: vec![UserTurn::new(wire_parts)],
            turn_complete,
        }))
        .await
    }

    async fn next_message(&self) -> Result<Option<ServerMessage>, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let mut stream = self.stream.lock().await;
        while let Some(frame) = stream.next().await {
            let event = match frame? {
                WsMessage::Text(text) => parse_server_frame(text.as_bytes())?,
                WsMessage::Binary(bytes) => parse_server_frame(&bytes)?,
                WsMessage::Close(frame) => {
                    info!(?frame, "server closed the session");
                    self.closed.store(true, Ordering::SeqCst);
                    return Ok(None);
                }
                // tungstenite answers pings on its own
                _ => continue,
            };

            match event {
                ServerEvent::Content(message) => return Ok(Some(message)),
                ServerEvent::GoAway => {
                    info!("server sent goAway; session ending");
                    return Ok(None);
                }
                ServerEvent::Error(message) => return Err(TransportError::Server(message)),
                ServerEvent::ToolCall(names) => warn_tool_call(&names),
                ServerEvent::SetupComplete | ServerEvent::Other => continue,
            }
        }

        self.closed.store(true, Ordering::SeqCst);
        Ok(None)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let closing = async { self.sink.lock().await.close().await };
        match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "close frame not delivered"),
            Err(_) => debug!(timeout = ?CLOSE_TIMEOUT, "close frame timed out; dropping the connection"),
        }
    }
}

// ── Client → server ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
enum ClientMessage<'a> {
    #[serde(rename = "realtimeInput")]
    RealtimeInput(RealtimeInput<'a>),
    #[serde(rename = "clientContent")]
    ClientContent(ClientContent<'a>),
}

#[derive(Debug, Default, Serialize)]
struct RealtimeInput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    video: Option<&'a FramePayload>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContent<'a> {
    turns: Vec<UserTurn<'a>>,
    turn_complete: bool,
}

#[derive(Debug, Serialize)]
struct UserTurn<'a> {
    role: &'static str,
    parts: Vec<WirePart<'a>>,
}

impl<'a> UserTurn<'a> {
    fn new(parts: Vec<WirePart<'a>>) -> Self {
        Self { role: "user", parts }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum WirePart<'a> {
    Text(&'a str),
    InlineData(&'a FramePayload),
}

impl<'a> From<&'a ContentPart> for WirePart<'a> {
    fn from(part: &'a ContentPart) -> Self {
        match part {
            ContentPart::Text(text) => WirePart::Text(text),
            ContentPart::Media(payload) => WirePart::InlineData(payload),
        }
    }
}

// ── Server → client ──────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum ServerEvent {
    SetupComplete,
    Content(ServerMessage),
    GoAway,
    Error(String),
    /// Function names the model asked to call.
    ToolCall(Vec<String>),
    Other,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    setup_complete: Option<Value>,
    server_content: Option<ServerContent>,
    go_away: Option<Value>,
    error: Option<Value>,
    tool_call: Option<ToolCall>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCall {
    #[serde(default)]
    function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Default, Deserialize)]
struct FunctionCall {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    output_transcription: Option<Transcription>,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ModelPart>,
}

#[derive(Debug, Default, Deserialize)]
struct ModelPart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Transcription {
    text: Option<String>,
}

/// Nothing answers tool calls, so a model waiting on one stalls its turn.
fn warn_tool_call(names: &[String]) {
    warn!(
        functions = ?names,
        "model requested a tool call; tool use is not supported and no response will be sent"
    );
}

fn parse_server_frame(raw: &[u8]) -> Result<ServerEvent, TransportError> {
    let frame: ServerFrame = serde_json::from_slice(raw)?;

    if let Some(error) = frame.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| error.to_string());
        return Ok(ServerEvent::Error(message));
    }
    if frame.setup_complete.is_some() {
        return Ok(ServerEvent::SetupComplete);
    }
    if frame.go_away.is_some() {
        return Ok(ServerEvent::GoAway);
    }
    if let Some(call) = frame.tool_call {
        let names = call.function_calls.into_iter().map(|f| f.name).collect();
        return Ok(ServerEvent::ToolCall(names));
    }

    let Some(content) = frame.server_content else {
        return Ok(ServerEvent::Other);
    };

    let mut text: String = content
        .model_turn
        .map(|turn| turn.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        if let Some(transcript) = content.output_transcription.and_then(|t| t.text) {
            text = transcript;
        }
    }

    Ok(ServerEvent::Content(ServerMessage {
        text: (!text.is_empty()).then_some(text),
        turn_complete: content.turn_complete,
    }))
}
