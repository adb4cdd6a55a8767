//! How instructions and frames are framed on the session.

use clap::ValueEnum;
use std::fmt;

use crate::live::{ContentPart, LiveSession, TransportError};
use crate::screen::FramePayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Protocol {
    /// Continuous media input; the server decides where turns end.
    #[default]
    Realtime,
    /// One explicit conversational turn per frame.
    Sequential,
}

impl Protocol {
    pub async fn send_instruction(
        self,
        session: &dyn LiveSession,
        text: &str,
    ) -> Result<(), TransportError> {
        match self {
            Protocol::Realtime => session.send_text(text, false).await,
            Protocol::Sequential => {
                session
                    .send_conversation_turn(vec![ContentPart::Text(text.to_string())], false)
                    .await
            }
        }
    }

    pub async fn send_payload(
        self,
        session: &dyn LiveSession,
        payload: &FramePayload,
    ) -> Result<(), TransportError> {
        match self {
            Protocol::Realtime => session.send_realtime_media(payload).await,
            Protocol::Sequential => {
                session
                    .send_conversation_turn(vec![ContentPart::Media(payload.clone())], true)
                    .await
            }
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Realtime => f.write_str("realtime"),
            Protocol::Sequential => f.write_str("sequential"),
        }
    }
}
