//! Messages exchanged with the display surface.
//!
//! Both directions are JSON objects tagged by a `command` field, matching
//! what an editor webview posts and receives.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Outbound: core → display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum DisplayMessage {
    /// One flush of reply text, shaped by the session's flush mode.
    AiResponse { text: String },
    TurnFinished { state: TurnEnd },
    ConversationReset,
    /// A command was refused because a reply is still streaming.
    Busy,
}

impl DisplayMessage {
    pub fn ai_response(text: impl Into<String>) -> Self {
        DisplayMessage::AiResponse { text: text.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnEnd {
    Completed,
    Failed,
}

/// Inbound: display → core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum ViewCommand {
    AskQuestion { text: String },
    ResetConversation,
}

/// Anything that can receive display messages.
pub trait DisplaySink {
    fn emit(&mut self, message: DisplayMessage);
}

impl DisplaySink for Vec<DisplayMessage> {
    fn emit(&mut self, message: DisplayMessage) {
        self.push(message);
    }
}

impl DisplaySink for mpsc::UnboundedSender<DisplayMessage> {
    fn emit(&mut self, message: DisplayMessage) {
        // The receiver going away means the view closed; nothing to do.
        if self.send(message).is_err() {
            tracing::debug!("display channel closed, dropping message");
        }
    }
}
