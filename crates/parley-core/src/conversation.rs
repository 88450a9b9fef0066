//! Conversation history
//!
//! The log is both what the chat view shows and the literal prompt context
//! sent to the model on every turn, so ordering matters and entries are never
//! edited after they are appended.

use serde::{Deserialize, Serialize};

/// System prompt every new conversation starts with.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI agent.";

/// A chat message in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// The role of a chat message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    /// Label used when a conversation is rendered as Markdown.
    pub fn label(&self) -> &'static str {
        match self {
            ChatRole::System => "System",
            ChatRole::User => "User",
            ChatRole::Assistant => "AI",
        }
    }
}

/// Append-only message history that always starts with one system message.
#[derive(Debug, Clone)]
pub struct ConversationLog {
    system_prompt: String,
    messages: Vec<ChatMessage>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::with_system_prompt(DEFAULT_SYSTEM_PROMPT)
    }

    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let system_prompt = prompt.into();
        Self {
            messages: vec![ChatMessage::system(system_prompt.clone())],
            system_prompt,
        }
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Drop everything except a fresh system message.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.messages
            .push(ChatMessage::system(self.system_prompt.clone()));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Messages after the system prompt, i.e. what a chat view shows.
    pub fn visible(&self) -> &[ChatMessage] {
        &self.messages[1..]
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when nothing but the system prompt is present.
    pub fn is_empty(&self) -> bool {
        self.messages.len() == 1
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new()
    }
}
