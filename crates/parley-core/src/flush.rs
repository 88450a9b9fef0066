//! When and what to send to the display while a reply streams in.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::accumulator::Accumulator;
use crate::conversation::{ChatMessage, ChatRole, ConversationLog};
use crate::decoder::StreamRecord;
use crate::error::ConfigError;

/// Shape of each display payload, and so how the consumer merges it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlushMode {
    /// Only the text added since the last flush; the consumer appends.
    #[default]
    DeltaOnly,
    /// The whole conversation plus the reply so far; the consumer replaces
    /// its entire view.
    FullLogSnapshot,
    /// The reply so far; the consumer replaces the current turn only.
    FullReplySnapshot,
}

impl FlushMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushMode::DeltaOnly => "delta-only",
            FlushMode::FullLogSnapshot => "full-log-snapshot",
            FlushMode::FullReplySnapshot => "full-reply-snapshot",
        }
    }

    pub fn all() -> Vec<FlushMode> {
        vec![
            FlushMode::DeltaOnly,
            FlushMode::FullLogSnapshot,
            FlushMode::FullReplySnapshot,
        ]
    }
}

impl FromStr for FlushMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delta-only" | "delta" => Ok(FlushMode::DeltaOnly),
            "full-log-snapshot" | "log" => Ok(FlushMode::FullLogSnapshot),
            "full-reply-snapshot" | "reply" => Ok(FlushMode::FullReplySnapshot),
            _ => Err(ConfigError::UnknownFlushMode(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushPolicy {
    pub mode: FlushMode,
    /// Hold back non-final flushes until this many characters are pending.
    pub min_chars: usize,
}

impl FlushPolicy {
    pub fn new(mode: FlushMode) -> Self {
        Self { mode, min_chars: 0 }
    }

    pub fn min_chars(mut self, min_chars: usize) -> Self {
        self.min_chars = min_chars;
        self
    }
}

/// Accumulation plus flush decisions for a single turn.
#[derive(Debug)]
pub struct TurnBuffer {
    policy: FlushPolicy,
    acc: Accumulator,
    saw_final: bool,
}

impl TurnBuffer {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            acc: Accumulator::new(),
            saw_final: false,
        }
    }

    /// Absorb one record and return the payload to display, if any.
    ///
    /// `log` must already hold the user message for this turn; it is only
    /// read, for log snapshots.
    pub fn on_record(&mut self, record: &StreamRecord, log: &ConversationLog) -> Option<String> {
        if self.saw_final {
            tracing::debug!("ignoring stream record after the final one");
            return None;
        }

        self.acc.push(record.fragment());

        if record.done {
            self.saw_final = true;
            return Some(self.payload(log));
        }

        let pending = self.acc.pending();
        if !pending.is_empty() && pending.chars().count() >= self.policy.min_chars {
            return Some(self.payload(log));
        }
        None
    }

    /// The stream ended; flush anything still held back.
    pub fn on_end(&mut self, log: &ConversationLog) -> Option<String> {
        if self.saw_final || !self.acc.has_pending() {
            return None;
        }
        self.saw_final = true;
        Some(self.payload(log))
    }

    pub fn saw_final(&self) -> bool {
        self.saw_final
    }

    pub fn reply(&self) -> &str {
        self.acc.buffer()
    }

    pub fn into_reply(self) -> String {
        self.acc.finish()
    }

    fn payload(&mut self, log: &ConversationLog) -> String {
        match self.policy.mode {
            FlushMode::DeltaOnly => self.acc.take_pending(),
            FlushMode::FullReplySnapshot => {
                self.acc.mark_flushed();
                self.acc.buffer().to_string()
            }
            FlushMode::FullLogSnapshot => {
                self.acc.mark_flushed();
                render_snapshot(log.visible(), Some(self.acc.buffer()))
            }
        }
    }
}

/// Render messages as the Markdown a snapshot display shows.
pub fn render_snapshot(messages: &[ChatMessage], in_progress: Option<&str>) -> String {
    let mut parts: Vec<String> = messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| format!("**{}:** {}", m.role.label(), m.content))
        .collect();

    if let Some(reply) = in_progress {
        parts.push(format!("**{}:** {}", ChatRole::Assistant.label(), reply));
    }

    parts.join("\n\n")
}
