//! Error types shared across the streaming pipeline.
//!
//! Only [`TransportError`] ever ends a turn. [`DecodeError`] is produced and
//! swallowed inside the decoder, and the session turns transport failures
//! into an `Error: ...` assistant message instead of returning them.

use thiserror::Error;

/// Failure to open or read the backend response stream.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection refused, DNS failure, timeout, unreadable JSON body.
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status.
    #[error("Server responded with status {status}")]
    Status { status: u16, body: String },

    /// The response carried no body to stream.
    #[error("response body stream is absent")]
    MissingBody,

    /// The body stream broke after it started.
    #[error("stream read error: {0}")]
    Read(String),
}

impl TransportError {
    /// Text that goes after `Error: ` in the conversation.
    pub fn display_detail(&self) -> String {
        match self {
            TransportError::Status { body, .. } if !body.trim().is_empty() => {
                format!("{} ({})", self, body.trim())
            }
            _ => self.to_string(),
        }
    }
}

/// A single NDJSON line that could not be turned into a record.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid JSON in stream line {line:?}: {source}")]
    Json {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("stream line is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Reasons a session refuses a command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("a response is still streaming")]
    Busy,

    #[error("message is empty")]
    EmptyInput,
}

/// Failures of the inline suggestion command.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("cursor {line}:{column} is outside the buffer")]
    CursorOutOfRange { line: usize, column: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,

    #[error("config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown flush mode '{0}' (expected delta-only, full-log-snapshot or full-reply-snapshot)")]
    UnknownFlushMode(String),
}
