pub mod accumulator;
pub mod backend;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod decoder;
pub mod display;
pub mod error;
pub mod flush;
pub mod session;

// Re-export main types for convenience
pub use accumulator::Accumulator;
pub use backend::{ChatBackend, ChunkStream, GenerateOptions, OllamaClient};
pub use completion::InlineCompleter;
pub use config::Config;
pub use conversation::{ChatMessage, ChatRole, ConversationLog, DEFAULT_SYSTEM_PROMPT};
pub use decoder::{decode_stream, ChunkDecoder, StreamRecord};
pub use display::{DisplayMessage, DisplaySink, TurnEnd, ViewCommand};
pub use error::{CompletionError, ConfigError, DecodeError, SessionError, TransportError};
pub use flush::{FlushMode, FlushPolicy, TurnBuffer};
pub use session::{ChatSession, TurnOutcome, TurnState};

// Re-exported so front-ends share the same token type.
pub use tokio_util::sync::CancellationToken;
