pub mod ollama;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;

use crate::conversation::ChatMessage;
use crate::error::TransportError;

pub use ollama::{GenerateOptions, OllamaClient};

/// Raw response body, chunked however the transport delivers it.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Something that can answer a conversation with a streamed body.
///
/// The session only sees byte chunks, so tests can hand it any synthetic
/// sequence without a server.
pub trait ChatBackend {
    /// Start a chat request carrying the whole history.
    ///
    /// Resolves once the response headers are in; the body arrives through
    /// the returned stream. Dropping the stream releases the connection.
    fn open_chat_stream(
        &self,
        messages: &[ChatMessage],
    ) -> impl Future<Output = Result<ChunkStream, TransportError>> + Send;
}
