//! NDJSON decoding of the chat response body.
//!
//! Ollama streams one JSON object per line:
//! ```text
//! {"model":"qwen2.5-coder:1.5b","message":{"role":"assistant","content":"Hel"},"done":false}
//! {"model":"qwen2.5-coder:1.5b","message":{"role":"assistant","content":"lo"},"done":false}
//! {"model":"qwen2.5-coder:1.5b","message":{"role":"assistant","content":""},"done":true}
//! ```
//!
//! Transport chunks are not aligned to lines, so the decoder keeps the
//! incomplete tail of each chunk and prepends it to the next one. The carry
//! is kept as bytes, which also reassembles UTF-8 characters split across
//! chunks.

use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};

use crate::error::DecodeError;

/// One decoded line of the response stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamRecord {
    /// `message.content`, when the line carried one.
    pub content: Option<String>,
    /// `done: true` marks the terminal record.
    pub done: bool,
}

impl StreamRecord {
    pub fn fragment(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// Incremental line splitter and parser.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    carry: Vec<u8>,
    skipped: usize,
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk and return every record it completes.
    ///
    /// Lines that fail to decode are logged and skipped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamRecord> {
        self.carry.extend_from_slice(chunk);

        let mut records = Vec::new();
        while let Some(newline_pos) = self.carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.carry.drain(..=newline_pos).collect();
            if let Some(record) = self.decode_or_skip(&line[..newline_pos]) {
                records.push(record);
            }
        }
        records
    }

    /// Decode whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<StreamRecord> {
        if self.carry.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.carry);
        self.decode_or_skip(&rest)
    }

    /// Number of lines dropped because they could not be decoded.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Bytes held back waiting for a newline.
    pub fn pending_bytes(&self) -> usize {
        self.carry.len()
    }

    fn decode_or_skip(&mut self, line: &[u8]) -> Option<StreamRecord> {
        match decode_line(line) {
            Ok(record) => record,
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, "skipping undecodable stream line");
                None
            }
        }
    }
}

/// Parse one line. Blank lines yield `Ok(None)`.
pub fn decode_line(line: &[u8]) -> Result<Option<StreamRecord>, DecodeError> {
    let text = std::str::from_utf8(line)?;
    let text = text.trim_end_matches('\r');
    if text.trim().is_empty() {
        return Ok(None);
    }

    let json: serde_json::Value =
        serde_json::from_str(text).map_err(|source| DecodeError::Json {
            line: text.to_string(),
            source,
        })?;

    if let Some(err) = json["error"].as_str() {
        tracing::warn!(error = err, "backend reported an error mid-stream");
    }

    let content = json["message"]["content"].as_str().map(str::to_string);
    if content.is_none() {
        tracing::debug!(line = text, "stream record has no message.content");
    }

    Ok(Some(StreamRecord {
        content,
        done: json["done"].as_bool().unwrap_or(false),
    }))
}

/// Turn a stream of body chunks into a lazy stream of records.
///
/// A transport error is passed through once and ends the stream. A trailing
/// line without a newline is decoded when the chunk stream ends.
pub fn decode_stream<S, E>(chunks: S) -> impl Stream<Item = Result<StreamRecord, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    struct State<S> {
        chunks: S,
        decoder: ChunkDecoder,
        ready: VecDeque<StreamRecord>,
        ended: bool,
    }

    let state = State {
        chunks,
        decoder: ChunkDecoder::new(),
        ready: VecDeque::new(),
        ended: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(record) = st.ready.pop_front() {
                return Some((Ok(record), st));
            }
            if st.ended {
                return None;
            }
            match st.chunks.next().await {
                Some(Ok(bytes)) => {
                    let records = st.decoder.push(&bytes);
                    st.ready.extend(records);
                }
                Some(Err(e)) => {
                    st.ended = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.ended = true;
                    if let Some(record) = st.decoder.finish() {
                        st.ready.push_back(record);
                    }
                }
            }
        }
    })
}
