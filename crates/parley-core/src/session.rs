//! One conversation, driven one turn at a time.
//!
//! A turn moves `Idle → AwaitingResponse → Streaming → Completed | Failed`
//! and the session is back to `Idle` when [`ChatSession::ask`] returns.
//! Every path through a turn leaves the log ending in the user message
//! followed by at most one assistant message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::backend::ChatBackend;
use crate::conversation::{ChatMessage, ConversationLog};
use crate::decoder::decode_stream;
use crate::display::{DisplayMessage, DisplaySink, TurnEnd};
use crate::error::{SessionError, TransportError};
use crate::flush::{render_snapshot, FlushMode, FlushPolicy, TurnBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingResponse,
    Streaming,
    Completed,
    Failed,
}

impl TurnState {
    pub fn in_flight(&self) -> bool {
        matches!(self, TurnState::AwaitingResponse | TurnState::Streaming)
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// `Completed` or `Failed`.
    pub state: TurnState,
    /// The assistant message appended to the log, if any.
    pub reply: Option<String>,
    /// The turn was stopped through its cancellation token.
    pub cancelled: bool,
    /// At least one body chunk arrived, decodable or not.
    pub streamed: bool,
}

pub struct ChatSession<B> {
    backend: B,
    log: ConversationLog,
    policy: FlushPolicy,
    state: TurnState,
}

impl<B: ChatBackend> ChatSession<B> {
    pub fn new(backend: B, policy: FlushPolicy) -> Self {
        Self::with_log(backend, ConversationLog::new(), policy)
    }

    pub fn with_log(backend: B, log: ConversationLog, policy: FlushPolicy) -> Self {
        Self {
            backend,
            log,
            policy,
            state: TurnState::Idle,
        }
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Back to a lone system message. Refused while a reply is streaming.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        if self.state.in_flight() {
            return Err(SessionError::Busy);
        }
        self.log.reset();
        tracing::info!("conversation reset");
        Ok(())
    }

    /// Run one turn: send `text` with the whole history and stream the
    /// reply into `sink`.
    ///
    /// Transport failures do not come back as `Err`; they end up in the log
    /// as an `Error: ...` assistant message and in the outcome as
    /// [`TurnState::Failed`]. Cancelling `cancel` stops reading, releases the
    /// connection and keeps whatever reply arrived so far.
    pub async fn ask<S>(
        &mut self,
        text: &str,
        sink: &mut S,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError>
    where
        S: DisplaySink + Send,
    {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        if self.state.in_flight() {
            return Err(SessionError::Busy);
        }

        let Self {
            backend,
            log,
            policy,
            state,
        } = self;
        let mut state = StateGuard(state);

        log.push(ChatMessage::user(text));
        state.set(TurnState::AwaitingResponse);

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            opened = backend.open_chat_stream(log.messages()) => Some(opened),
        };

        let body = match opened {
            None => {
                tracing::info!("turn cancelled before the backend answered");
                sink.emit(DisplayMessage::TurnFinished {
                    state: TurnEnd::Completed,
                });
                return Ok(TurnOutcome {
                    state: TurnState::Completed,
                    reply: None,
                    cancelled: true,
                    streamed: false,
                });
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "chat request failed");
                let outcome = fail_turn(log, policy.mode, String::new(), &e, sink);
                state.set(TurnState::Failed);
                return Ok(outcome);
            }
            Some(Ok(body)) => body,
        };

        let arrived = Arc::new(AtomicBool::new(false));
        let body = {
            let arrived = arrived.clone();
            body.inspect(move |_| arrived.store(true, Ordering::Relaxed))
        };

        let mut turn = TurnBuffer::new(*policy);
        let mut failure: Option<TransportError> = None;
        let mut cancelled = false;
        {
            let records = decode_stream(body);
            let mut records = std::pin::pin!(records);

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    next = records.next() => next,
                };

                if state.get() == TurnState::AwaitingResponse && arrived.load(Ordering::Relaxed) {
                    state.set(TurnState::Streaming);
                }

                match next {
                    Some(Ok(record)) => {
                        if let Some(payload) = turn.on_record(&record, log) {
                            sink.emit(DisplayMessage::ai_response(payload));
                        }
                    }
                    Some(Err(e)) => {
                        failure = Some(e);
                        break;
                    }
                    None => break,
                }
            }
            // the response body is dropped here on every path
        }

        if let Some(payload) = turn.on_end(log) {
            sink.emit(DisplayMessage::ai_response(payload));
        }
        if !turn.saw_final() && failure.is_none() && !cancelled {
            tracing::debug!("stream ended without a done record");
        }

        let reply = turn.into_reply();
        let streamed = arrived.load(Ordering::Relaxed);

        if let Some(e) = failure {
            tracing::warn!(error = %e, "chat stream broke");
            let mut outcome = fail_turn(log, policy.mode, reply, &e, sink);
            outcome.streamed = streamed;
            state.set(TurnState::Failed);
            return Ok(outcome);
        }

        let content = reply.trim().to_string();
        let committed = if cancelled && content.is_empty() {
            None
        } else {
            log.push(ChatMessage::assistant(content.clone()));
            Some(content)
        };

        state.set(TurnState::Completed);
        tracing::info!(
            cancelled,
            reply_len = committed.as_ref().map_or(0, String::len),
            "turn completed"
        );
        sink.emit(DisplayMessage::TurnFinished {
            state: TurnEnd::Completed,
        });

        Ok(TurnOutcome {
            state: TurnState::Completed,
            reply: committed,
            cancelled,
            streamed,
        })
    }
}

/// Commit the error message for a failed turn and tell the display.
fn fail_turn<S: DisplaySink>(
    log: &mut ConversationLog,
    mode: FlushMode,
    partial: String,
    error: &TransportError,
    sink: &mut S,
) -> TurnOutcome {
    let detail = error.display_detail();
    let suffix = if partial.is_empty() {
        format!("Error: {detail}")
    } else {
        format!("\n\nError: {detail}")
    };
    let content = format!("{partial}{suffix}");
    log.push(ChatMessage::assistant(content.clone()));

    let payload = match mode {
        FlushMode::DeltaOnly => suffix,
        FlushMode::FullReplySnapshot => content.clone(),
        FlushMode::FullLogSnapshot => render_snapshot(log.visible(), None),
    };
    sink.emit(DisplayMessage::ai_response(payload));
    sink.emit(DisplayMessage::TurnFinished {
        state: TurnEnd::Failed,
    });

    TurnOutcome {
        state: TurnState::Failed,
        reply: Some(content),
        cancelled: false,
        streamed: false,
    }
}

/// Puts the session back to `Idle` however the turn exits, including the
/// `ask` future being dropped mid-stream.
struct StateGuard<'a>(&'a mut TurnState);

impl StateGuard<'_> {
    fn get(&self) -> TurnState {
        *self.0
    }

    fn set(&mut self, next: TurnState) {
        tracing::debug!(from = ?*self.0, to = ?next, "turn state");
        *self.0 = next;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.0 = TurnState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use futures_util::stream;

    use super::*;
    use crate::backend::ChunkStream;
    use crate::conversation::ChatRole;

    /// Backend that replays canned chunks and records what it was sent.
    #[derive(Clone, Default)]
    struct Scripted {
        chunks: Vec<Result<&'static str, &'static str>>,
        refuse: Option<u16>,
        hang: bool,
        seen: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    }

    impl Scripted {
        fn replying(chunks: &[&'static str]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| Ok(*c)).collect(),
                ..Default::default()
            }
        }
    }

    impl ChatBackend for Scripted {
        async fn open_chat_stream(
            &self,
            messages: &[ChatMessage],
        ) -> Result<ChunkStream, TransportError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            if let Some(status) = self.refuse {
                return Err(TransportError::Status {
                    status,
                    body: String::new(),
                });
            }
            let items: Vec<Result<Bytes, TransportError>> = self
                .chunks
                .iter()
                .map(|c| match c {
                    Ok(text) => Ok(Bytes::from_static(text.as_bytes())),
                    Err(msg) => Err(TransportError::Read(msg.to_string())),
                })
                .collect();
            let body = stream::iter(items);
            if self.hang {
                Ok(Box::pin(body.chain(stream::pending())))
            } else {
                Ok(Box::pin(body))
            }
        }
    }

    fn texts(sink: &[DisplayMessage]) -> Vec<String> {
        sink.iter()
            .filter_map(|m| match m {
                DisplayMessage::AiResponse { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    const HELLO: &[&str] = &[
        "{\"message\":{\"content\":\"Hel\"}}\n",
        "{\"message\":{\"content\":\"lo\"}}\n",
        "{\"done\":true}\n",
    ];

    #[tokio::test]
    async fn test_hello_scenario() {
        let mut session = ChatSession::new(Scripted::replying(HELLO), FlushPolicy::default());
        let mut sink = Vec::new();

        let outcome = session
            .ask("hi", &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(texts(&sink), vec!["Hel", "lo", ""]);
        assert_eq!(
            sink.last(),
            Some(&DisplayMessage::TurnFinished {
                state: TurnEnd::Completed
            })
        );
        assert_eq!(outcome.state, TurnState::Completed);
        assert_eq!(outcome.reply.as_deref(), Some("Hello"));
        assert_eq!(session.state(), TurnState::Idle);

        let log = session.log().messages();
        assert_eq!(log.len(), 3);
        assert_eq!(log[1], ChatMessage::user("hi"));
        assert_eq!(log[2], ChatMessage::assistant("Hello"));
    }

    #[tokio::test]
    async fn test_whole_log_is_sent_each_turn() {
        let backend = Scripted::replying(HELLO);
        let seen = backend.seen.clone();
        let mut session = ChatSession::new(backend, FlushPolicy::default());
        let cancel = CancellationToken::new();

        session.ask("one", &mut Vec::<DisplayMessage>::new(), &cancel).await.unwrap();
        session.ask("two", &mut Vec::<DisplayMessage>::new(), &cancel).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].len(), 2);
        assert_eq!(seen[1].len(), 4);
        assert_eq!(seen[1][0].role, ChatRole::System);
        assert_eq!(seen[1][2], ChatMessage::assistant("Hello"));
        assert_eq!(seen[1][3], ChatMessage::user("two"));
    }

    #[tokio::test]
    async fn test_split_record_is_not_lost() {
        let backend = Scripted::replying(&[
            "{\"message\":{\"content\":\"Hel",
            "lo\"}}\n{\"done\":true}\n",
        ]);
        let mut session = ChatSession::new(backend, FlushPolicy::default());
        let mut sink = Vec::new();
        session
            .ask("hi", &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(texts(&sink), vec!["Hello", ""]);
        assert_eq!(session.log().last(), Some(&ChatMessage::assistant("Hello")));
    }

    #[tokio::test]
    async fn test_refused_connection_appends_one_error() {
        let backend = Scripted {
            refuse: Some(500),
            ..Default::default()
        };
        let mut session = ChatSession::new(backend, FlushPolicy::default());
        let mut sink = Vec::new();

        let outcome = session
            .ask("hi", &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.state, TurnState::Failed);
        let log = session.log().messages();
        assert_eq!(log.len(), 3);
        assert_eq!(log[1], ChatMessage::user("hi"));
        assert_eq!(
            log[2],
            ChatMessage::assistant("Error: Server responded with status 500")
        );
        assert_eq!(texts(&sink), vec!["Error: Server responded with status 500"]);
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_conversation_continues_after_failure() {
        let mut session = ChatSession::new(
            Scripted {
                refuse: Some(503),
                ..Default::default()
            },
            FlushPolicy::default(),
        );
        let cancel = CancellationToken::new();
        session.ask("first", &mut Vec::<DisplayMessage>::new(), &cancel).await.unwrap();

        let mut healthy = ChatSession::with_log(
            Scripted::replying(HELLO),
            session.log().clone(),
            FlushPolicy::default(),
        );
        let outcome = healthy.ask("again", &mut Vec::<DisplayMessage>::new(), &cancel).await.unwrap();
        assert_eq!(outcome.state, TurnState::Completed);
        assert_eq!(healthy.log().len(), 5);
    }

    #[tokio::test]
    async fn test_broken_stream_keeps_partial_reply() {
        let backend = Scripted {
            chunks: vec![Ok("{\"message\":{\"content\":\"Par\"}}\n"), Err("connection reset")],
            ..Default::default()
        };
        let mut session = ChatSession::new(backend, FlushPolicy::default());
        let mut sink = Vec::new();

        let outcome = session
            .ask("hi", &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.state, TurnState::Failed);
        assert_eq!(
            session.log().last().unwrap().content,
            "Par\n\nError: stream read error: connection reset"
        );
        assert_eq!(session.log().len(), 3);
        assert_eq!(
            texts(&sink).concat(),
            "Par\n\nError: stream read error: connection reset"
        );
    }

    #[tokio::test]
    async fn test_stream_without_done_is_flushed() {
        let backend = Scripted::replying(&["{\"message\":{\"content\":\"abc\"}}\n"]);
        let policy = FlushPolicy::new(FlushMode::DeltaOnly).min_chars(10);
        let mut session = ChatSession::new(backend, policy);
        let mut sink = Vec::new();

        session
            .ask("hi", &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(texts(&sink), vec!["abc"]);
        assert_eq!(session.log().last(), Some(&ChatMessage::assistant("abc")));
    }

    /// Sink that pulls the plug as soon as any reply text shows up.
    struct CancelOnText {
        cancel: CancellationToken,
        seen: Vec<DisplayMessage>,
    }

    impl DisplaySink for CancelOnText {
        fn emit(&mut self, message: DisplayMessage) {
            if matches!(message, DisplayMessage::AiResponse { .. }) {
                self.cancel.cancel();
            }
            self.seen.push(message);
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_commits_partial() {
        let backend = Scripted {
            chunks: vec![Ok("{\"message\":{\"content\":\"So far \"}}\n")],
            hang: true,
            ..Default::default()
        };
        let mut session = ChatSession::new(backend, FlushPolicy::default());
        let cancel = CancellationToken::new();
        let mut sink = CancelOnText {
            cancel: cancel.clone(),
            seen: Vec::new(),
        };

        let outcome = session.ask("hi", &mut sink, &cancel).await.unwrap();

        assert!(outcome.cancelled);
        assert_eq!(outcome.state, TurnState::Completed);
        assert_eq!(outcome.reply.as_deref(), Some("So far"));
        assert_eq!(texts(&sink.seen), vec!["So far "]);
        assert_eq!(session.log().last(), Some(&ChatMessage::assistant("So far")));
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_before_connect_appends_nothing() {
        let mut session = ChatSession::new(Scripted::replying(HELLO), FlushPolicy::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = session.ask("hi", &mut Vec::<DisplayMessage>::new(), &cancel).await.unwrap();
        assert!(outcome.cancelled);
        assert!(!outcome.streamed);
        assert_eq!(outcome.reply, None);
        assert_eq!(session.log().len(), 2);
    }

    #[tokio::test]
    async fn test_undecodable_body_still_counts_as_streamed() {
        let backend = Scripted::replying(&["<html>not json</html>\n"]);
        let mut session = ChatSession::new(backend, FlushPolicy::default());
        let mut sink = Vec::new();

        let outcome = session
            .ask("hi", &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.streamed);
        assert_eq!(outcome.state, TurnState::Completed);
        assert!(texts(&sink).is_empty());
        assert_eq!(session.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn test_refusal_never_streamed() {
        let backend = Scripted {
            refuse: Some(500),
            ..Default::default()
        };
        let mut session = ChatSession::new(backend, FlushPolicy::default());
        let outcome = session
            .ask("hi", &mut Vec::<DisplayMessage>::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.state, TurnState::Failed);
        assert!(!outcome.streamed);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let mut session = ChatSession::new(Scripted::replying(HELLO), FlushPolicy::default());
        let err = session
            .ask("   ", &mut Vec::<DisplayMessage>::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::EmptyInput);
        assert_eq!(session.log().len(), 1);
    }

    #[tokio::test]
    async fn test_reset_between_turns() {
        let mut session = ChatSession::new(Scripted::replying(HELLO), FlushPolicy::default());
        session
            .ask("hi", &mut Vec::<DisplayMessage>::new(), &CancellationToken::new())
            .await
            .unwrap();
        session.reset().unwrap();
        assert_eq!(session.log().len(), 1);
        assert_eq!(session.log().messages()[0].role, ChatRole::System);
    }

    #[test]
    fn test_reset_refused_while_streaming() {
        let mut session = ChatSession::new(Scripted::default(), FlushPolicy::default());
        session.state = TurnState::Streaming;
        assert_eq!(session.reset(), Err(SessionError::Busy));
    }

    #[tokio::test]
    async fn test_full_log_snapshot_error_payload() {
        let backend = Scripted {
            refuse: Some(404),
            ..Default::default()
        };
        let mut session = ChatSession::new(backend, FlushPolicy::new(FlushMode::FullLogSnapshot));
        let mut sink = Vec::new();
        session
            .ask("hi", &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            texts(&sink),
            vec!["**User:** hi\n\n**AI:** Error: Server responded with status 404"]
        );
    }
}
