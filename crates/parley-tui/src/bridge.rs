//! JSON-lines bridge for an editor extension.
//!
//! The extension writes `askQuestion` / `resetConversation` commands to our
//! stdin, one JSON object per line, and reads `aiResponse` and friends from
//! our stdout. A single worker owns the session and takes commands in
//! arrival order. A reset that arrives while a reply is streaming is answered
//! with `busy`; questions that arrive meanwhile wait their turn. When stdin
//! closes the queued questions are still answered; Ctrl+C cancels them.

use std::collections::VecDeque;

use anyhow::Result;
use parley_core::{
    CancellationToken, ChatBackend, ChatSession, DisplayMessage, DisplaySink, SessionError,
    ViewCommand,
};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

pub async fn run<B>(session: ChatSession<B>) -> Result<()>
where
    B: ChatBackend,
{
    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling in-flight turns");
            on_signal.cancel();
        }
    });

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    serve(session, stdin, tokio::io::stdout(), shutdown).await
}

pub async fn serve<B, R, W>(
    session: ChatSession<B>,
    input: R,
    output: W,
    shutdown: CancellationToken,
) -> Result<()>
where
    B: ChatBackend,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (display_tx, display_rx) = mpsc::unbounded_channel();

    let (read, _session, written) = tokio::join!(
        read_commands(input, command_tx, &shutdown),
        run_turns(session, command_rx, display_tx, &shutdown),
        write_messages(display_rx, output),
    );
    read?;
    written?;
    Ok(())
}

/// Parse stdin into commands until EOF or shutdown. Dropping `commands`
/// tells the worker no more input is coming.
async fn read_commands<R>(
    input: R,
    commands: mpsc::UnboundedSender<ViewCommand>,
    shutdown: &CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            tracing::info!("bridge input closed, finishing queued turns");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ViewCommand>(&line) {
            Ok(command) => {
                if commands.send(command).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, line = %line, "ignoring unknown bridge command"),
        }
    }
    Ok(())
}

/// The only owner of the session. Returns it once input is exhausted or
/// shutdown is requested.
async fn run_turns<B>(
    mut session: ChatSession<B>,
    mut commands: mpsc::UnboundedReceiver<ViewCommand>,
    mut sink: mpsc::UnboundedSender<DisplayMessage>,
    shutdown: &CancellationToken,
) -> ChatSession<B>
where
    B: ChatBackend,
{
    let mut queued: VecDeque<String> = VecDeque::new();
    let mut input_open = true;

    loop {
        if shutdown.is_cancelled() {
            if !queued.is_empty() {
                tracing::info!(dropped = queued.len(), "shutdown, dropping queued questions");
            }
            break;
        }

        let command = match queued.pop_front() {
            Some(text) => ViewCommand::AskQuestion { text },
            None if input_open => match commands.recv().await {
                Some(command) => command,
                None => break,
            },
            None => break,
        };

        match command {
            ViewCommand::ResetConversation => {
                let reply = match session.reset() {
                    Ok(()) => DisplayMessage::ConversationReset,
                    Err(_) => DisplayMessage::Busy,
                };
                sink.emit(reply);
            }
            ViewCommand::AskQuestion { text } => {
                let mut side = sink.clone();
                let cancel = shutdown.child_token();
                let turn = session.ask(&text, &mut sink, &cancel);
                tokio::pin!(turn);

                // Keep reading while the reply streams so a reset can be refused
                let result = loop {
                    tokio::select! {
                        biased;
                        result = &mut turn => break result,
                        command = commands.recv(), if input_open => match command {
                            Some(ViewCommand::AskQuestion { text }) => queued.push_back(text),
                            Some(ViewCommand::ResetConversation) => {
                                tracing::debug!("reset refused, a reply is streaming");
                                side.emit(DisplayMessage::Busy);
                            }
                            None => input_open = false,
                        },
                    }
                };

                match result {
                    Ok(outcome) => tracing::debug!(?outcome, "bridge turn done"),
                    Err(SessionError::EmptyInput) => {}
                    Err(e) => tracing::warn!(error = %e, "bridge turn refused"),
                }
            }
        }
    }

    session
}

async fn write_messages<W>(mut rx: mpsc::UnboundedReceiver<DisplayMessage>, mut output: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        output.write_all(&line).await?;
        output.flush().await?;
    }
    Ok(())
}
