use std::sync::Arc;

use parley_core::{
    CancellationToken, ChatSession, DisplayMessage, FlushMode, OllamaClient, SessionError,
    TurnOutcome,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub type SharedSession = Arc<Mutex<ChatSession<OllamaClient>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEntry {
    User(String),
    Ai(String),
    /// A whole-conversation snapshot rendered by the core.
    Document(String),
}

/// What the chat pane shows, rebuilt from display messages.
///
/// How a payload merges depends on the session's flush mode: deltas are
/// appended to the open reply, reply snapshots replace it, log snapshots
/// replace everything.
#[derive(Debug)]
pub struct ChatView {
    mode: FlushMode,
    entries: Vec<ViewEntry>,
    reply_open: bool,
}

impl ChatView {
    pub fn new(mode: FlushMode) -> Self {
        Self {
            mode,
            entries: Vec::new(),
            reply_open: false,
        }
    }

    pub fn entries(&self) -> &[ViewEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Echo the user's message right away, before any reply arrives.
    pub fn push_user(&mut self, text: &str) {
        self.reply_open = false;
        self.entries.push(ViewEntry::User(text.to_string()));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.reply_open = false;
    }

    pub fn apply(&mut self, message: &DisplayMessage) {
        match message {
            DisplayMessage::AiResponse { text } => self.apply_text(text),
            DisplayMessage::TurnFinished { .. } => self.reply_open = false,
            DisplayMessage::ConversationReset => self.clear(),
            DisplayMessage::Busy => {}
        }
    }

    fn apply_text(&mut self, text: &str) {
        if self.mode == FlushMode::FullLogSnapshot {
            self.entries = vec![ViewEntry::Document(text.to_string())];
            self.reply_open = true;
            return;
        }

        if self.reply_open {
            if let Some(ViewEntry::Ai(current)) = self.entries.last_mut() {
                match self.mode {
                    FlushMode::DeltaOnly => current.push_str(text),
                    _ => *current = text.to_string(),
                }
                return;
            }
        }
        self.entries.push(ViewEntry::Ai(text.to_string()));
        self.reply_open = true;
    }
}

pub struct App {
    pub should_quit: bool,

    // Input box
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Chat pane
    pub view: ChatView,
    pub scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub animation_frame: u8, // 0-2 for ellipsis animation
    pub status: Option<String>,

    // Conversation
    pub session: SharedSession,
    pub model: String,
    pub turn_task: Option<JoinHandle<Result<TurnOutcome, SessionError>>>,
    pub cancel: Option<CancellationToken>,
}

impl App {
    pub fn new(session: ChatSession<OllamaClient>) -> Self {
        let model = session.backend().model().to_string();
        let view = ChatView::new(session.policy().mode);
        Self {
            should_quit: false,
            input: String::new(),
            cursor: 0,
            view,
            scroll: 0,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,
            status: None,
            session: Arc::new(Mutex::new(session)),
            model,
            turn_task: None,
            cancel: None,
        }
    }

    pub fn streaming(&self) -> bool {
        self.turn_task.is_some()
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.streaming() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn on_display(&mut self, message: DisplayMessage) {
        if message == DisplayMessage::Busy {
            self.status = Some("Still answering; press Esc to stop it first".to_string());
        }
        self.view.apply(&message);
        self.scroll_to_bottom();
    }

    /// Collect the turn task once it has finished.
    pub async fn reap_turn(&mut self) {
        let finished = self.turn_task.as_ref().is_some_and(|t| t.is_finished());
        if !finished {
            return;
        }
        let Some(task) = self.turn_task.take() else {
            return;
        };
        self.cancel = None;

        match task.await {
            Ok(Ok(outcome)) => {
                tracing::debug!(?outcome, "turn task finished");
                if outcome.cancelled {
                    self.status = Some("Stopped".to_string());
                }
            }
            Ok(Err(e)) => self.status = Some(e.to_string()),
            Err(e) => {
                tracing::error!(error = %e, "turn task panicked");
                self.status = Some("The request task crashed; see the log".to_string());
            }
        }
        self.scroll_to_bottom();
    }

    pub fn stop_turn(&mut self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }

    /// Scroll chat to bottom so the newest text is visible
    pub fn scroll_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for entry in self.view.entries() {
            let text = match entry {
                ViewEntry::User(t) | ViewEntry::Ai(t) => {
                    total_lines += 1; // Role line ("You:" or "AI:")
                    t
                }
                ViewEntry::Document(t) => t,
            };
            for line in text.lines() {
                let char_count = line.chars().count();
                total_lines = total_lines.saturating_add((char_count / wrap_width + 1) as u16);
            }
            total_lines += 1; // Blank line after message
        }

        if self.streaming() {
            total_lines += 2; // "AI:" + "Thinking..."
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        self.scroll = total_lines.saturating_sub(visible_height);
    }
}
