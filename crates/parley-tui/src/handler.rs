use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use parley_core::{CancellationToken, DisplayMessage, SessionError};

use crate::app::App;
use crate::tui::{AppEvent, EventSink};

/// Convert a character index to a byte index for UTF-8 safe string operations
fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

pub async fn handle_event(app: &mut App, event: AppEvent, sink: EventSink) -> Result<()> {
    match event {
        AppEvent::Key(key) => handle_key(app, key, sink),
        AppEvent::Resize => app.scroll_to_bottom(),
        AppEvent::Tick => {
            app.tick_animation();
            app.reap_turn().await;
        }
        AppEvent::Display(message) => app.on_display(message),
    }
    Ok(())
}

fn handle_key(app: &mut App, key: KeyEvent, sink: EventSink) {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

    match key.code {
        KeyCode::Char('c') if ctrl => {
            app.stop_turn();
            app.should_quit = true;
        }
        KeyCode::Char('r') if ctrl => reset_conversation(app),
        KeyCode::Esc => {
            if app.streaming() {
                app.stop_turn();
            } else {
                app.status = None;
            }
        }
        KeyCode::Enter => submit(app, sink),
        KeyCode::PageUp => app.scroll = app.scroll.saturating_sub(app.chat_height.max(1)),
        KeyCode::PageDown => app.scroll = app.scroll.saturating_add(app.chat_height.max(1)),
        KeyCode::Backspace => {
            if app.cursor > 0 {
                app.cursor -= 1;
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Delete => {
            let char_count = app.input.chars().count();
            if app.cursor < char_count {
                let byte_pos = char_to_byte_index(&app.input, app.cursor);
                app.input.remove(byte_pos);
            }
        }
        KeyCode::Left => {
            app.cursor = app.cursor.saturating_sub(1);
        }
        KeyCode::Right => {
            let char_count = app.input.chars().count();
            app.cursor = (app.cursor + 1).min(char_count);
        }
        KeyCode::Home => {
            app.cursor = 0;
        }
        KeyCode::End => {
            app.cursor = app.input.chars().count();
        }
        KeyCode::Char(c) => {
            let byte_pos = char_to_byte_index(&app.input, app.cursor);
            app.input.insert(byte_pos, c);
            app.cursor += 1;
        }
        _ => {}
    }
}

/// Send the input box as a new turn on a background task.
fn submit(app: &mut App, mut sink: EventSink) {
    if app.input.trim().is_empty() {
        return;
    }
    if app.streaming() {
        app.on_display(DisplayMessage::Busy);
        return;
    }

    let text = std::mem::take(&mut app.input);
    app.cursor = 0;
    app.status = None;
    app.view.push_user(text.trim());

    let cancel = CancellationToken::new();
    app.cancel = Some(cancel.clone());

    let session = app.session.clone();
    app.turn_task = Some(tokio::spawn(async move {
        let mut session = session.lock().await;
        session.ask(&text, &mut sink, &cancel).await
    }));

    // Scroll to bottom so "Thinking..." is visible
    app.scroll_to_bottom();
}

fn reset_conversation(app: &mut App) {
    // The turn task holds the lock for the whole turn
    let reset = if app.streaming() {
        Err(SessionError::Busy)
    } else {
        match app.session.try_lock() {
            Ok(mut session) => session.reset(),
            Err(_) => Err(SessionError::Busy),
        }
    };

    match reset {
        Ok(()) => {
            app.on_display(DisplayMessage::ConversationReset);
            app.status = Some("Conversation cleared".to_string());
        }
        Err(SessionError::Busy) => app.on_display(DisplayMessage::Busy),
        Err(e) => app.status = Some(e.to_string()),
    }
}
