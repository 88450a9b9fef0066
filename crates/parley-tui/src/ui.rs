use ratatui::{
    Frame,
    layout::{Constraint, Layout, Position},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
};

use crate::app::{App, ViewEntry};

/// Style `**bold**` and `` `code` `` spans on one line of Markdown.
///
/// Anything else is shown as-is; a proper renderer lives in the editor.
fn markdown_line(text: &str) -> Line<'static> {
    let mut spans: Vec<Span<'static>> = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let bold = rest.find("**");
        let code = rest.find('`');

        let (start, marker, style) = match (bold, code) {
            (Some(b), Some(c)) if c < b => (c, "`", Style::default().fg(Color::Green)),
            (Some(b), _) => (b, "**", Style::default().add_modifier(Modifier::BOLD)),
            (None, Some(c)) => (c, "`", Style::default().fg(Color::Green)),
            (None, None) => break,
        };

        let after = &rest[start + marker.len()..];
        let Some(end) = after.find(marker) else {
            break;
        };

        if start > 0 {
            spans.push(Span::raw(rest[..start].to_string()));
        }
        spans.push(Span::styled(after[..end].to_string(), style));
        rest = &after[end + marker.len()..];
    }

    if !rest.is_empty() {
        spans.push(Span::raw(rest.to_string()));
    }
    Line::from(spans)
}

fn role_line(label: &'static str, color: Color) -> Line<'static> {
    Line::from(Span::styled(
        label,
        Style::default().fg(color).add_modifier(Modifier::BOLD),
    ))
}

pub fn render(app: &mut App, frame: &mut Frame) {
    let [chat_area, input_area, status_area] = Layout::vertical([
        Constraint::Min(0),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(frame.area());

    // Store chat area dimensions for scroll calculations (inner size minus borders)
    app.chat_height = chat_area.height.saturating_sub(2);
    app.chat_width = chat_area.width.saturating_sub(2);

    let chat_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(format!(" Ollama: {} ", app.model));

    let chat_text = if app.view.is_empty() && !app.streaming() {
        Text::from(Span::styled(
            "Ask a question...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for entry in app.view.entries() {
            match entry {
                ViewEntry::User(text) => {
                    lines.push(role_line("You:", Color::Cyan));
                    lines.extend(text.lines().map(|l| Line::from(l.to_string())));
                }
                ViewEntry::Ai(text) => {
                    lines.push(role_line("AI:", Color::Yellow));
                    lines.extend(text.lines().map(markdown_line));
                }
                ViewEntry::Document(text) => {
                    lines.extend(text.lines().map(markdown_line));
                }
            }
            lines.push(Line::default());
        }

        if app.streaming() {
            // Animated ellipsis: cycles through ".", "..", "..."
            let dots = ".".repeat((app.animation_frame as usize) + 1);
            lines.push(Line::from(Span::styled(
                format!("Thinking{}", dots),
                Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
            )));
        }

        Text::from(lines)
    };

    let chat = Paragraph::new(chat_text)
        .block(chat_block)
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0));
    frame.render_widget(chat, chat_area);

    let input_border_color = if app.streaming() {
        Color::DarkGray
    } else {
        Color::Yellow
    };
    let input = Paragraph::new(app.input.as_str()).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(input_border_color))
            .title(" Message (Enter send, Esc stop, Ctrl+R reset, Ctrl+C quit) "),
    );
    frame.render_widget(input, input_area);

    // Place the terminal cursor inside the input box
    let cursor = u16::try_from(app.cursor).unwrap_or(u16::MAX);
    let cursor_x = input_area.x.saturating_add(1).saturating_add(cursor);
    frame.set_cursor_position(Position::new(
        cursor_x.min(input_area.right().saturating_sub(2)),
        input_area.y + 1,
    ));

    let status = app.status.clone().unwrap_or_default();
    frame.render_widget(
        Paragraph::new(Span::styled(status, Style::default().fg(Color::DarkGray))),
        status_area,
    );
}
