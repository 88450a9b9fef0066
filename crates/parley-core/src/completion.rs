//! Inline code suggestion: everything before the cursor is the prompt.

use crate::backend::{GenerateOptions, OllamaClient};
use crate::error::CompletionError;

/// Byte offset of a 1-based `line:column` cursor, columns counted in chars.
///
/// The column may point one past the last character of the line.
pub fn cursor_offset(text: &str, line: usize, column: usize) -> Result<usize, CompletionError> {
    let out_of_range = || CompletionError::CursorOutOfRange { line, column };
    if line == 0 || column == 0 {
        return Err(out_of_range());
    }

    let mut line_start = 0;
    for _ in 1..line {
        let newline = text[line_start..].find('\n').ok_or_else(out_of_range)?;
        line_start += newline + 1;
    }
    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |i| line_start + i);
    let line_text = &text[line_start..line_end];

    line_text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(line_text.len()))
        .nth(column - 1)
        .map(|i| line_start + i)
        .ok_or_else(out_of_range)
}

/// Splice `suggestion` into `text` at byte `offset`.
pub fn insert_at(text: &str, offset: usize, suggestion: &str) -> String {
    let mut out = String::with_capacity(text.len() + suggestion.len());
    out.push_str(&text[..offset]);
    out.push_str(suggestion);
    out.push_str(&text[offset..]);
    out
}

#[derive(Clone)]
pub struct InlineCompleter {
    client: OllamaClient,
    options: GenerateOptions,
}

impl InlineCompleter {
    pub fn new(client: OllamaClient) -> Self {
        Self {
            client,
            options: GenerateOptions::default(),
        }
    }

    pub fn options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    /// Ask the model to continue `prefix`.
    pub async fn suggest(&self, prefix: &str) -> Result<String, CompletionError> {
        if prefix.trim().is_empty() {
            tracing::debug!("nothing before the cursor, skipping suggestion");
            return Ok(String::new());
        }
        let suggestion = self.client.generate(prefix, Some(&self.options)).await?;
        tracing::info!(
            model = self.client.model(),
            len = suggestion.len(),
            "inline suggestion received"
        );
        Ok(suggestion)
    }

    /// Suggest for `text` at `line:column` and return the spliced text and
    /// the suggestion.
    pub async fn complete_at(
        &self,
        text: &str,
        line: usize,
        column: usize,
    ) -> Result<(String, String), CompletionError> {
        let offset = cursor_offset(text, line, column)?;
        let suggestion = self.suggest(&text[..offset]).await?;
        Ok((insert_at(text, offset, &suggestion), suggestion))
    }
}
