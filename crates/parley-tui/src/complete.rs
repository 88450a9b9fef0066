use std::path::Path;

use anyhow::{Context, Result};
use parley_core::InlineCompleter;

/// Suggest a continuation for `path` at `line:column`.
///
/// With `write` the suggestion is spliced into the file in place.
pub async fn complete_file(
    completer: &InlineCompleter,
    path: &Path,
    line: usize,
    column: usize,
    write: bool,
) -> Result<String> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    let (spliced, suggestion) = completer.complete_at(&text, line, column).await?;
    tracing::info!(
        path = %path.display(),
        line,
        column,
        chars = suggestion.chars().count(),
        "completion ready"
    );

    if write && !suggestion.is_empty() {
        tokio::fs::write(path, spliced)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(suggestion)
}
