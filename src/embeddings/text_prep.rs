// text_prep.rs — Utterance cleanup before tokenization.
//
// Pool files are often scraped or crowd-sourced: stray newlines, tabs and runs of
// spaces are collapsed so they do not turn into extra tokens.

/// Trim and collapse internal whitespace. `None` for empty or whitespace-only input.
pub fn normalize_utterance(text: &str) -> Option<String> {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}
