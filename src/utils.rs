/// Shortens `text` to at most `max_chars` characters for log lines, marking
/// the cut with an ellipsis.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.char_indices();
    match chars.nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
