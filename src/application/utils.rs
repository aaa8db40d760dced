/// Splits `content` into chunks of at most `limit` characters.
///
/// Prefers breaking after the last newline, then the last space, inside the
/// window; falls back to a hard split. Never cuts through a UTF-8 character.
pub fn split_message(content: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut remaining = content;

    while !remaining.is_empty() {
        let window_end = match remaining.char_indices().nth(limit) {
            Some((idx, _)) => idx,
            None => {
                chunks.push(remaining.to_string());
                break;
            }
        };
        let window = &remaining[..window_end];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(window_end);

        chunks.push(remaining[..split_at].to_string());
        remaining = &remaining[split_at..];
    }

    chunks
}

/// Shortens `text` to `max` characters for log lines, adding an ellipsis.
pub fn preview(text: &str, max: usize) -> String {
    let single_line = text.replace('\n', " ");
    match single_line.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &single_line[..idx]),
        None => single_line,
    }
}
