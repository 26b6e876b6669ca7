/// Extract the JSON payload candidate from raw model output.
///
/// Trims whitespace and markdown code fences, then keeps the span from the
/// first `{` to the last `}` inclusive. Text without such a pair is returned
/// as-is after fence stripping.
#[must_use]
pub fn sanitize_response(raw: &str) -> &str {
    let mut text = raw.trim();
    loop {
        let stripped = strip_fences(text);
        if stripped.len() == text.len() {
            break;
        }
        text = stripped;
    }

    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}

fn strip_fences(text: &str) -> &str {
    let text = text.strip_prefix("```json").unwrap_or(text);
    let text = text.strip_prefix("```").unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);
    text.trim()
}
