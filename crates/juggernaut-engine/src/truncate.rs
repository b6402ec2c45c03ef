/// Default cap on tool output fed back into the conversation.
pub const DEFAULT_MAX_OUTPUT: usize = 32 * 1024;

/// Characters of tool output carried in `tool_result` events.
pub const PREVIEW_CHARS: usize = 200;

/// Truncate tool output if it exceeds `max_bytes`.
/// Cuts on a char boundary and appends a marker with the original and kept sizes.
pub fn truncate_output(output: &str, max_bytes: usize) -> String {
    if output.len() <= max_bytes {
        return output.to_string();
    }
    let mut boundary = max_bytes;
    while !output.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!(
        "{}\n\n[truncated: {} bytes -> {} bytes]",
        &output[..boundary],
        output.len(),
        boundary
    )
}

/// Short single-line preview for event payloads.
pub fn preview(output: &str) -> String {
    let flat: String = output
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .take(PREVIEW_CHARS + 1)
        .collect();
    if flat.chars().count() > PREVIEW_CHARS {
        let kept: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{kept}...")
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_truncation_when_within_limit() {
        let input = "hello world";
        assert_eq!(truncate_output(input, 1024), input);
    }

    #[test]
    fn truncates_at_limit() {
        let input = "a".repeat(1000);
        let result = truncate_output(&input, 100);
        assert!(result.contains("[truncated: 1000 bytes -> 100 bytes]"));
        assert!(result.starts_with(&"a".repeat(100)));
    }

    #[test]
    fn truncates_at_char_boundary() {
        // 4-byte chars: a 10 byte cap keeps two of them
        let input = "🦀".repeat(100);
        let result = truncate_output(&input, 10);
        assert!(result.starts_with("🦀🦀\n"));
        assert!(result.contains("[truncated: 400 bytes -> 8 bytes]"));
    }

    #[test]
    fn exact_boundary_no_truncation() {
        let input = "a".repeat(100);
        assert_eq!(truncate_output(&input, 100), input);
    }

    #[test]
    fn empty_string() {
        assert_eq!(truncate_output("", 100), "");
    }

    #[test]
    fn preview_flattens_and_clips() {
        assert_eq!(preview("a\nb"), "a b");
        let long = "x".repeat(500);
        let p = preview(&long);
        assert_eq!(p.len(), PREVIEW_CHARS + 3);
        assert!(p.ends_with("..."));
        assert_eq!(preview(&"y".repeat(PREVIEW_CHARS)), "y".repeat(PREVIEW_CHARS));
    }
}
