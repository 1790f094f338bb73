/// First `max_chars` characters of `value`, counted as Unicode scalar values.
pub fn take_chars(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

/// Like [`take_chars`], appending `...` only when something was cut.
pub fn truncate_with_ellipsis(value: &str, max_chars: usize) -> String {
    let head = take_chars(value, max_chars);
    if head.len() < value.len() {
        format!("{head}...")
    } else {
        head.to_string()
    }
}

/// Trimmed value, or `None` when it is blank.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_chars_respects_multibyte_boundaries() {
        assert_eq!(take_chars("éàü", 2), "éà");
        assert_eq!(take_chars("abc", 10), "abc");
        assert_eq!(take_chars("", 3), "");
    }

    #[test]
    fn ellipsis_only_when_truncated() {
        assert_eq!(truncate_with_ellipsis("short", 50), "short");
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc...");
        assert_eq!(truncate_with_ellipsis("abc", 3), "abc");
    }

    #[test]
    fn non_blank_trims_and_drops_empty() {
        assert_eq!(non_blank(Some("  hi ")), Some("hi".to_string()));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }
}
