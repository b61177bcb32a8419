//! Text helpers shared by configuration, submission and alert building.

/// Longest snippet of free text (a complaint, an error body) carried into
/// alerts and status lines.
pub const MAX_SNIPPET_CHARS: usize = 180;

/// `Some` with surrounding whitespace removed, `None` for missing or blank input.
pub fn trimmed_non_empty(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub fn has_http_scheme(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Trim and cut to [`MAX_SNIPPET_CHARS`] characters.
pub fn snippet(value: &str) -> String {
    value.trim().chars().take(MAX_SNIPPET_CHARS).collect()
}

/// Single-line rendering of an error for logs and status messages.
pub fn sanitize_error(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_become_none() {
        assert_eq!(trimmed_non_empty(None), None);
        assert_eq!(trimmed_non_empty(Some(" \t ".to_string())), None);
        assert_eq!(
            trimmed_non_empty(Some(" https://hub.example.com ".to_string())),
            Some("https://hub.example.com".to_string())
        );
    }

    #[test]
    fn only_http_schemes_are_accepted() {
        assert!(has_http_scheme("http://localhost:8080"));
        assert!(has_http_scheme("https://hub.example.com"));
        assert!(!has_http_scheme("ws://hub.example.com"));
        assert!(!has_http_scheme("hub.example.com"));
    }

    #[test]
    fn snippet_caps_length_in_chars() {
        let long = "é".repeat(500);
        assert_eq!(snippet(&long).chars().count(), MAX_SNIPPET_CHARS);
        assert_eq!(snippet("  chest pain  "), "chest pain");
    }

    #[test]
    fn sanitize_error_flattens_newlines() {
        assert_eq!(sanitize_error(&"line one\nline two\n"), "line one line two");
    }
}
