//! Lowercasing and tokenization (spec.md §4.2)

/// Unicode-simple-casefold lowercasing over the input.
pub fn lowercase(s: &str) -> String {
    s.to_lowercase()
}

/// Splits on any non-alphanumeric character (`_` included), discarding
/// empty tokens. Operates on the already-lowercased text.
pub fn tokenize(s: &str) -> Vec<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Convenience: lowercase then tokenize.
pub fn tokenize_lower(s: &str) -> Vec<String> {
    tokenize(&lowercase(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_punctuation_and_underscore() {
        let tokens = tokenize_lower("Rust_Programming, language! systems123");
        assert_eq!(tokens, vec!["rust", "programming", "language", "systems123"]);
    }

    #[test]
    fn tokenize_discards_empty_tokens() {
        let tokens = tokenize_lower("  hello   world  ");
        assert_eq!(tokens, vec!["hello", "world"]);
    }

    #[test]
    fn tokenize_empty_string_yields_no_tokens() {
        assert!(tokenize_lower("").is_empty());
        assert!(tokenize_lower("___...   ").is_empty());
    }
}
