//! Text similarity modes (spec.md §4.2)
//!
//! Every mode returns a score in `[0, 1]` so results can be composed with
//! the vector score in `advancedSearch` (spec.md §4.10).

use regex::Regex;

use crate::error::{ErrorKind, LibraryError};
use crate::text::tokenizer::tokenize_lower;

/// Default regex pattern length limit (spec.md §4.2).
pub const DEFAULT_REGEX_PATTERN_LIMIT: usize = 256;

/// Default fuzzy-match acceptance threshold (spec.md §4.2).
pub const DEFAULT_FUZZY_THRESHOLD: f32 = 0.3;

/// Which text-matching strategy to use for a query (spec.md §4.2).
///
/// `Bm25` is handled separately by [`crate::index::inverted::InvertedIndex`];
/// the variant exists here so callers can select it uniformly through one
/// enum (spec.md §4.8 query DSL: `mode defaults to bm25`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextMode {
    Substring,
    Fuzzy,
    Exact,
    Regex,
    TokenOverlap,
    #[default]
    Bm25,
}

/// Levenshtein edit distance between two strings, operating on Unicode
/// scalar values (not bytes, so multi-byte characters count as one edit).
pub fn levenshtein(a: &str, b: &str) -> usize {
    strsim::levenshtein(a, b)
}

/// `1 - levenshtein(a, b) / max(|a|, |b|)`, in `[0, 1]`. Two empty strings
/// are defined as identical (similarity `1.0`).
pub fn levenshtein_similarity(a: &str, b: &str) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    strsim::normalized_levenshtein(a, b) as f32
}

/// `substring` mode: boolean containment over lowercased text.
pub fn substring_score(query: &str, text: &str) -> f32 {
    if text.to_lowercase().contains(&query.to_lowercase()) {
        1.0
    } else {
        0.0
    }
}

/// `exact` mode: whole-token equality against any token in the document.
pub fn exact_score(query: &str, doc_tokens: &[String]) -> f32 {
    let q = query.to_lowercase();
    if doc_tokens.iter().any(|t| *t == q) {
        1.0
    } else {
        0.0
    }
}

/// `fuzzy` mode: best per-token Levenshtein similarity, zeroed out below
/// `threshold` (default [`DEFAULT_FUZZY_THRESHOLD`]).
pub fn fuzzy_score(query: &str, doc_tokens: &[String], threshold: f32) -> f32 {
    let q = query.to_lowercase();
    let best = doc_tokens
        .iter()
        .map(|t| levenshtein_similarity(&q, t))
        .fold(0.0f32, f32::max);
    if best >= threshold {
        best
    } else {
        0.0
    }
}

/// `tokenOverlap` mode: `|query ∩ doc| / |query|` over token sets.
pub fn token_overlap_score(query_tokens: &[String], doc_tokens: &[String]) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let doc_set: std::collections::HashSet<&str> = doc_tokens.iter().map(|s| s.as_str()).collect();
    let hits = query_tokens.iter().filter(|t| doc_set.contains(t.as_str())).count();
    hits as f32 / query_tokens.len() as f32
}

/// Compiles a `regex` mode pattern, enforcing the length limit (spec.md
/// §4.2 / §8: "Regex pattern longer than 256 chars: `textSearch` fails with
/// *invalid pattern*").
pub fn compile_regex(pattern: &str, limit: usize) -> crate::Result<Regex> {
    if pattern.len() > limit {
        return Err(LibraryError::new(
            ErrorKind::InvalidPattern,
            format!("pattern exceeds {limit} char limit"),
        ));
    }
    Regex::new(pattern)
        .map_err(|e| LibraryError::with_cause(ErrorKind::InvalidPattern, e.to_string(), e))
}

/// `regex` mode: `1.0` if the compiled pattern matches the raw text anywhere.
pub fn regex_score(re: &Regex, text: &str) -> f32 {
    if re.is_match(text) {
        1.0
    } else {
        0.0
    }
}

/// Scores `text` against `query` using the given mode (all modes but
/// [`TextMode::Bm25`], which requires the corpus-wide inverted index).
pub fn score(mode: TextMode, query: &str, text: &str, fuzzy_threshold: f32) -> Option<f32> {
    match mode {
        TextMode::Substring => Some(substring_score(query, text)),
        TextMode::Exact => Some(exact_score(query, &tokenize_lower(text))),
        TextMode::Fuzzy => Some(fuzzy_score(query, &tokenize_lower(text), fuzzy_threshold)),
        TextMode::TokenOverlap => {
            Some(token_overlap_score(&tokenize_lower(query), &tokenize_lower(text)))
        }
        TextMode::Regex | TextMode::Bm25 => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_identical_strings_is_zero() {
        assert_eq!(levenshtein("kitten", "kitten"), 0);
    }

    #[test]
    fn levenshtein_classic_example() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
    }

    #[test]
    fn levenshtein_similarity_of_empty_strings_is_one() {
        assert_eq!(levenshtein_similarity("", ""), 1.0);
    }

    #[test]
    fn substring_mode_is_case_insensitive() {
        assert_eq!(substring_score("RUST", "I love rust programming"), 1.0);
        assert_eq!(substring_score("python", "I love rust programming"), 0.0);
    }

    #[test]
    fn fuzzy_mode_zeroes_out_below_threshold() {
        let tokens = tokenize_lower("completely unrelated words here");
        assert_eq!(fuzzy_score("xyzxyz", &tokens, 0.3), 0.0);
    }

    #[test]
    fn fuzzy_mode_finds_near_match_above_threshold() {
        let tokens = tokenize_lower("programming");
        assert!(fuzzy_score("programing", &tokens, 0.3) > 0.3);
    }

    #[test]
    fn token_overlap_scores_fraction_of_query_covered() {
        let q = tokenize_lower("rust programming language");
        let d = tokenize_lower("rust is a systems programming language");
        assert!((token_overlap_score(&q, &d) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn regex_over_length_limit_is_rejected() {
        let pattern = "a".repeat(300);
        let err = compile_regex(&pattern, DEFAULT_REGEX_PATTERN_LIMIT).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPattern);
    }

    #[test]
    fn regex_mode_matches_pattern() {
        let re = compile_regex(r"^rust\d+$", DEFAULT_REGEX_PATTERN_LIMIT).unwrap();
        assert_eq!(regex_score(&re, "rust42"), 1.0);
        assert_eq!(regex_score(&re, "not a match"), 0.0);
    }
}
