//! Text tokenizer & similarity modes (spec.md §4.2, component C2)

pub mod similarity;
pub mod tokenizer;

pub use similarity::{
    compile_regex, exact_score, fuzzy_score, levenshtein, levenshtein_similarity, regex_score,
    score, substring_score, token_overlap_score, TextMode, DEFAULT_FUZZY_THRESHOLD,
    DEFAULT_REGEX_PATTERN_LIMIT,
};
pub use tokenizer::{lowercase, tokenize, tokenize_lower};
