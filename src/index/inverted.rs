//! Inverted index with BM25 scoring (spec.md §4.3, component C3)

use std::collections::HashMap;

use crate::text::tokenize_lower;
use crate::VolumeId;

/// BM25 term-frequency saturation parameter.
pub const K1: f32 = 1.5;
/// BM25 length-normalization parameter.
pub const B: f32 = 0.75;

#[derive(Debug, Clone, Default)]
struct Posting {
    term_frequency: u32,
}

/// Per-term posting list plus the corpus statistics BM25 needs.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    // term -> volume_id -> posting
    postings: HashMap<String, HashMap<VolumeId, Posting>>,
    doc_lengths: HashMap<VolumeId, u32>,
    total_length: u64,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_docs(&self) -> usize {
        self.doc_lengths.len()
    }

    fn avg_doc_length(&self) -> f32 {
        let n = self.total_docs();
        if n == 0 {
            0.0
        } else {
            self.total_length as f32 / n as f32
        }
    }

    /// Tokenizes `text` and updates all posting lists / corpus stats.
    /// Idempotent misuse (re-adding the same id without deleting first) is
    /// the caller's responsibility to avoid — `Stacks` always deletes before
    /// re-adding.
    pub fn add(&mut self, id: &VolumeId, text: &str) {
        let tokens = tokenize_lower(text);
        self.doc_lengths.insert(id.clone(), tokens.len() as u32);
        self.total_length += tokens.len() as u64;

        let mut tf: HashMap<String, u32> = HashMap::new();
        for t in tokens {
            *tf.entry(t).or_insert(0) += 1;
        }
        for (term, freq) in tf {
            self.postings
                .entry(term)
                .or_default()
                .insert(id.clone(), Posting { term_frequency: freq });
        }
    }

    /// Reverses the effect of [`Self::add`] for `id`.
    pub fn delete(&mut self, id: &VolumeId) {
        if let Some(len) = self.doc_lengths.remove(id) {
            self.total_length = self.total_length.saturating_sub(len as u64);
        }
        self.postings.retain(|_, docs| {
            docs.remove(id);
            !docs.is_empty()
        });
    }

    fn idf(&self, df: usize) -> f32 {
        let n = self.total_docs() as f32;
        (((n - df as f32 + 0.5) / (df as f32 + 0.5)) + 1.0).ln()
    }

    /// Scores every document containing at least one query term, per the
    /// BM25 formula in spec.md §4.3. Documents with score `0.0` (no query
    /// terms present) are omitted.
    pub fn score(&self, query: &str) -> Vec<(VolumeId, f32)> {
        let query_terms = tokenize_lower(query);
        if query_terms.is_empty() || self.total_docs() == 0 {
            return Vec::new();
        }
        let avgdl = self.avg_doc_length();
        let mut scores: HashMap<VolumeId, f32> = HashMap::new();

        for term in &query_terms {
            let Some(docs) = self.postings.get(term) else { continue };
            let df = docs.len();
            let idf = self.idf(df);
            for (id, posting) in docs {
                let dl = *self.doc_lengths.get(id).unwrap_or(&0) as f32;
                let tf = posting.term_frequency as f32;
                let denom = tf + K1 * (1.0 - B + B * dl / avgdl.max(1.0));
                let term_score = idf * ((K1 + 1.0) * tf) / denom;
                *scores.entry(id.clone()).or_insert(0.0) += term_score;
            }
        }

        scores.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bm25_ranks_matching_docs_and_excludes_unrelated() {
        let mut idx = InvertedIndex::new();
        idx.add(&"a".to_string(), "rust programming language systems");
        idx.add(&"b".to_string(), "python programming language scripting");
        idx.add(&"c".to_string(), "cooking italian pasta recipes");

        let results = idx.score("programming");
        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&"a"));
        assert!(ids.contains(&"b"));
        assert!(!ids.contains(&"c"));
        assert!(results.iter().all(|(_, s)| *s > 0.0));
    }

    #[test]
    fn delete_reverses_corpus_statistics() {
        let mut idx = InvertedIndex::new();
        idx.add(&"a".to_string(), "rust programming");
        idx.add(&"b".to_string(), "python programming");
        idx.delete(&"a".to_string());
        assert_eq!(idx.total_docs(), 1);
        let results = idx.score("rust");
        assert!(results.is_empty());
    }

    #[test]
    fn empty_query_scores_nothing() {
        let mut idx = InvertedIndex::new();
        idx.add(&"a".to_string(), "hello world");
        assert!(idx.score("   ").is_empty());
    }
}
