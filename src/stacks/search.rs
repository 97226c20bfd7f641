//! Advanced combined search, pure text search, and recommendation
//! (spec.md §4.3 / §4.9 / §4.10 / §4.11).
//!
//! These pipelines live in their own file (rather than `stacks/mod.rs`)
//! because they're read paths layered on top of the core mutation/search
//! surface; as a child module of `stacks` they still reach `Stacks`'
//! private fields directly, the same way the teacher splits
//! `search/hybrid.rs` out from the engine that owns the indices it fuses.

use std::collections::HashSet;

use crate::error::{ErrorKind, LibraryError};
use crate::index::MetadataFilter;
use crate::math::cosine;
use crate::text::{self, TextMode};
use crate::Result;
use crate::VolumeId;

use super::{ScoredVolume, Stacks};

/// `textSearch` options (spec.md §4.6 / §4.2).
#[derive(Debug, Clone)]
pub struct TextSearchOptions {
    pub query: String,
    pub mode: TextMode,
    pub limit: usize,
    pub threshold: f32,
    pub fuzzy_threshold: f32,
    pub regex_pattern_limit: usize,
}

impl Default for TextSearchOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            mode: TextMode::Bm25,
            limit: 10,
            threshold: 0.0,
            fuzzy_threshold: text::DEFAULT_FUZZY_THRESHOLD,
            regex_pattern_limit: text::DEFAULT_REGEX_PATTERN_LIMIT,
        }
    }
}

/// `rankBy` selector for [`AdvancedSearchOptions`] (spec.md §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RankBy {
    #[default]
    Vector,
    Text,
    Average,
    Weighted,
}

/// `rankWeights` — missing components contribute 0 with their weight
/// renormalized across the components actually present (spec.md §4.10).
#[derive(Debug, Clone, Copy, Default)]
pub struct RankWeights {
    pub vector: Option<f32>,
    pub text: Option<f32>,
    pub recency: Option<f32>,
    pub frequency: Option<f32>,
    pub metadata: Option<f32>,
    pub topic: Option<f32>,
}

/// `fieldBoosts` — multiplicative scaling applied to individual modalities
/// before they're combined (spec.md §4.10).
#[derive(Debug, Clone, Copy)]
pub struct FieldBoosts {
    pub text: f32,
    pub metadata: f32,
    pub topic: f32,
}

impl Default for FieldBoosts {
    fn default() -> Self {
        Self { text: 1.0, metadata: 1.0, topic: 1.0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdvancedSearchOptions {
    pub query_embedding: Option<Vec<f32>>,
    pub text: Option<String>,
    pub text_mode: TextMode,
    pub metadata: Option<Vec<MetadataFilter>>,
    pub date_range: Option<(Option<i64>, Option<i64>)>,
    pub topic_filter: Option<String>,
    pub max_results: usize,
    pub rank_by: RankBy,
    pub rank_weights: Option<RankWeights>,
    pub field_boosts: Option<FieldBoosts>,
    pub similarity_threshold: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct RecommendOptions {
    pub query_embedding: Vec<f32>,
    pub max_results: usize,
    pub recency_half_life_ms: i64,
    pub min_score: f32,
}

impl Default for RecommendOptions {
    fn default() -> Self {
        Self {
            query_embedding: Vec::new(),
            max_results: 10,
            recency_half_life_ms: crate::learning::DEFAULT_RECENCY_HALF_LIFE_MS,
            min_score: 0.0,
        }
    }
}

fn recency_decay(now_ms: i64, timestamp_ms: i64, half_life_ms: i64) -> f32 {
    let elapsed = (now_ms - timestamp_ms).max(0) as f64;
    let half_life = half_life_ms.max(1) as f64;
    (-elapsed * std::f64::consts::LN_2 / half_life).exp() as f32
}

fn frequency_decay(hits: u32, max_hits: u32) -> f32 {
    if max_hits == 0 {
        return 0.0;
    }
    ((1.0 + hits as f32).ln()) / ((1.0 + max_hits as f32).ln())
}

impl Stacks {
    /// Pure text search: BM25 via the inverted index, or one of the
    /// tokenizer-based modes (spec.md §4.6 / §4.2). `mode == Bm25` ignores
    /// `fuzzy_threshold`/`regex_pattern_limit`.
    pub fn text_search(&mut self, options: &TextSearchOptions) -> Result<Vec<ScoredVolume>> {
        let now_ms = self.next_timestamp();

        let mut scored: Vec<(VolumeId, f32)> = match options.mode {
            TextMode::Bm25 => self.inverted.score(&options.query),
            TextMode::Regex => {
                let re = text::compile_regex(&options.query, options.regex_pattern_limit)?;
                self.volumes
                    .values()
                    .map(|v| (v.id.clone(), text::regex_score(&re, &v.text)))
                    .filter(|(_, s)| *s > 0.0)
                    .collect()
            }
            other => self
                .volumes
                .values()
                .filter_map(|v| {
                    text::score(other, &options.query, &v.text, options.fuzzy_threshold)
                        .map(|s| (v.id.clone(), s))
                })
                .filter(|(_, s)| *s > 0.0)
                .collect(),
        };

        scored.retain(|(_, s)| *s >= options.threshold);
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| {
                let ta = self.volumes.get(&a.0).map(|v| v.timestamp_ms).unwrap_or(0);
                let tb = self.volumes.get(&b.0).map(|v| v.timestamp_ms).unwrap_or(0);
                self.tie_break_key(&b.0, tb).cmp(&self.tie_break_key(&a.0, ta))
            })
        });
        scored.truncate(options.limit);

        let mut out = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            self.record_hit(&id, now_ms);
            if let Some(v) = self.volumes.get(&id) {
                out.push(ScoredVolume { volume: v.clone(), score });
            }
        }
        Ok(out)
    }

    /// Vector ⊕ BM25/text ⊕ metadata ⊕ date ⊕ topic ⊕ learning-boost
    /// combined search (spec.md §4.10).
    pub fn advanced_search(&mut self, options: &AdvancedSearchOptions) -> Result<Vec<ScoredVolume>> {
        let now_ms = self.next_timestamp();
        let field_boosts = options.field_boosts.unwrap_or_default();

        // Step 1: candidate set = intersection of present filters; absent
        // filter = all entries.
        let mut candidates: Option<HashSet<VolumeId>> = None;
        if let Some(filters) = &options.metadata {
            candidates = Some(self.filter_by_metadata(filters));
        }
        if let Some((from, to)) = options.date_range {
            let by_date = self.filter_by_date_range(from, to);
            candidates = Some(match candidates {
                Some(c) => c.intersection(&by_date).cloned().collect(),
                None => by_date,
            });
        }
        if let Some(topic) = &options.topic_filter {
            let by_topic = self.filter_by_topic(topic);
            candidates = Some(match candidates {
                Some(c) => c.intersection(&by_topic).cloned().collect(),
                None => by_topic,
            });
        }
        let candidate_ids: Vec<VolumeId> = match candidates {
            Some(c) => c.into_iter().collect(),
            None => self.volumes.keys().cloned().collect(),
        };

        // Step 2: per-candidate BM25/text scores, computed corpus-wide then
        // restricted, so `bm25` IDF stays accurate.
        let bm25_scores: std::collections::HashMap<VolumeId, f32> = match (&options.text, options.text_mode) {
            (Some(q), TextMode::Bm25) => self.inverted.score(q).into_iter().collect(),
            _ => std::collections::HashMap::new(),
        };
        let compiled_regex = match (&options.text, options.text_mode) {
            (Some(q), TextMode::Regex) => Some(text::compile_regex(q, text::DEFAULT_REGEX_PATTERN_LIMIT)?),
            _ => None,
        };

        let max_hits = candidate_ids
            .iter()
            .map(|id| self.access_stats.get(id).map(|s| s.hits).unwrap_or(0))
            .max()
            .unwrap_or(0);

        let mut scored: Vec<(VolumeId, f32)> = Vec::with_capacity(candidate_ids.len());
        for id in &candidate_ids {
            let Some(volume) = self.volumes.get(id) else { continue };

            let v_score = match &options.query_embedding {
                Some(q) => cosine(q, &volume.embedding, None, self.magnitudes.get(id).copied()),
                None => 0.0,
            };

            let t_score = match &options.text {
                Some(q) => {
                    let raw = match options.text_mode {
                        TextMode::Bm25 => bm25_scores.get(id).copied().unwrap_or(0.0),
                        TextMode::Regex => {
                            compiled_regex.as_ref().map(|re| text::regex_score(re, &volume.text)).unwrap_or(0.0)
                        }
                        other => text::score(other, q, &volume.text, text::DEFAULT_FUZZY_THRESHOLD).unwrap_or(0.0),
                    };
                    raw * field_boosts.text
                }
                None => 0.0,
            };

            let match_count = options.metadata.as_ref().map(|f| f.len()).unwrap_or(0);
            let m_boost = 1.0 + 0.25 * match_count as f32 * field_boosts.metadata;

            let within_topic = options
                .topic_filter
                .as_ref()
                .map(|t| self.filter_by_topic(t).contains(id))
                .unwrap_or(false);
            let topic_boost = if within_topic { 1.0 + 0.25 * field_boosts.topic } else { 1.0 };

            let learning_boost = match &options.query_embedding {
                Some(q) => self.learning.compute_boost(id, q, now_ms),
                None => 1.0,
            };

            let hits = self.access_stats.get(id).map(|s| s.hits).unwrap_or(0);
            let recency_score = recency_decay(now_ms, volume.timestamp_ms, crate::learning::DEFAULT_RECENCY_HALF_LIFE_MS);
            let frequency_score = frequency_decay(hits, max_hits);

            let final_score = match options.rank_by {
                RankBy::Vector => v_score * m_boost * topic_boost * learning_boost,
                RankBy::Text => t_score * m_boost * topic_boost * learning_boost,
                RankBy::Average => {
                    let mut present = Vec::with_capacity(2);
                    if options.query_embedding.is_some() {
                        present.push(v_score);
                    }
                    if options.text.is_some() {
                        present.push(t_score);
                    }
                    let avg = if present.is_empty() { 0.0 } else { present.iter().sum::<f32>() / present.len() as f32 };
                    avg * m_boost * topic_boost * learning_boost
                }
                RankBy::Weighted => {
                    let weights = options.rank_weights.unwrap_or_default();
                    let metadata_score = if options.metadata.is_some() { (m_boost - 1.0).clamp(0.0, 1.0) } else { 0.0 };
                    let topic_score = if within_topic { 1.0 } else { 0.0 };
                    let mut components: Vec<(f32, f32)> = Vec::new();
                    if options.query_embedding.is_some() {
                        components.push((weights.vector.unwrap_or(1.0), v_score));
                    }
                    if options.text.is_some() {
                        components.push((weights.text.unwrap_or(1.0), t_score));
                    }
                    components.push((weights.recency.unwrap_or(0.0), recency_score));
                    components.push((weights.frequency.unwrap_or(0.0), frequency_score));
                    if options.metadata.is_some() {
                        components.push((weights.metadata.unwrap_or(0.0), metadata_score));
                    }
                    if options.topic_filter.is_some() {
                        components.push((weights.topic.unwrap_or(0.0), topic_score));
                    }
                    let weight_sum: f32 = components.iter().map(|(w, _)| w).sum();
                    let combined = if weight_sum <= f32::EPSILON {
                        0.0
                    } else {
                        components.iter().map(|(w, s)| w * s).sum::<f32>() / weight_sum
                    };
                    combined * learning_boost
                }
            };

            scored.push((id.clone(), final_score));
        }

        if let Some(threshold) = options.similarity_threshold {
            scored.retain(|(_, s)| *s >= threshold);
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| {
                let ta = self.volumes.get(&a.0).map(|v| v.timestamp_ms).unwrap_or(0);
                let tb = self.volumes.get(&b.0).map(|v| v.timestamp_ms).unwrap_or(0);
                self.tie_break_key(&b.0, tb).cmp(&self.tie_break_key(&a.0, ta))
            })
        });
        let max_results = if options.max_results == 0 { 10 } else { options.max_results };
        scored.truncate(max_results);

        let mut out = Vec::with_capacity(scored.len());
        let mut retrieved_ids = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            self.record_hit(&id, now_ms);
            if let Some(v) = self.volumes.get(&id) {
                out.push(ScoredVolume { volume: v.clone(), score });
                retrieved_ids.push(id);
            }
        }
        let query_embedding = options.query_embedding.as_deref().unwrap_or(&[]);
        self.learning.record_query(query_embedding, &retrieved_ids, now_ms);
        Ok(out)
    }

    /// Blended recommendation score (spec.md §4.11):
    /// `0.7*cosine + 0.2*recencyDecay + 0.1*frequencyDecay`, multiplied by
    /// the learning boost.
    pub fn recommend(&mut self, options: &RecommendOptions) -> Result<Vec<ScoredVolume>> {
        if options.query_embedding.is_empty() {
            return Err(LibraryError::new(ErrorKind::EmbeddingFailure, "recommend requires a query embedding"));
        }
        let now_ms = self.next_timestamp();
        let max_hits = self.access_stats.values().map(|s| s.hits).max().unwrap_or(0);

        let mut scored: Vec<(VolumeId, f32)> = self
            .volumes
            .values()
            .map(|v| {
                let cos = cosine(&options.query_embedding, &v.embedding, None, self.magnitudes.get(&v.id).copied());
                let hits = self.access_stats.get(&v.id).map(|s| s.hits).unwrap_or(0);
                let recency = recency_decay(now_ms, v.timestamp_ms, options.recency_half_life_ms);
                let frequency = frequency_decay(hits, max_hits);
                let boost = self.learning.compute_boost(&v.id, &options.query_embedding, now_ms);
                let score = (0.7 * cos + 0.2 * recency + 0.1 * frequency) * boost;
                (v.id.clone(), score)
            })
            .filter(|(_, s)| *s >= options.min_score)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| {
                let ta = self.volumes.get(&a.0).map(|v| v.timestamp_ms).unwrap_or(0);
                let tb = self.volumes.get(&b.0).map(|v| v.timestamp_ms).unwrap_or(0);
                self.tie_break_key(&b.0, tb).cmp(&self.tie_break_key(&a.0, ta))
            })
        });
        scored.truncate(options.max_results);

        let retrieved_ids: Vec<VolumeId> = scored.iter().map(|(id, _)| id.clone()).collect();
        let out = scored
            .into_iter()
            .filter_map(|(id, score)| self.volumes.get(&id).map(|v| ScoredVolume { volume: v.clone(), score }))
            .collect();
        self.learning.record_query(&options.query_embedding, &retrieved_ids, now_ms);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::stacks::StacksConfig;

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn text_search_bm25_ranking_scenario() {
        let mut stacks = Stacks::new(StacksConfig::default());
        stacks.add("rust programming language systems".into(), vec![1.0], HashMap::new()).unwrap();
        stacks.add("python programming language scripting".into(), vec![1.0], HashMap::new()).unwrap();
        stacks.add("cooking italian pasta recipes".into(), vec![1.0], HashMap::new()).unwrap();

        let results = stacks
            .text_search(&TextSearchOptions { query: "programming".into(), mode: TextMode::Bm25, limit: 10, ..Default::default() })
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.score > 0.0));
        assert!(results.iter().all(|r| !r.volume.text.contains("cooking")));
    }

    #[test]
    fn text_search_regex_over_length_limit_fails() {
        let mut stacks = Stacks::new(StacksConfig::default());
        stacks.add("hello".into(), vec![1.0], HashMap::new()).unwrap();
        let err = stacks
            .text_search(&TextSearchOptions {
                query: "a".repeat(300),
                mode: TextMode::Regex,
                limit: 10,
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPattern);
    }

    #[test]
    fn advanced_search_vector_mode_ranks_by_cosine() {
        let mut stacks = Stacks::new(StacksConfig::default());
        stacks.add("a".into(), vec![1.0, 0.0], HashMap::new()).unwrap();
        stacks.add("b".into(), vec![0.0, 1.0], HashMap::new()).unwrap();

        let results = stacks
            .advanced_search(&AdvancedSearchOptions {
                query_embedding: Some(vec![1.0, 0.0]),
                max_results: 10,
                rank_by: RankBy::Vector,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results[0].volume.text, "a");
    }

    #[test]
    fn advanced_search_intersects_metadata_and_topic_filters() {
        let mut stacks = Stacks::new(StacksConfig::default());
        stacks.add("a".into(), vec![1.0], meta(&[("topic", "rust"), ("lang", "en")])).unwrap();
        stacks.add("b".into(), vec![1.0], meta(&[("topic", "rust"), ("lang", "fr")])).unwrap();
        stacks.add("c".into(), vec![1.0], meta(&[("topic", "python"), ("lang", "en")])).unwrap();

        let results = stacks
            .advanced_search(&AdvancedSearchOptions {
                metadata: Some(vec![MetadataFilter {
                    key: "lang".into(),
                    mode: crate::index::MetadataMode::Eq("en".into()),
                }]),
                topic_filter: Some("rust".into()),
                max_results: 10,
                rank_by: RankBy::Average,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].volume.text, "a");
    }

    #[test]
    fn recommend_requires_query_embedding() {
        let mut stacks = Stacks::new(StacksConfig::default());
        stacks.add("a".into(), vec![1.0], HashMap::new()).unwrap();
        let err = stacks.recommend(&RecommendOptions { query_embedding: vec![], ..Default::default() }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmbeddingFailure);
    }

    #[test]
    fn recommend_excludes_entries_below_min_score() {
        let mut stacks = Stacks::new(StacksConfig::default());
        stacks.add("a".into(), vec![1.0, 0.0], HashMap::new()).unwrap();
        stacks.add("b".into(), vec![-1.0, 0.0], HashMap::new()).unwrap();
        let results = stacks
            .recommend(&RecommendOptions { query_embedding: vec![1.0, 0.0], min_score: 0.5, max_results: 10, ..Default::default() })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].volume.text, "a");
    }
}
