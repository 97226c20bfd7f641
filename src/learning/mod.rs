//! Adaptive learning engine — the "Patron profile" (spec.md §4.9, component
//! C9)

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::VolumeId;

/// Default ring-buffer capacity for query history.
pub const DEFAULT_MAX_QUERY_HISTORY: usize = 256;
/// Recompute adapted weights every N queries.
pub const DEFAULT_ADAPT_EVERY: usize = 8;
/// Half-life used by the recency component of `computeBoost`.
pub const DEFAULT_RECENCY_HALF_LIFE_MS: i64 = 7 * 24 * 60 * 60 * 1000;

const MIN_WEIGHT: f32 = 0.05;
const MAX_WEIGHT: f32 = 0.9;

#[derive(Debug, Clone)]
pub struct LearningConfig {
    pub enabled: bool,
    pub max_query_history: usize,
    pub adapt_every: usize,
    pub recency_half_life_ms: i64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_query_history: DEFAULT_MAX_QUERY_HISTORY,
            adapt_every: DEFAULT_ADAPT_EVERY,
            recency_half_life_ms: DEFAULT_RECENCY_HALF_LIFE_MS,
        }
    }
}

/// `{vector, recency, frequency[, text]}`, always summing to 1.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptedWeights {
    pub vector: f32,
    pub recency: f32,
    pub frequency: f32,
    pub text: f32,
}

impl Default for AdaptedWeights {
    fn default() -> Self {
        Self { vector: 0.6, recency: 0.2, frequency: 0.2, text: 0.0 }
    }
}

impl AdaptedWeights {
    fn renormalize(&mut self) {
        let sum = self.vector + self.recency + self.frequency + self.text;
        if sum <= f32::EPSILON {
            *self = AdaptedWeights::default();
            return;
        }
        self.vector /= sum;
        self.recency /= sum;
        self.frequency /= sum;
        self.text /= sum;
    }
}

#[derive(Debug, Clone)]
struct QueryHistoryEntry {
    embedding: Vec<f32>,
    retrieved: Vec<VolumeId>,
}

#[derive(Debug, Clone, Default)]
struct EntryStats {
    total_retrievals: u64,
    distinct_queries: u64,
    first_seen_ms: i64,
    last_seen_ms: i64,
    positive_feedback: u32,
    negative_feedback: u32,
}

#[derive(Debug, Clone, Default)]
struct FeedbackTally {
    positive_by_component: HashMap<&'static str, u32>,
    negative_by_component: HashMap<&'static str, u32>,
}

/// Per-entry, per-query usage history plus the adaptive ranking weight
/// profile described in spec.md §4.9 / §3 ("Learning profile").
pub struct LearningEngine {
    config: LearningConfig,
    total_queries: u64,
    since_last_adapt: usize,
    query_history: VecDeque<QueryHistoryEntry>,
    entry_stats: HashMap<VolumeId, EntryStats>,
    weights: AdaptedWeights,
    feedback: FeedbackTally,
    last_updated: DateTime<Utc>,
}

impl LearningEngine {
    pub fn new(config: LearningConfig) -> Self {
        Self {
            config,
            total_queries: 0,
            since_last_adapt: 0,
            query_history: VecDeque::new(),
            entry_stats: HashMap::new(),
            weights: AdaptedWeights::default(),
            feedback: FeedbackTally::default(),
            last_updated: Utc::now(),
        }
    }

    pub fn total_queries(&self) -> u64 {
        self.total_queries
    }

    pub fn weights(&self) -> &AdaptedWeights {
        &self.weights
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Records a query and its retrieved ids; no-ops on an empty embedding
    /// or empty result set (spec.md §4.9).
    pub fn record_query(&mut self, query_embedding: &[f32], retrieved_ids: &[VolumeId], now_ms: i64) {
        if !self.config.enabled || query_embedding.is_empty() || retrieved_ids.is_empty() {
            return;
        }

        self.total_queries += 1;
        self.since_last_adapt += 1;

        for id in retrieved_ids {
            let stats = self.entry_stats.entry(id.clone()).or_insert_with(|| EntryStats {
                first_seen_ms: now_ms,
                ..Default::default()
            });
            stats.total_retrievals += 1;
            stats.distinct_queries += 1;
            stats.last_seen_ms = now_ms;
        }

        self.query_history.push_back(QueryHistoryEntry {
            embedding: query_embedding.to_vec(),
            retrieved: retrieved_ids.to_vec(),
        });
        while self.query_history.len() > self.config.max_query_history {
            self.query_history.pop_front();
        }

        if self.since_last_adapt >= self.config.adapt_every {
            self.adapt();
            self.since_last_adapt = 0;
        }
        self.last_updated = Utc::now();
    }

    /// Confirms or rejects that an entry's retrieval was useful; credited to
    /// `feedbackByEntry` (spec.md §3) for the given `id` and feeds the next
    /// weight adaptation (spec.md §4.9 Open Question: the exact blend is
    /// underspecified, documented in DESIGN.md).
    pub fn record_feedback(&mut self, id: &VolumeId, positive: bool) {
        if !self.config.enabled {
            return;
        }
        let stats = self.entry_stats.entry(id.clone()).or_default();
        if positive {
            stats.positive_feedback += 1;
        } else {
            stats.negative_feedback += 1;
        }

        // Open Question (spec.md §4.9): we credit whichever component
        // currently carries the largest weight, since that is presumed to
        // be the component driving the user's judgment of the result.
        let dominant = [
            ("vector", self.weights.vector),
            ("recency", self.weights.recency),
            ("frequency", self.weights.frequency),
            ("text", self.weights.text),
        ]
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(name, _)| name)
        .unwrap_or("vector");

        if positive {
            *self.feedback.positive_by_component.entry(dominant).or_insert(0) += 1;
        } else {
            *self.feedback.negative_by_component.entry(dominant).or_insert(0) += 1;
        }
    }

    /// Shifts weights proportionally towards components correlated with
    /// confirmed positives, clamps each to `[0.05, 0.9]`, renormalizes to
    /// sum 1 (spec.md §4.9 / §8 invariant: `Σ adaptedWeights = 1`).
    fn adapt(&mut self) {
        const STEP: f32 = 0.05;
        let mut next = self.weights.clone();
        for (name, weight) in [
            ("vector", &mut next.vector),
            ("recency", &mut next.recency),
            ("frequency", &mut next.frequency),
            ("text", &mut next.text),
        ] {
            let pos = *self.feedback.positive_by_component.get(name).unwrap_or(&0) as i64;
            let neg = *self.feedback.negative_by_component.get(name).unwrap_or(&0) as i64;
            let delta = (pos - neg).signum() as f32 * STEP;
            *weight = (*weight + delta).clamp(MIN_WEIGHT, MAX_WEIGHT);
        }
        next.renormalize();
        self.weights = next;
        self.feedback = FeedbackTally::default();
    }

    /// Mean of the L2-normalized query-history embeddings: the "interest
    /// embedding" used for the alignment term of `computeBoost`.
    fn interest_embedding(&self) -> Option<Vec<f32>> {
        let mut iter = self.query_history.iter();
        let first = iter.next()?;
        let dim = first.embedding.len();
        let mut sum = vec![0.0f32; dim];
        let mut count = 0usize;
        for entry in self.query_history.iter() {
            if entry.embedding.len() != dim {
                continue;
            }
            let mag = crate::math::magnitude(&entry.embedding);
            if mag == 0.0 {
                continue;
            }
            for (i, x) in entry.embedding.iter().enumerate() {
                sum[i] += x / mag;
            }
            count += 1;
        }
        if count == 0 {
            return None;
        }
        for x in sum.iter_mut() {
            *x /= count as f32;
        }
        Some(sum)
    }

    /// `1 + alpha * (f(entry) - 0.5)` clamped to `[0.8, 1.2]` (spec.md
    /// §4.9). Disabled mode always returns `1.0`.
    pub fn compute_boost(&self, id: &VolumeId, query_embedding: &[f32], now_ms: i64) -> f32 {
        if !self.config.enabled {
            return 1.0;
        }
        const ALPHA: f32 = 0.4;
        let Some(stats) = self.entry_stats.get(id) else { return 1.0 };

        let frequency = ((stats.total_retrievals as f32 + 1.0).ln()) / 10.0;
        let frequency = frequency.clamp(0.0, 1.0);

        let elapsed_ms = (now_ms - stats.last_seen_ms).max(0) as f64;
        let half_life = self.config.recency_half_life_ms.max(1) as f64;
        let recency = (-elapsed_ms * std::f64::consts::LN_2 / half_life).exp() as f32;

        let diversity = if self.total_queries == 0 {
            0.0
        } else {
            stats.distinct_queries as f32 / self.total_queries as f32
        };

        let alignment = match self.interest_embedding() {
            Some(interest) if !query_embedding.is_empty() => {
                (crate::math::cosine(&interest, query_embedding, None, None) + 1.0) / 2.0
            }
            _ => 0.5,
        };

        let f = (frequency + recency + diversity + alignment) / 4.0;
        (1.0 + ALPHA * (f - 0.5)).clamp(0.8, 1.2)
    }

    /// `(positive, negative)` feedback tally recorded for `id` via
    /// [`Self::record_feedback`] (spec.md §3 `feedbackByEntry`).
    pub fn entry_feedback(&self, id: &VolumeId) -> (u32, u32) {
        self.entry_stats.get(id).map(|s| (s.positive_feedback, s.negative_feedback)).unwrap_or((0, 0))
    }

    /// Drops feedback/usage stats for ids no longer present in the store.
    pub fn prune_entries(&mut self, live_ids: &std::collections::HashSet<VolumeId>) {
        self.entry_stats.retain(|id, _| live_ids.contains(id));
    }

    pub fn snapshot(&self) -> crate::storage::codec::LearningSnapshot {
        use crate::storage::codec::{FeedbackEntry, LearningSnapshot, LearningWeights, QueryHistoryEntry as CodecEntry};
        LearningSnapshot {
            total_queries: self.total_queries,
            weights: Some(LearningWeights {
                vector: self.weights.vector,
                recency: self.weights.recency,
                frequency: self.weights.frequency,
                text: self.weights.text,
            }),
            history: self
                .query_history
                .iter()
                .map(|e| CodecEntry { embedding: e.embedding.clone(), retrieved: e.retrieved.clone() })
                .collect(),
            feedback: self
                .entry_stats
                .iter()
                .map(|(id, s)| crate::storage::codec::FeedbackEntry {
                    id: id.clone(),
                    total_retrievals: s.total_retrievals,
                    query_count: s.distinct_queries,
                    first_seen_ms: s.first_seen_ms,
                    last_seen_ms: s.last_seen_ms,
                })
                .collect::<Vec<FeedbackEntry>>(),
        }
    }

    pub fn restore(config: LearningConfig, snapshot: crate::storage::codec::LearningSnapshot) -> Self {
        let mut engine = Self::new(config);
        engine.total_queries = snapshot.total_queries;
        if let Some(w) = snapshot.weights {
            engine.weights = AdaptedWeights { vector: w.vector, recency: w.recency, frequency: w.frequency, text: w.text };
        }
        for entry in snapshot.history {
            engine.query_history.push_back(QueryHistoryEntry { embedding: entry.embedding, retrieved: entry.retrieved });
        }
        for f in snapshot.feedback {
            engine.entry_stats.insert(
                f.id,
                EntryStats {
                    total_retrievals: f.total_retrievals,
                    distinct_queries: f.query_count,
                    first_seen_ms: f.first_seen_ms,
                    last_seen_ms: f.last_seen_ms,
                },
            );
        }
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_embedding_or_results_are_ignored() {
        let mut engine = LearningEngine::new(LearningConfig::default());
        engine.record_query(&[], &["a".to_string()], 0);
        engine.record_query(&[1.0], &[], 0);
        assert_eq!(engine.total_queries(), 0);
    }

    #[test]
    fn weights_always_sum_to_one_after_adaptation() {
        let mut config = LearningConfig::default();
        config.adapt_every = 1;
        let mut engine = LearningEngine::new(config);
        for _ in 0..20 {
            engine.record_feedback(&"a".to_string(), true);
            engine.record_query(&[1.0, 0.0], &["a".to_string()], 0);
        }
        let w = engine.weights();
        let sum = w.vector + w.recency + w.frequency + w.text;
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn record_feedback_is_credited_to_the_given_entry() {
        let mut engine = LearningEngine::new(LearningConfig::default());
        engine.record_feedback(&"a".to_string(), true);
        engine.record_feedback(&"a".to_string(), false);
        engine.record_feedback(&"b".to_string(), true);
        assert_eq!(engine.entry_feedback(&"a".to_string()), (1, 1));
        assert_eq!(engine.entry_feedback(&"b".to_string()), (1, 0));
        assert_eq!(engine.entry_feedback(&"c".to_string()), (0, 0));
    }

    #[test]
    fn disabled_engine_boost_is_always_one() {
        let config = LearningConfig { enabled: false, ..Default::default() };
        let engine = LearningEngine::new(config);
        assert_eq!(engine.compute_boost(&"a".to_string(), &[1.0], 0), 1.0);
    }

    #[test]
    fn boost_is_clamped_to_expected_range() {
        let mut engine = LearningEngine::new(LearningConfig::default());
        engine.record_query(&[1.0, 0.0], &["a".to_string()], 0);
        let boost = engine.compute_boost(&"a".to_string(), &[1.0, 0.0], 1000);
        assert!((0.8..=1.2).contains(&boost));
    }

    #[test]
    fn prune_entries_drops_dead_ids() {
        let mut engine = LearningEngine::new(LearningConfig::default());
        engine.record_query(&[1.0], &["a".to_string()], 0);
        let live = std::collections::HashSet::new();
        engine.prune_entries(&live);
        assert_eq!(engine.compute_boost(&"a".to_string(), &[1.0], 0), 1.0);
    }

    #[test]
    fn snapshot_restore_round_trips_total_queries() {
        let mut engine = LearningEngine::new(LearningConfig::default());
        engine.record_query(&[1.0], &["a".to_string()], 0);
        let snap = engine.snapshot();
        let restored = LearningEngine::restore(LearningConfig::default(), snap);
        assert_eq!(restored.total_queries(), 1);
    }
}
