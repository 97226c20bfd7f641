//! Hierarchical topic catalog (spec.md §4.4, component C4)

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::text::levenshtein_similarity;
use crate::VolumeId;

/// Default acceptance threshold for fuzzy topic resolution.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;

#[derive(Debug, Default)]
pub struct TopicCatalog {
    topic_to_volumes: HashMap<String, BTreeSet<VolumeId>>,
    volume_to_topic: HashMap<VolumeId, String>,
    alias_to_canonical: HashMap<String, String>,
    children: HashMap<String, HashSet<String>>,
    similarity_threshold: f32,
}

fn normalize_path(s: &str) -> String {
    s.trim().to_lowercase()
}

fn parent_of(topic: &str) -> Option<String> {
    topic.rfind('/').map(|idx| topic[..idx].to_string())
}

impl TopicCatalog {
    pub fn new() -> Self {
        Self { similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD, ..Default::default() }
    }

    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Auto-materializes every ancestor path of `topic` (spec.md §4.4:
    /// "parents are auto-materialized on insert").
    fn ensure_materialized(&mut self, topic: &str) {
        self.topic_to_volumes.entry(topic.to_string()).or_default();
        let mut current = topic.to_string();
        while let Some(parent) = parent_of(&current) {
            self.topic_to_volumes.entry(parent.clone()).or_default();
            self.children.entry(parent.clone()).or_default().insert(current.clone());
            current = parent;
        }
    }

    /// Resolves a proposed topic name to its canonical path, per the policy
    /// in spec.md §4.4: alias lookup, exact match, fuzzy match above
    /// `similarityThreshold` (ties broken by shortest path then
    /// lexicographic), else register as new.
    pub fn resolve(&mut self, proposed: &str) -> String {
        let proposed = normalize_path(proposed);

        if let Some(canonical) = self.alias_to_canonical.get(&proposed) {
            return canonical.clone();
        }
        if self.topic_to_volumes.contains_key(&proposed) {
            return proposed;
        }

        let mut best: Option<(String, f32)> = None;
        for existing in self.topic_to_volumes.keys() {
            let sim = levenshtein_similarity(&proposed, existing);
            if sim < self.similarity_threshold {
                continue;
            }
            best = Some(match best {
                None => (existing.clone(), sim),
                Some((cur, cur_sim)) => {
                    if sim > cur_sim
                        || (sim == cur_sim
                            && (existing.len(), existing) < (cur.len(), &cur))
                    {
                        (existing.clone(), sim)
                    } else {
                        (cur, cur_sim)
                    }
                }
            });
        }
        if let Some((canonical, _)) = best {
            return canonical;
        }

        self.ensure_materialized(&proposed);
        proposed
    }

    /// Canonicalizes `topic`, removes `volume_id` from any previous topic,
    /// and inserts it under the new one.
    pub fn register_volume(&mut self, volume_id: &VolumeId, topic: &str) -> String {
        let canonical = self.resolve(topic);
        self.remove_volume(volume_id);
        self.topic_to_volumes.entry(canonical.clone()).or_default().insert(volume_id.clone());
        self.volume_to_topic.insert(volume_id.clone(), canonical.clone());
        canonical
    }

    pub fn remove_volume(&mut self, volume_id: &VolumeId) {
        if let Some(old) = self.volume_to_topic.remove(volume_id) {
            if let Some(set) = self.topic_to_volumes.get_mut(&old) {
                set.remove(volume_id);
            }
        }
    }

    /// Removes then re-registers under a new topic (spec.md §4.4).
    pub fn relocate(&mut self, volume_id: &VolumeId, new_topic: &str) -> String {
        self.register_volume(volume_id, new_topic)
    }

    pub fn topic_of(&self, volume_id: &VolumeId) -> Option<&str> {
        self.volume_to_topic.get(volume_id).map(|s| s.as_str())
    }

    /// Moves all volumes from `src` to `tgt`, then aliases `src -> tgt`.
    pub fn merge(&mut self, src: &str, tgt: &str) {
        let src = normalize_path(src);
        let tgt_canonical = self.resolve(tgt);
        let members: Vec<VolumeId> = self
            .topic_to_volumes
            .get(&src)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        for id in members {
            self.register_volume(&id, &tgt_canonical);
        }
        self.alias_to_canonical.insert(src, tgt_canonical);
    }

    pub fn add_alias(&mut self, alias: &str, canonical: &str) {
        self.alias_to_canonical.insert(normalize_path(alias), normalize_path(canonical));
    }

    /// Returns every volume under `topic` **and all descendants**.
    pub fn filter_by_topic(&self, topic: &str) -> BTreeSet<VolumeId> {
        let topic = normalize_path(topic);
        let mut out = BTreeSet::new();
        let mut stack = vec![topic.clone()];
        let mut seen = HashSet::new();
        while let Some(t) = stack.pop() {
            if !seen.insert(t.clone()) {
                continue;
            }
            if let Some(members) = self.topic_to_volumes.get(&t) {
                out.extend(members.iter().cloned());
            }
            if let Some(kids) = self.children.get(&t) {
                stack.extend(kids.iter().cloned());
            }
        }
        out
    }

    pub fn known_topics(&self) -> impl Iterator<Item = &str> {
        self.topic_to_volumes.keys().map(|s| s.as_str())
    }
}
