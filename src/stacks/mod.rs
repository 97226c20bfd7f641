//! Stacks — the vector store core (spec.md §4.6, component C10)
//!
//! Owns volumes, magnitudes, every index, access stats, and the learning
//! engine handle. Coordinates add/delete/search/recommend/duplicate
//! detection and tracks dirty state for the facade's auto-save timer.

pub mod search;

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;

use crate::error::{ErrorKind, LibraryError};
use crate::index::{InvertedIndex, MetadataFilter, MetadataIndex, TopicCatalog};
use crate::learning::{LearningConfig, LearningEngine};
use crate::math::cosine;
use crate::storage::codec::{AccessRecord, LearningSnapshot, TopicsSnapshot, VolumeRecord};
use crate::storage::StorageBackend;
use crate::Result;
use crate::VolumeId;

/// The atomic stored unit (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub id: VolumeId,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: HashMap<String, String>,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessStats {
    pub hits: u32,
    pub last_hit_ms: i64,
}

/// `{volume, score}` returned by vector/text/advanced search.
#[derive(Debug, Clone)]
pub struct ScoredVolume {
    pub volume: Volume,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub similarity: f32,
    pub volume_id: Option<VolumeId>,
}

#[derive(Debug, Clone, Default)]
pub struct StacksConfig {
    pub duplicate_threshold: f32,
    pub learning: LearningConfig,
}

/// Report returned from [`Stacks::load`] (SPEC_FULL.md §4 supplement:
/// "Graceful partial load diagnostics").
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub entries: usize,
    pub warnings: Vec<String>,
}

pub struct Stacks {
    volumes: HashMap<VolumeId, Volume>,
    magnitudes: HashMap<VolumeId, f32>,
    inverted: InvertedIndex,
    topics: TopicCatalog,
    metadata_index: MetadataIndex,
    access_stats: HashMap<VolumeId, AccessStats>,
    learning: LearningEngine,
    dimension: Option<usize>,
    config: StacksConfig,
    dirty: bool,
    insertion_seq: u64,
    insertion_order: HashMap<VolumeId, u64>,
}

impl Stacks {
    pub fn new(config: StacksConfig) -> Self {
        Self {
            volumes: HashMap::new(),
            magnitudes: HashMap::new(),
            inverted: InvertedIndex::new(),
            topics: TopicCatalog::new(),
            metadata_index: MetadataIndex::new(),
            access_stats: HashMap::new(),
            learning: LearningEngine::new(config.learning.clone()),
            dimension: None,
            config,
            dirty: false,
            insertion_seq: 0,
            insertion_order: HashMap::new(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn get(&self, id: &VolumeId) -> Option<&Volume> {
        self.volumes.get(id)
    }

    pub fn learning(&self) -> &LearningEngine {
        &self.learning
    }

    pub fn learning_mut(&mut self) -> &mut LearningEngine {
        &mut self.learning
    }

    fn next_timestamp(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    // ========================================================================
    // load / save
    // ========================================================================

    /// Reconstructs volumes, indices, access stats, and the learning profile
    /// from a storage snapshot. Corrupt/absent bytes degrade to an empty
    /// store (spec.md §4.6): never fatal.
    pub fn load(&mut self, backend: &dyn StorageBackend) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let snapshot = match backend.load() {
            Ok(s) => s,
            Err(e) => {
                report.warnings.push(format!("storage load failed: {e}"));
                return Ok(report);
            }
        };

        if let Some(bytes) = snapshot.get("volumes.bin") {
            match crate::storage::codec::decode_volumes(bytes) {
                Ok(records) => {
                    for r in records {
                        self.restore_volume(r);
                    }
                }
                Err(e) => report.warnings.push(format!("volumes.bin corrupt: {e}")),
            }
        }

        if let Some(bytes) = snapshot.get("access.bin") {
            match crate::storage::codec::decode_access(bytes) {
                Ok(records) => {
                    for r in records {
                        self.access_stats
                            .insert(r.id, AccessStats { hits: r.hits, last_hit_ms: r.last_hit_ms as i64 });
                    }
                }
                Err(e) => report.warnings.push(format!("access.bin corrupt: {e}")),
            }
        }

        if let Some(bytes) = snapshot.get("topics.bin") {
            match crate::storage::codec::decode_topics(bytes) {
                Ok(snap) => self.restore_topics(snap),
                Err(e) => report.warnings.push(format!("topics.bin corrupt: {e}")),
            }
        }

        if let Some(bytes) = snapshot.get("learning.bin") {
            match crate::storage::codec::decode_learning(bytes) {
                Ok(snap) => {
                    self.learning = LearningEngine::restore(self.config.learning.clone(), snap)
                }
                Err(e) => report.warnings.push(format!("learning.bin corrupt: {e}")),
            }
        }

        report.entries = self.volumes.len();
        self.dirty = false;
        Ok(report)
    }

    fn restore_volume(&mut self, r: VolumeRecord) {
        let seq = self.insertion_seq;
        self.insertion_seq += 1;
        self.insertion_order.insert(r.id.clone(), seq);
        self.dimension.get_or_insert(r.embedding.len());
        self.magnitudes.insert(r.id.clone(), crate::math::magnitude(&r.embedding));
        self.inverted.add(&r.id, &r.text);
        let metadata: HashMap<String, String> = r.metadata.into_iter().collect();
        self.metadata_index.add(&r.id, &metadata);
        if let Some(topic) = metadata.get("topic") {
            self.topics.register_volume(&r.id, topic);
        }
        self.volumes.insert(
            r.id.clone(),
            Volume { id: r.id, text: r.text, embedding: r.embedding, metadata, timestamp_ms: r.timestamp_ms as i64 },
        );
    }

    fn restore_topics(&mut self, snap: TopicsSnapshot) {
        for (alias, canonical) in snap.aliases {
            self.topics.add_alias(&alias, &canonical);
        }
        for (id, topic) in snap.volume_map {
            self.topics.register_volume(&id, &topic);
        }
    }

    /// Serializes the full in-memory state and hands it to `backend.save`.
    /// Atomicity of the individual files is the backend's responsibility
    /// (spec.md §4.6: "Writes are atomic").
    pub fn flush(&mut self, backend: &dyn StorageBackend) -> Result<()> {
        let mut snapshot = HashMap::new();

        let volume_records: Vec<VolumeRecord> = self
            .volumes
            .values()
            .map(|v| VolumeRecord {
                id: v.id.clone(),
                text: v.text.clone(),
                embedding: v.embedding.clone(),
                timestamp_ms: v.timestamp_ms as u64,
                metadata: v.metadata.clone().into_iter().collect::<BTreeMap<_, _>>(),
            })
            .collect();
        snapshot.insert("volumes.bin".to_string(), crate::storage::codec::encode_volumes(&volume_records));

        let access_records: Vec<AccessRecord> = self
            .access_stats
            .iter()
            .map(|(id, s)| AccessRecord { id: id.clone(), hits: s.hits, last_hit_ms: s.last_hit_ms as u64 })
            .collect();
        snapshot.insert("access.bin".to_string(), crate::storage::codec::encode_access(&access_records));

        let topics_snapshot = TopicsSnapshot {
            topics: Vec::new(),
            aliases: Vec::new(),
            volume_map: self
                .volumes
                .keys()
                .filter_map(|id| self.topics.topic_of(id).map(|t| (id.clone(), t.to_string())))
                .collect(),
        };
        snapshot.insert("topics.bin".to_string(), crate::storage::codec::encode_topics(&topics_snapshot));

        let learning_snapshot: LearningSnapshot = self.learning.snapshot();
        snapshot.insert("learning.bin".to_string(), crate::storage::codec::encode_learning(&learning_snapshot));

        backend.save(snapshot)?;
        self.dirty = false;
        Ok(())
    }

    // ========================================================================
    // mutation
    // ========================================================================

    /// Validates and inserts a volume, updating every index. The first add
    /// fixes the store's embedding dimension (spec.md §3).
    pub fn add(&mut self, text: String, embedding: Vec<f32>, metadata: HashMap<String, String>) -> Result<VolumeId> {
        if text.trim().is_empty() {
            return Err(LibraryError::new(ErrorKind::MemoryEmptyText, "volume text must not be empty"));
        }
        if embedding.is_empty() {
            return Err(LibraryError::new(ErrorKind::EmbeddingFailure, "embedding must not be empty"));
        }
        let dim = *self.dimension.get_or_insert(embedding.len());
        if embedding.len() != dim {
            return Err(LibraryError::new(
                ErrorKind::ConfigValidation,
                format!("embedding dimension mismatch: expected {dim}, got {}", embedding.len()),
            ));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let timestamp_ms = self.next_timestamp();
        self.insert_volume(id.clone(), text, embedding, metadata, timestamp_ms);
        Ok(id)
    }

    fn insert_volume(
        &mut self,
        id: VolumeId,
        text: String,
        embedding: Vec<f32>,
        metadata: HashMap<String, String>,
        timestamp_ms: i64,
    ) {
        self.magnitudes.insert(id.clone(), crate::math::magnitude(&embedding));
        self.inverted.add(&id, &text);
        self.metadata_index.add(&id, &metadata);
        if let Some(topic) = metadata.get("topic") {
            self.topics.register_volume(&id, topic);
        }
        let seq = self.insertion_seq;
        self.insertion_seq += 1;
        self.insertion_order.insert(id.clone(), seq);
        self.volumes.insert(id.clone(), Volume { id, text, embedding, metadata, timestamp_ms });
        self.dirty = true;
    }

    /// All-or-nothing at the validation boundary (spec.md §4.6): the first
    /// invalid entry rejects the whole batch before anything is inserted.
    pub fn add_batch(
        &mut self,
        items: Vec<(String, Vec<f32>, HashMap<String, String>)>,
    ) -> Result<Vec<VolumeId>> {
        for (i, (text, embedding, _)) in items.iter().enumerate() {
            if text.trim().is_empty() {
                return Err(LibraryError::new(ErrorKind::MemoryEmptyText, "empty text in batch").with_batch_index(i));
            }
            if embedding.is_empty() {
                return Err(LibraryError::new(ErrorKind::EmbeddingFailure, "empty embedding in batch").with_batch_index(i));
            }
        }
        let mut ids = Vec::with_capacity(items.len());
        for (text, embedding, metadata) in items {
            ids.push(self.add(text, embedding, metadata)?);
        }
        Ok(ids)
    }

    /// Removes a volume from every index; returns `false` if unknown.
    pub fn delete(&mut self, id: &VolumeId) -> bool {
        let Some(_volume) = self.volumes.remove(id) else { return false };
        self.magnitudes.remove(id);
        self.inverted.delete(id);
        self.metadata_index.delete(id);
        self.topics.remove_volume(id);
        self.access_stats.remove(id);
        self.insertion_order.remove(id);
        self.dirty = true;
        true
    }

    pub fn delete_batch(&mut self, ids: &[VolumeId]) -> usize {
        ids.iter().filter(|id| self.delete(id)).count()
    }

    /// Topic change: remove then re-register under the new topic, updating
    /// both the volume's stored metadata and the topic catalog.
    pub fn relocate(&mut self, id: &VolumeId, new_topic: &str) -> Result<()> {
        if !self.volumes.contains_key(id) {
            return Err(LibraryError::new(ErrorKind::MemoryEntryNotFound, format!("unknown volume: {id}")));
        }
        let canonical = self.topics.relocate(id, new_topic);
        if let Some(v) = self.volumes.get_mut(id) {
            v.metadata.insert("topic".to_string(), canonical);
        }
        self.dirty = true;
        Ok(())
    }

    /// Moves every volume under `src` to `tgt` and aliases `src -> tgt`
    /// (spec.md §4.4 `merge`; surfaced here for the Desk's optimization and
    /// reorganization plan application, spec.md §4.12).
    pub fn merge_topics(&mut self, src: &str, tgt: &str) {
        self.topics.merge(src, tgt);
        for id in self.filter_by_topic(tgt) {
            if let Some(v) = self.volumes.get_mut(&id) {
                v.metadata.insert("topic".to_string(), tgt.to_string());
            }
        }
        self.dirty = true;
    }

    /// Materializes an empty topic (and its ancestors) with no volumes yet
    /// attached, for a reorganization plan's `newSubtopics` (spec.md §4.12).
    pub fn register_topic(&mut self, topic: &str) -> String {
        let canonical = self.topics.resolve(topic);
        self.dirty = true;
        canonical
    }

    pub fn clear(&mut self) {
        self.volumes.clear();
        self.magnitudes.clear();
        self.inverted = InvertedIndex::new();
        self.topics = TopicCatalog::new();
        self.metadata_index = MetadataIndex::new();
        self.access_stats.clear();
        self.insertion_order.clear();
        self.dirty = true;
    }

    fn record_hit(&mut self, id: &VolumeId, now_ms: i64) {
        let stats = self.access_stats.entry(id.clone()).or_default();
        stats.hits += 1;
        stats.last_hit_ms = now_ms;
    }

    // ========================================================================
    // search
    // ========================================================================

    fn tie_break_key(&self, id: &VolumeId, timestamp_ms: i64) -> (i64, u64) {
        (timestamp_ms, self.insertion_order.get(id).copied().unwrap_or(0))
    }

    /// Cosine search against every entry (linear scan), filtered by
    /// `score >= threshold`, top-k with stable tie-break by later timestamp
    /// then larger insertion order (spec.md §4.6).
    pub fn search(&mut self, query: &[f32], k: usize, threshold: f32) -> Vec<ScoredVolume> {
        let now_ms = self.next_timestamp();
        let mut scored: Vec<(VolumeId, f32)> = self
            .volumes
            .values()
            .map(|v| {
                let mag = self.magnitudes.get(&v.id).copied();
                (v.id.clone(), cosine(query, &v.embedding, None, mag))
            })
            .filter(|(_, score)| *score >= threshold)
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| {
                let ta = self.volumes.get(&a.0).map(|v| v.timestamp_ms).unwrap_or(0);
                let tb = self.volumes.get(&b.0).map(|v| v.timestamp_ms).unwrap_or(0);
                self.tie_break_key(&b.0, tb).cmp(&self.tie_break_key(&a.0, ta))
            })
        });
        scored.truncate(k);

        let mut out = Vec::with_capacity(scored.len());
        let mut retrieved_ids = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            self.record_hit(&id, now_ms);
            if let Some(v) = self.volumes.get(&id) {
                out.push(ScoredVolume { volume: v.clone(), score });
                retrieved_ids.push(id);
            }
        }
        self.learning.record_query(query, &retrieved_ids, now_ms);
        self.dirty = true;
        out
    }

    /// Nearest-neighbor duplicate check (spec.md §4.6). Disabled entirely
    /// when `duplicate_threshold == 0.0`.
    pub fn check_duplicate(&self, embedding: &[f32]) -> DuplicateCheck {
        if self.config.duplicate_threshold <= 0.0 {
            return DuplicateCheck { is_duplicate: false, similarity: 0.0, volume_id: None };
        }
        let best = self
            .volumes
            .values()
            .map(|v| {
                let mag = self.magnitudes.get(&v.id).copied();
                (v.id.clone(), cosine(embedding, &v.embedding, None, mag))
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        match best {
            Some((id, sim)) if sim >= self.config.duplicate_threshold => {
                DuplicateCheck { is_duplicate: true, similarity: sim, volume_id: Some(id) }
            }
            Some((_, sim)) => DuplicateCheck { is_duplicate: false, similarity: sim, volume_id: None },
            None => DuplicateCheck { is_duplicate: false, similarity: 0.0, volume_id: None },
        }
    }

    /// Union-find over pairs with cosine similarity `>= threshold`; returns
    /// groups of size `>= 2` (spec.md §4.6 / §8 invariant).
    pub fn find_duplicates(&self, threshold: f32) -> Vec<Vec<VolumeId>> {
        let ids: Vec<VolumeId> = self.volumes.keys().cloned().collect();
        let mut parent: HashMap<VolumeId, VolumeId> = ids.iter().map(|id| (id.clone(), id.clone())).collect();

        fn find(parent: &mut HashMap<VolumeId, VolumeId>, id: &VolumeId) -> VolumeId {
            let p = parent.get(id).cloned().unwrap();
            if &p == id {
                return p;
            }
            let root = find(parent, &p);
            parent.insert(id.clone(), root.clone());
            root
        }

        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let a = &self.volumes[&ids[i]];
                let b = &self.volumes[&ids[j]];
                let sim = cosine(
                    &a.embedding,
                    &b.embedding,
                    self.magnitudes.get(&a.id).copied(),
                    self.magnitudes.get(&b.id).copied(),
                );
                if sim >= threshold {
                    let ra = find(&mut parent, &ids[i]);
                    let rb = find(&mut parent, &ids[j]);
                    if ra != rb {
                        parent.insert(ra, rb);
                    }
                }
            }
        }

        let mut groups: HashMap<VolumeId, Vec<VolumeId>> = HashMap::new();
        for id in &ids {
            let root = find(&mut parent, id);
            groups.entry(root).or_default().push(id.clone());
        }
        groups.into_values().filter(|g| g.len() >= 2).collect()
    }

    pub fn filter_by_metadata(&self, filters: &[MetadataFilter]) -> HashSet<VolumeId> {
        self.metadata_index.filter(filters).into_iter().collect()
    }

    pub fn filter_by_date_range(&self, from_ms: Option<i64>, to_ms: Option<i64>) -> HashSet<VolumeId> {
        self.volumes
            .values()
            .filter(|v| from_ms.is_none_or(|f| v.timestamp_ms >= f) && to_ms.is_none_or(|t| v.timestamp_ms <= t))
            .map(|v| v.id.clone())
            .collect()
    }

    pub fn filter_by_topic(&self, topic: &str) -> HashSet<VolumeId> {
        self.topics.filter_by_topic(topic).into_iter().collect()
    }

    pub fn volumes_under_topic_count(&self, topic: &str) -> usize {
        self.filter_by_topic(topic).len()
    }

    pub fn most_populous_topic(&self) -> Option<String> {
        self.topics
            .known_topics()
            .map(|t| (t.to_string(), self.filter_by_topic(t).len()))
            .max_by_key(|(_, count)| *count)
            .map(|(t, _)| t)
    }

    pub fn all_ids(&self) -> HashSet<VolumeId> {
        self.volumes.keys().cloned().collect()
    }

    pub fn access_stats(&self, id: &VolumeId) -> AccessStats {
        self.access_stats.get(id).copied().unwrap_or_default()
    }

    pub(crate) fn inverted_index(&self) -> &InvertedIndex {
        &self.inverted
    }

    pub(crate) fn insertion_order_of(&self, id: &VolumeId) -> u64 {
        self.insertion_order.get(id).copied().unwrap_or(0)
    }

    pub(crate) fn magnitude_of(&self, id: &VolumeId) -> Option<f32> {
        self.magnitudes.get(id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FileBackend;

    fn meta(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn add_sets_dimension_and_rejects_mismatched_later_adds() {
        let mut stacks = Stacks::new(StacksConfig::default());
        stacks.add("hello".into(), vec![1.0, 2.0], HashMap::new()).unwrap();
        let err = stacks.add("world".into(), vec![1.0, 2.0, 3.0], HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigValidation);
    }

    #[test]
    fn add_rejects_empty_text() {
        let mut stacks = Stacks::new(StacksConfig::default());
        let err = stacks.add("   ".into(), vec![1.0], HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryEmptyText);
    }

    #[test]
    fn add_batch_rejects_whole_batch_on_one_bad_entry() {
        let mut stacks = Stacks::new(StacksConfig::default());
        let items = vec![
            ("good".to_string(), vec![1.0], HashMap::new()),
            ("".to_string(), vec![1.0], HashMap::new()),
        ];
        let err = stacks.add_batch(items).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryEmptyText);
        assert!(stacks.is_empty());
    }

    #[test]
    fn search_filters_by_threshold_and_respects_k() {
        let mut stacks = Stacks::new(StacksConfig::default());
        stacks.add("a".into(), vec![1.0, 0.0], HashMap::new()).unwrap();
        stacks.add("b".into(), vec![0.0, 1.0], HashMap::new()).unwrap();
        let results = stacks.search(&[1.0, 0.0], 10, 0.5);
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn duplicate_threshold_zero_disables_detection() {
        let mut stacks = Stacks::new(StacksConfig { duplicate_threshold: 0.0, ..Default::default() });
        stacks.add("TypeScript is great".into(), vec![1.0, 0.0], HashMap::new()).unwrap();
        let check = stacks.check_duplicate(&[1.0, 0.0]);
        assert!(!check.is_duplicate);
    }

    #[test]
    fn duplicate_detection_flags_near_identical_text() {
        let mut stacks = Stacks::new(StacksConfig { duplicate_threshold: 0.9, ..Default::default() });
        stacks.add("x".into(), vec![1.0, 0.0, 0.0], HashMap::new()).unwrap();
        let check = stacks.check_duplicate(&[0.99, 0.01, 0.0]);
        assert!(check.is_duplicate);
        assert!(check.similarity > 0.8);
    }

    #[test]
    fn find_duplicates_only_groups_pairs_above_threshold() {
        let mut stacks = Stacks::new(StacksConfig::default());
        stacks.add("a".into(), vec![1.0, 0.0], HashMap::new()).unwrap();
        stacks.add("b".into(), vec![1.0, 0.01], HashMap::new()).unwrap();
        stacks.add("c".into(), vec![0.0, 1.0], HashMap::new()).unwrap();
        let groups = stacks.find_duplicates(0.99);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn delete_removes_from_all_indices() {
        let mut stacks = Stacks::new(StacksConfig::default());
        let id = stacks.add("hello".into(), vec![1.0], meta(&[("topic", "a")])).unwrap();
        assert!(stacks.delete(&id));
        assert!(stacks.get(&id).is_none());
        assert!(!stacks.delete(&id));
    }

    #[test]
    fn metadata_between_filter_scenario() {
        let mut stacks = Stacks::new(StacksConfig::default());
        stacks.add("a".into(), vec![1.0], meta(&[("score", "10")])).unwrap();
        stacks.add("b".into(), vec![1.0], meta(&[("score", "5")])).unwrap();
        stacks.add("c".into(), vec![1.0], meta(&[("score", "1")])).unwrap();
        let result = stacks.filter_by_metadata(&[MetadataFilter {
            key: "score".into(),
            mode: crate::index::MetadataMode::Between("3".into(), "8".into()),
        }]);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn topic_hierarchy_scenario() {
        let mut stacks = Stacks::new(StacksConfig::default());
        let v1 = stacks.add("a".into(), vec![1.0], meta(&[("topic", "programming/rust/ownership")])).unwrap();
        let v2 = stacks.add("b".into(), vec![1.0], meta(&[("topic", "programming/python/async")])).unwrap();
        stacks.add("c".into(), vec![1.0], meta(&[("topic", "cooking/italian")])).unwrap();

        let programming = stacks.filter_by_topic("programming");
        assert_eq!(programming.len(), 2);
        assert!(programming.contains(&v1));
        assert!(programming.contains(&v2));

        let rust_only = stacks.filter_by_topic("programming/rust/ownership");
        assert_eq!(rust_only.len(), 1);
    }

    #[test]
    fn save_load_save_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path(), 6, true).unwrap();
        let mut stacks = Stacks::new(StacksConfig::default());
        stacks.add("hello world".into(), vec![1.0, 2.0], meta(&[("topic", "a")])).unwrap();
        stacks.flush(&backend).unwrap();

        let mut reloaded = Stacks::new(StacksConfig::default());
        reloaded.load(&backend).unwrap();
        assert_eq!(reloaded.len(), 1);

        let snap1 = backend.load().unwrap();
        reloaded.flush(&backend).unwrap();
        let snap2 = backend.load().unwrap();
        assert_eq!(snap1, snap2);
    }

    #[test]
    fn add_then_get_by_id_returns_equal_text_and_metadata() {
        let mut stacks = Stacks::new(StacksConfig::default());
        let id = stacks.add("remember this".into(), vec![1.0], meta(&[("k", "v")])).unwrap();
        let v = stacks.get(&id).unwrap();
        assert_eq!(v.text, "remember this");
        assert_eq!(v.metadata.get("k").unwrap(), "v");
    }
}
