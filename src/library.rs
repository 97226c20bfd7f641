//! Library facade + Query DSL (spec.md §4.7 / §4.8, component C11)
//!
//! `Library` is the one thing an embedding program talks to: it owns the
//! embedding provider capability, the storage backend, the [`Stacks`]
//! engine, the [`Registry`] of librarians, and the [`Desk`] job queue, and
//! wires them together the way the teacher's top-level client wires its
//! provider, its index, and its own background worker together.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::desk::{Desk, DeskConfig, Job, JobContext};
use crate::error::{ErrorKind, LibraryError};
use crate::index::{MetadataFilter, MetadataMode};
use crate::learning::LearningConfig;
use crate::librarian::Registry;
use crate::logging::{default_logger, Level, Logger};
use crate::stacks::search::{
    AdvancedSearchOptions, FieldBoosts, RankBy, RankWeights, RecommendOptions, TextSearchOptions,
};
use crate::stacks::{DuplicateCheck, LoadReport, ScoredVolume, Stacks, StacksConfig};
use crate::storage::{FileBackend, StorageBackend};
use crate::text::TextMode;
use crate::Result;
use crate::VolumeId;

// ============================================================================
// Embedding provider capability
// ============================================================================

/// An embedding call can fail transiently (rate limit, network blip — worth
/// retrying) or permanently (bad input, unsupported model — not worth
/// retrying). Callers that wrap [`EmbeddingProvider`] in
/// [`crate::resilience::retry`] match on this distinction (spec.md §6).
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("transient embedding provider error: {0}")]
    Transient(String),
    #[error("permanent embedding provider error: {0}")]
    Permanent(String),
}

impl EmbeddingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbeddingError::Transient(_))
    }
}

/// The narrow capability the Library needs to turn text into vectors
/// (spec.md §6).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(
        &self,
        texts: &[String],
        model_hint: Option<&str>,
    ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError>;
}

// ============================================================================
// Configuration
// ============================================================================

/// How [`Library::remember`] reacts when the new entry is a near-duplicate
/// of an existing one (resolves the open question at spec.md §9: the
/// enumerated error kinds at §7 have no dedicated "duplicate" kind, so
/// `Error` maps to [`ErrorKind::MemoryDuplicate`], added for this purpose).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateBehavior {
    /// Return the existing volume's id without inserting a new one.
    #[default]
    Skip,
    /// Insert anyway, after logging a warning.
    Warn,
    /// Reject the call with [`ErrorKind::MemoryDuplicate`].
    Error,
}

#[derive(Debug, Clone)]
pub struct LibraryConfig {
    pub enabled: bool,
    pub similarity_threshold: f32,
    pub max_results: usize,
    pub storage_dir: std::path::PathBuf,
    pub auto_save: bool,
    pub duplicate_threshold: f32,
    pub duplicate_behavior: DuplicateBehavior,
    pub flush_interval_ms: u64,
    pub compression_level: u32,
    pub atomic_write: bool,
    pub auto_summarize_threshold: usize,
    pub learning: LearningConfig,
    pub desk: DeskConfig,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: 0.0,
            max_results: 10,
            storage_dir: std::path::PathBuf::from(".stacks"),
            auto_save: true,
            duplicate_threshold: 0.0,
            duplicate_behavior: DuplicateBehavior::default(),
            flush_interval_ms: 0,
            compression_level: 6,
            atomic_write: true,
            auto_summarize_threshold: 20,
            learning: LearningConfig::default(),
            desk: DeskConfig::default(),
        }
    }
}

// ============================================================================
// A read-only shelf view (SPEC_FULL.md supplement: tag-scoped browsing)
// ============================================================================

#[derive(Debug, Clone)]
pub struct VolumeView {
    pub id: VolumeId,
    pub text: String,
    pub metadata: HashMap<String, String>,
    pub timestamp_ms: i64,
}

// ============================================================================
// Query DSL (spec.md §4.8)
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ParsedQuery {
    pub text: Option<String>,
    pub metadata: Vec<MetadataFilter>,
    pub topic: Option<String>,
    pub min_score: Option<f32>,
}

/// Parses a whitespace-tokenized query expression: `text:QUERY`,
/// `metadata:KEY=VALUE` (repeatable, AND-combined), `topic:PATH`,
/// `minScore:N`. Unknown prefixes and bare tokens fold into the free-text
/// query (spec.md §4.8). The parser never fails outright — malformed
/// clauses are dropped and logged (spec.md §4.8: "tolerant; logs and
/// continues on a clause it cannot make sense of").
pub fn parse_query(query: &str, logger: &dyn Logger) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();
    let mut text_tokens: Vec<String> = Vec::new();

    for token in query.split_whitespace() {
        if let Some(rest) = token.strip_prefix("text:") {
            if !rest.is_empty() {
                text_tokens.push(rest.to_string());
            }
        } else if let Some(rest) = token.strip_prefix("metadata:") {
            match rest.split_once('=') {
                Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                    parsed.metadata.push(MetadataFilter { key: key.to_string(), mode: MetadataMode::Eq(value.to_string()) });
                }
                _ => logger.log(Level::Warn, &format!("query DSL: malformed metadata clause '{token}', dropping")),
            }
        } else if let Some(rest) = token.strip_prefix("topic:") {
            if !rest.is_empty() {
                parsed.topic = Some(rest.to_string());
            }
        } else if let Some(rest) = token.strip_prefix("minScore:") {
            match rest.parse::<f32>() {
                Ok(score) => parsed.min_score = Some(score),
                Err(_) => logger.log(Level::Warn, &format!("query DSL: invalid minScore '{rest}', ignoring")),
            }
        } else {
            text_tokens.push(token.to_string());
        }
    }

    if !text_tokens.is_empty() {
        parsed.text = Some(text_tokens.join(" "));
    }
    parsed
}

// ============================================================================
// Advanced search request (embeds lazily, unlike Stacks::advanced_search)
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct AdvancedSearchRequest {
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

// ============================================================================
// Library
// ============================================================================

/// The public facade (spec.md §4.7, component C11).
pub struct Library {
    config: LibraryConfig,
    embeddings: Arc<dyn EmbeddingProvider>,
    storage: Arc<dyn StorageBackend>,
    stacks: Stacks,
    desk: Desk,
    registry: Registry,
    logger: Arc<dyn Logger>,
    last_flush_ms: i64,
    disposed: bool,
}

impl Library {
    /// Opens a library against an already-constructed storage backend,
    /// loading whatever snapshot is present (spec.md §4.6: corrupt/absent
    /// data degrades to an empty store rather than failing `open`).
    pub fn open(
        config: LibraryConfig,
        embeddings: Arc<dyn EmbeddingProvider>,
        storage: Arc<dyn StorageBackend>,
        registry: Registry,
        logger: Option<Arc<dyn Logger>>,
    ) -> Result<(Self, LoadReport)> {
        let logger = logger.unwrap_or_else(default_logger);
        let stacks_config = StacksConfig { duplicate_threshold: config.duplicate_threshold, learning: config.learning.clone() };
        let mut stacks = Stacks::new(stacks_config);
        let report = stacks.load(storage.as_ref())?;
        for warning in &report.warnings {
            logger.log(Level::Warn, warning);
        }
        let desk = Desk::new(config.desk.clone());
        Ok((
            Self { config, embeddings, storage, stacks, desk, registry, logger, last_flush_ms: 0, disposed: false },
            report,
        ))
    }

    /// Convenience constructor building a [`FileBackend`] from
    /// `config.storage_dir`/`compression_level`/`atomic_write` (spec.md §6).
    pub fn open_with_file_backend(
        config: LibraryConfig,
        embeddings: Arc<dyn EmbeddingProvider>,
        registry: Registry,
        logger: Option<Arc<dyn Logger>>,
    ) -> Result<(Self, LoadReport)> {
        let backend = FileBackend::new(config.storage_dir.as_path(), config.compression_level, config.atomic_write)?;
        Self::open(config, embeddings, Arc::new(backend), registry, logger)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn desk(&self) -> &Desk {
        &self.desk
    }

    pub fn stacks(&self) -> &Stacks {
        &self.stacks
    }

    /// Confirms or rejects that a retrieved entry was useful, feeding the
    /// learning engine's next weight adaptation (spec.md §4.9
    /// `recordFeedback(id, …)`).
    pub fn record_feedback(&mut self, id: &VolumeId, positive: bool) {
        self.stacks.learning_mut().record_feedback(id, positive);
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.disposed {
            return Err(LibraryError::new(ErrorKind::LibraryDisposed, "library has been disposed"));
        }
        Ok(())
    }

    /// Debounced auto-save: flushes immediately when `flush_interval_ms ==
    /// 0`, otherwise at most once per interval (spec.md §4.6). A simplified
    /// stand-in for a rearmed timer — this crate has no ambient scheduler of
    /// its own, so the debounce is checked on every mutating call instead.
    fn maybe_flush(&mut self) -> Result<()> {
        if !self.config.auto_save || !self.stacks.is_dirty() {
            return Ok(());
        }
        let now_ms = Utc::now().timestamp_millis();
        if self.config.flush_interval_ms == 0 || now_ms - self.last_flush_ms >= self.config.flush_interval_ms as i64 {
            self.stacks.flush(self.storage.as_ref())?;
            self.last_flush_ms = now_ms;
        }
        Ok(())
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embeddings.embed(std::slice::from_ref(&text.to_string()), None).await?;
        if vectors.is_empty() {
            return Err(LibraryError::new(ErrorKind::EmbeddingFailure, "embedding provider returned no vectors"));
        }
        Ok(vectors.remove(0))
    }

    // ========================================================================
    // remember
    // ========================================================================

    /// Embeds `text`, applies the configured duplicate policy, and stores it
    /// (spec.md §4.7).
    pub async fn remember(&mut self, text: &str, metadata: Option<HashMap<String, String>>) -> Result<VolumeId> {
        self.ensure_not_disposed()?;
        let embedding = self.embed_one(text).await?;
        self.store_with_duplicate_check(text.to_string(), embedding, metadata.unwrap_or_default())
    }

    /// All-or-nothing batch insert: every text is embedded first, then
    /// validated and inserted together (spec.md §4.6 batch contract). The
    /// embedding call itself is per-item so one failure doesn't force a
    /// single giant provider round trip to be retried wholesale.
    pub async fn remember_batch(
        &mut self,
        items: Vec<(String, Option<HashMap<String, String>>)>,
    ) -> Result<Vec<VolumeId>> {
        self.ensure_not_disposed()?;
        let mut ids = Vec::with_capacity(items.len());
        for (i, (text, metadata)) in items.into_iter().enumerate() {
            let embedding = self.embed_one(&text).await.map_err(|e| e.with_batch_index(i))?;
            ids.push(self.store_with_duplicate_check(text, embedding, metadata.unwrap_or_default())?);
        }
        Ok(ids)
    }

    fn store_with_duplicate_check(
        &mut self,
        text: String,
        embedding: Vec<f32>,
        metadata: HashMap<String, String>,
    ) -> Result<VolumeId> {
        if self.config.duplicate_threshold > 0.0 {
            let check: DuplicateCheck = self.stacks.check_duplicate(&embedding);
            if check.is_duplicate {
                match self.config.duplicate_behavior {
                    DuplicateBehavior::Skip => {
                        if let Some(id) = check.volume_id {
                            return Ok(id);
                        }
                    }
                    DuplicateBehavior::Warn => {
                        self.logger.log(
                            Level::Warn,
                            &format!("storing near-duplicate entry (similarity {:.3})", check.similarity),
                        );
                    }
                    DuplicateBehavior::Error => {
                        return Err(LibraryError::new(
                            ErrorKind::MemoryDuplicate,
                            format!("duplicate of {:?} (similarity {:.3})", check.volume_id, check.similarity),
                        ));
                    }
                }
            }
        }
        let id = self.stacks.add(text, embedding, metadata)?;
        self.maybe_flush()?;
        Ok(id)
    }

    // ========================================================================
    // search
    // ========================================================================

    /// Plain vector search (spec.md §4.7): an empty or whitespace-only query
    /// returns `[]` without ever calling the embedding provider; any other
    /// embedding failure is fatal.
    pub async fn search(&mut self, query: &str, k: usize) -> Result<Vec<ScoredVolume>> {
        self.ensure_not_disposed()?;
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embed_one(query).await?;
        let k = if k == 0 { self.config.max_results } else { k };
        Ok(self.stacks.search(&embedding, k, self.config.similarity_threshold))
    }

    pub fn text_search(&mut self, options: &TextSearchOptions) -> Result<Vec<ScoredVolume>> {
        self.ensure_not_disposed()?;
        self.stacks.text_search(options)
    }

    /// Combined vector+text+metadata+topic search (spec.md §4.10). Embeds
    /// `request.text` only when `query_embedding` is absent and a text query
    /// is present; unlike [`Library::search`], embedding failure here is
    /// non-fatal — it logs and falls back to text/metadata ranking alone.
    pub async fn advanced_search(&mut self, mut request: AdvancedSearchRequest) -> Result<Vec<ScoredVolume>> {
        self.ensure_not_disposed()?;
        if request.query_embedding.is_none() {
            if let Some(text) = request.text.clone() {
                match self.embed_one(&text).await {
                    Ok(embedding) => request.query_embedding = Some(embedding),
                    Err(e) => self.logger.log(
                        Level::Warn,
                        &format!("advanced search embedding failed, falling back to text/metadata only: {e}"),
                    ),
                }
            }
        }
        let options = AdvancedSearchOptions {
            query_embedding: request.query_embedding,
            text: request.text,
            text_mode: request.text_mode,
            metadata: request.metadata,
            date_range: request.date_range,
            topic_filter: request.topic_filter,
            max_results: request.max_results,
            rank_by: request.rank_by,
            rank_weights: request.rank_weights,
            field_boosts: request.field_boosts,
            similarity_threshold: request.similarity_threshold,
        };
        self.stacks.advanced_search(&options)
    }

    /// Embeds `query` and delegates to [`Stacks::recommend`] (spec.md
    /// §4.11).
    pub async fn recommend(&mut self, query: &str, mut options: RecommendOptions) -> Result<Vec<ScoredVolume>> {
        self.ensure_not_disposed()?;
        options.query_embedding = self.embed_one(query).await?;
        self.stacks.recommend(&options)
    }

    /// Parses `query_str` as the query DSL (spec.md §4.8) and runs it
    /// through [`Library::advanced_search`].
    pub async fn query(&mut self, query_str: &str) -> Result<Vec<ScoredVolume>> {
        self.ensure_not_disposed()?;
        let parsed = parse_query(query_str, self.logger.as_ref());
        let request = AdvancedSearchRequest {
            text: parsed.text,
            metadata: if parsed.metadata.is_empty() { None } else { Some(parsed.metadata) },
            topic_filter: parsed.topic,
            similarity_threshold: parsed.min_score,
            max_results: self.config.max_results,
            rank_by: RankBy::Average,
            ..Default::default()
        };
        self.advanced_search(request).await
    }

    // ========================================================================
    // filtering / duplicates / mutation
    // ========================================================================

    pub fn filter_by_metadata(&self, filters: &[MetadataFilter]) -> HashSet<VolumeId> {
        self.stacks.filter_by_metadata(filters)
    }

    pub fn filter_by_date_range(&self, from_ms: Option<i64>, to_ms: Option<i64>) -> HashSet<VolumeId> {
        self.stacks.filter_by_date_range(from_ms, to_ms)
    }

    pub fn filter_by_topic(&self, topic: &str) -> HashSet<VolumeId> {
        self.stacks.filter_by_topic(topic)
    }

    pub async fn check_duplicate(&mut self, text: &str) -> Result<DuplicateCheck> {
        self.ensure_not_disposed()?;
        let embedding = self.embed_one(text).await?;
        Ok(self.stacks.check_duplicate(&embedding))
    }

    pub fn find_duplicates(&self, threshold: f32) -> Vec<Vec<VolumeId>> {
        self.stacks.find_duplicates(threshold)
    }

    pub fn relocate(&mut self, id: &VolumeId, new_topic: &str) -> Result<()> {
        self.ensure_not_disposed()?;
        self.stacks.relocate(id, new_topic)?;
        self.maybe_flush()
    }

    pub fn delete(&mut self, id: &VolumeId) -> Result<bool> {
        self.ensure_not_disposed()?;
        let removed = self.stacks.delete(id);
        self.maybe_flush()?;
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.ensure_not_disposed()?;
        self.stacks.clear();
        self.maybe_flush()
    }

    /// Every volume tagged with `tag` (SPEC_FULL.md supplement: a read-only
    /// browsing view, not part of the distilled search surface).
    pub fn shelf(&self, tag: &str) -> Vec<VolumeView> {
        let filter = MetadataFilter { key: "tag".to_string(), mode: MetadataMode::Eq(tag.to_string()) };
        self.stacks
            .filter_by_metadata(std::slice::from_ref(&filter))
            .into_iter()
            .filter_map(|id| self.stacks.get(&id))
            .map(|v| VolumeView { id: v.id.clone(), text: v.text.clone(), metadata: v.metadata.clone(), timestamp_ms: v.timestamp_ms })
            .collect()
    }

    // ========================================================================
    // prompt enrichment / after-response hook (spec.md §4.7)
    // ========================================================================

    /// Runs a best-effort search over `context_query` and appends a bounded
    /// context block to `base_prompt`. Any failure — embedding, empty
    /// results — returns `base_prompt` unmodified (spec.md §4.7).
    pub async fn enrich_system_prompt(&mut self, base_prompt: &str, context_query: &str) -> String {
        match self.search(context_query, self.config.max_results).await {
            Ok(hits) if !hits.is_empty() => {
                let mut block = String::from("\n\n[Relevant memory]\n");
                for hit in hits.iter().take(5) {
                    block.push_str("- ");
                    block.push_str(&hit.volume.text);
                    block.push('\n');
                }
                format!("{base_prompt}{block}")
            }
            Ok(_) => base_prompt.to_string(),
            Err(e) => {
                self.logger.log(Level::Warn, &format!("enrichSystemPrompt search failed, returning prompt unmodified: {e}"));
                base_prompt.to_string()
            }
        }
    }

    /// Returns early on an empty or error-looking `response`; otherwise
    /// enqueues an extraction job on the Circulation Desk (spec.md §4.7 /
    /// §4.12). Enqueuing never fails — back-pressure is logged, not
    /// propagated.
    pub fn after_response(&mut self, user_input: &str, response: &str) {
        if self.disposed {
            return;
        }
        let trimmed = response.trim();
        if trimmed.is_empty() || looks_like_error(trimmed) {
            return;
        }
        self.desk.enqueue(
            Job::Extraction { user_input: user_input.to_string(), response: response.to_string() },
            self.logger.as_ref(),
        );
    }

    /// Drains the Circulation Desk's queue, driving one cooperative step per
    /// pending job (spec.md §5: the Desk has no background task of its own —
    /// the embedding program's own event loop is expected to call this).
    pub async fn drain_desk(&mut self) -> Result<()> {
        self.ensure_not_disposed()?;
        let mut ctx = JobContext {
            stacks: &mut self.stacks,
            storage: self.storage.as_ref(),
            registry: &mut self.registry,
            embeddings: self.embeddings.as_ref(),
            logger: self.logger.as_ref(),
        };
        self.desk.drain(&mut ctx).await;
        self.maybe_flush()
    }

    /// Cancels pending desk work, flushes if dirty, and closes storage.
    /// Idempotent; every other method fails with [`ErrorKind::LibraryDisposed`]
    /// afterward (spec.md §5: "dispose() is terminal").
    pub async fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        self.desk.dispose();
        if self.stacks.is_dirty() {
            self.stacks.flush(self.storage.as_ref())?;
        }
        self.storage.close()?;
        self.disposed = true;
        Ok(())
    }
}

fn looks_like_error(response: &str) -> bool {
    let lower = response.to_lowercase();
    lower.starts_with("error:") || lower.starts_with("error ") || lower.contains("i encountered an error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::librarian::{Librarian, LibrarianIdentity, TextGenerationProvider};
    use async_trait::async_trait;

    struct FakeEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbeddings {
        async fn embed(&self, texts: &[String], _model_hint: Option<&str>) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    struct FailingEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbeddings {
        async fn embed(&self, _texts: &[String], _model_hint: Option<&str>) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            Err(EmbeddingError::Permanent("provider offline".to_string()))
        }
    }

    struct CannedProvider(String);

    #[async_trait]
    impl TextGenerationProvider for CannedProvider {
        async fn generate(&self, _prompt: &str, _system_prompt: Option<&str>) -> std::result::Result<String, crate::librarian::LibrarianError> {
            Ok(self.0.clone())
        }
    }

    fn open_test_library(duplicate_behavior: DuplicateBehavior, duplicate_threshold: f32) -> (Library, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = LibraryConfig {
            storage_dir: dir.path().to_path_buf(),
            duplicate_threshold,
            duplicate_behavior,
            ..Default::default()
        };
        let (library, _report) =
            Library::open_with_file_backend(config, Arc::new(FakeEmbeddings), Registry::new(), None).unwrap();
        (library, dir)
    }

    #[tokio::test]
    async fn search_with_blank_query_returns_empty_without_embedding() {
        let (mut library, _dir) = open_test_library(DuplicateBehavior::Skip, 0.0);
        let results = library.search("   ", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn remember_then_search_finds_it() {
        let (mut library, _dir) = open_test_library(DuplicateBehavior::Skip, 0.0);
        library.remember("rust favors explicit error handling", None).await.unwrap();
        let results = library.search("rust favors explicit error handling", 5).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_behavior_error_rejects_the_second_insert() {
        let (mut library, _dir) = open_test_library(DuplicateBehavior::Error, 0.99);
        library.remember("identical text here", None).await.unwrap();
        let err = library.remember("identical text here", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MemoryDuplicate);
    }

    #[tokio::test]
    async fn duplicate_behavior_skip_returns_existing_id() {
        let (mut library, _dir) = open_test_library(DuplicateBehavior::Skip, 0.99);
        let first = library.remember("identical text here", None).await.unwrap();
        let second = library.remember("identical text here", None).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn advanced_search_falls_back_when_embedding_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = LibraryConfig { storage_dir: dir.path().to_path_buf(), ..Default::default() };
        let (mut library, _report) =
            Library::open_with_file_backend(config, Arc::new(FakeEmbeddings), Registry::new(), None).unwrap();
        library.remember("rust ownership rules", None).await.unwrap();

        // Swap in a failing embedder after the fact by reopening against the
        // same storage dir with FailingEmbeddings; advanced_search must not
        // propagate the embedding error.
        let (mut broken, _r2) =
            Library::open_with_file_backend(
                LibraryConfig { storage_dir: dir.path().to_path_buf(), ..Default::default() },
                Arc::new(FailingEmbeddings),
                Registry::new(),
                None,
            )
            .unwrap();
        let request = AdvancedSearchRequest {
            text: Some("ownership".to_string()),
            max_results: 10,
            rank_by: RankBy::Text,
            ..Default::default()
        };
        let results = broken.advanced_search(request).await.unwrap();
        assert_eq!(results.len(), 1);
        let _ = library.search("noop", 1).await;
    }

    #[tokio::test]
    async fn after_response_skips_error_looking_replies() {
        let (mut library, _dir) = open_test_library(DuplicateBehavior::Skip, 0.0);
        library.after_response("hi", "Error: something broke");
        assert!(library.desk().is_empty());
    }

    #[tokio::test]
    async fn after_response_enqueues_extraction_for_a_normal_reply() {
        let (mut library, _dir) = open_test_library(DuplicateBehavior::Skip, 0.0);
        library.after_response("hi", "Rust uses ownership to manage memory.");
        assert_eq!(library.desk().len(), 1);
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_blocks_further_calls() {
        let (mut library, _dir) = open_test_library(DuplicateBehavior::Skip, 0.0);
        library.dispose().await.unwrap();
        library.dispose().await.unwrap();
        let err = library.remember("too late", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LibraryDisposed);
    }

    #[tokio::test]
    async fn search_then_feedback_survives_reload_with_a_nonzero_query_count() {
        let dir = tempfile::tempdir().unwrap();
        let config = LibraryConfig { storage_dir: dir.path().to_path_buf(), ..Default::default() };
        let (mut library, _report) =
            Library::open_with_file_backend(config.clone(), Arc::new(FakeEmbeddings), Registry::new(), None).unwrap();

        let id = library.remember("this memory is important", None).await.unwrap();
        let results = library.search("important", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        library.record_feedback(&id, true);
        library.dispose().await.unwrap();

        let (reloaded, _report2) =
            Library::open_with_file_backend(config, Arc::new(FakeEmbeddings), Registry::new(), None).unwrap();
        assert!(reloaded.stacks().learning().total_queries() >= 1);
        assert!(reloaded.stacks().get(&id).is_some());
    }

    #[test]
    fn query_dsl_splits_text_metadata_topic_and_min_score() {
        let logger = crate::logging::NoopLogger;
        let parsed = parse_query("rust metadata:lang=en topic:programming minScore:0.5 ownership", &logger);
        assert_eq!(parsed.text.as_deref(), Some("rust ownership"));
        assert_eq!(parsed.topic.as_deref(), Some("programming"));
        assert_eq!(parsed.min_score, Some(0.5));
        assert_eq!(parsed.metadata.len(), 1);
    }

    #[test]
    fn query_dsl_drops_malformed_metadata_clause() {
        let logger = crate::logging::NoopLogger;
        let parsed = parse_query("metadata:nosign text:hello", &logger);
        assert!(parsed.metadata.is_empty());
        assert_eq!(parsed.text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn drain_desk_runs_a_queued_extraction_job() {
        let (mut library, _dir) = open_test_library(DuplicateBehavior::Skip, 0.0);
        let mut registry = Registry::with_default(Librarian::new(
            LibrarianIdentity { name: "default".to_string(), purpose: "test".to_string(), topics: vec![], permissions: vec![] },
            Arc::new(CannedProvider(
                r#"{"memories":[{"text":"rust has ownership","topic":"rust","tags":[],"entryType":"fact"}]}"#.to_string(),
            )),
        ));
        std::mem::swap(library.registry_mut(), &mut registry);

        library.after_response("tell me about rust", "ownership rules");
        library.drain_desk().await.unwrap();
        assert_eq!(library.stacks().len(), 1);
    }
}
