//! Circulation Desk — background job queue (spec.md §4.12, component C12)
//!
//! A single-consumer cooperative FIFO queue. There is no OS thread behind
//! it: spec.md §5 calls for single-threaded cooperative execution driven by
//! an event loop, so the Desk simply holds [`Job`]s and exposes async
//! methods ([`Desk::process_next`], [`Desk::drain`]) that the embedding
//! program's own loop calls — typically right after
//! [`crate::library::Library::after_response`] enqueues an extraction job.
//! Desk holds no reference to [`crate::stacks::Stacks`] or storage; every
//! capability it needs for one job is borrowed through a [`JobContext`]
//! (spec.md §5: "the Desk receives capability callbacks rather than owning
//! references").

pub mod jobs;

use std::collections::{HashMap, HashSet};

use chrono::Utc;

pub use jobs::{
    CompendiumThresholds, DeskConfig, Job, OptimizationThresholds, ReorganizationThresholds,
    SpawningThresholds, BACK_PRESSURE_DEPTH,
};

use crate::librarian::{ReorganizationPlan, Registry};
use crate::library::EmbeddingProvider;
use crate::logging::{Level, Logger};
use crate::stacks::Stacks;
use crate::storage::StorageBackend;
use crate::VolumeId;

/// Everything one job-handling call needs, borrowed for the duration of
/// that call. The Desk itself owns none of these (spec.md §5).
pub struct JobContext<'a> {
    pub stacks: &'a mut Stacks,
    pub storage: &'a dyn StorageBackend,
    pub registry: &'a mut Registry,
    pub embeddings: &'a dyn EmbeddingProvider,
    pub logger: &'a dyn Logger,
}

pub struct Desk {
    queue: std::collections::VecDeque<Job>,
    config: DeskConfig,
    disposed: bool,
}

impl Desk {
    pub fn new(config: DeskConfig) -> Self {
        Self { queue: std::collections::VecDeque::new(), config, disposed: false }
    }

    pub fn config(&self) -> &DeskConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Enqueues a job; silently ignored once [`Desk::dispose`] has run
    /// (spec.md §4.12: "enqueue after dispose() is silently ignored").
    /// Logs once queue depth crosses [`BACK_PRESSURE_DEPTH`] (the queue
    /// itself has no size cap).
    pub fn enqueue(&mut self, job: Job, logger: &dyn Logger) {
        if self.disposed {
            return;
        }
        self.queue.push_back(job);
        if self.queue.len() > BACK_PRESSURE_DEPTH {
            logger.log(
                Level::Warn,
                &format!("circulation desk queue depth {} exceeds back-pressure threshold", self.queue.len()),
            );
        }
    }

    /// Cancels every pending job without awaiting whatever is currently
    /// in-flight (spec.md §4.12).
    pub fn flush(&mut self) {
        self.queue.clear();
    }

    /// Refuses further enqueues and cancels pending jobs.
    pub fn dispose(&mut self) {
        self.disposed = true;
        self.queue.clear();
    }

    /// Pops and processes exactly one job. Returns `false` if the queue was
    /// empty. Job-handling errors are swallowed and logged (spec.md §4.12:
    /// "swallow and log; the queue proceeds") — this method itself never
    /// fails.
    pub async fn process_next(&mut self, ctx: &mut JobContext<'_>) -> bool {
        let Some(job) = self.queue.pop_front() else { return false };
        let kind = job.kind();
        if let Err(e) = self.handle(job, ctx).await {
            ctx.logger.log(Level::Warn, &format!("circulation desk job ({kind}) failed: {e}"));
        }
        true
    }

    /// Processes jobs strictly in FIFO order until the queue is empty
    /// (spec.md §4.12, §5 ordering guarantee 2).
    pub async fn drain(&mut self, ctx: &mut JobContext<'_>) {
        while self.process_next(ctx).await {}
    }

    async fn handle(&mut self, job: Job, ctx: &mut JobContext<'_>) -> crate::Result<()> {
        match job {
            Job::Extraction { user_input, response } => self.handle_extraction(&user_input, &response, ctx).await,
            Job::Compendium { topic } => self.handle_compendium(&topic, ctx).await,
            Job::Optimization { topic } => self.handle_optimization(&topic, ctx).await,
            Job::Reorganization { topic } => self.handle_reorganization(&topic, ctx).await,
        }
    }

    /// spec.md §4.12 "Extraction": Librarian.extract, then per memory a
    /// duplicate check and conditional add.
    async fn handle_extraction(&mut self, user_input: &str, response: &str, ctx: &mut JobContext<'_>) -> crate::Result<()> {
        let Some(librarian) = ctx.registry.default_librarian() else {
            ctx.logger.log(Level::Warn, "extraction job skipped: no default librarian registered");
            return Ok(());
        };

        let result = librarian.extract(user_input, response).await;
        let mut touched_topics = Vec::new();

        for memory in result.memories {
            if memory.text.trim().is_empty() {
                continue;
            }
            let embedding = match ctx.embeddings.embed(std::slice::from_ref(&memory.text), None).await {
                Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
                _ => continue, // downgrades to no-op for this memory
            };
            if ctx.stacks.check_duplicate(&embedding).is_duplicate {
                continue;
            }
            let mut metadata = HashMap::new();
            metadata.insert("topic".to_string(), memory.topic.clone());
            metadata.insert("tags".to_string(), memory.tags.join(","));
            metadata.insert("entryType".to_string(), memory.entry_type.clone());
            metadata.insert("librarian".to_string(), librarian.name().to_string());
            if ctx.stacks.add(memory.text, embedding, metadata).is_ok() {
                touched_topics.push(memory.topic);
            }
        }

        self.auto_escalate(&touched_topics, librarian.name(), ctx);
        Ok(())
    }

    /// spec.md §4.12 "Auto-escalation": after extraction, check thresholds
    /// per touched topic and globally, and ask the Registry to spawn a
    /// specialist if a topic is complex enough.
    fn auto_escalate(&mut self, topics: &[String], parent_name: &str, ctx: &mut JobContext<'_>) {
        let mut seen: HashSet<&str> = HashSet::new();
        for topic in topics {
            if !seen.insert(topic.as_str()) {
                continue;
            }
            let count = ctx.stacks.volumes_under_topic_count(topic);
            if self.config.optimization.topic_threshold > 0 && count > self.config.optimization.topic_threshold {
                self.enqueue(Job::Optimization { topic: topic.clone() }, ctx.logger);
            }
            if self.config.spawning.complexity_threshold > 0 && count > self.config.spawning.complexity_threshold {
                if let Some(provider) = ctx.registry.default_librarian().map(|l| l.provider()) {
                    ctx.registry.spawn_specialist(parent_name, vec![topic.clone()], provider);
                }
            }
        }
        if self.config.optimization.global_threshold > 0 && ctx.stacks.len() > self.config.optimization.global_threshold {
            if let Some(top_topic) = ctx.stacks.most_populous_topic() {
                self.enqueue(Job::Optimization { topic: top_topic }, ctx.logger);
            }
        }
    }

    /// spec.md §4.12 "Compendium": gather, check thresholds, summarize, add,
    /// optionally delete originals.
    async fn handle_compendium(&mut self, topic: &str, ctx: &mut JobContext<'_>) -> crate::Result<()> {
        let ids = ctx.stacks.filter_by_topic(topic);
        if ids.len() < self.config.compendium.min_entries {
            return Ok(());
        }
        let volumes: Vec<_> = ids.iter().filter_map(|id| ctx.stacks.get(id).cloned()).collect();
        let now_ms = Utc::now().timestamp_millis();
        let newest_age_ms = volumes.iter().map(|v| now_ms - v.timestamp_ms).min().unwrap_or(0);
        if newest_age_ms < self.config.compendium.min_age_ms {
            return Ok(());
        }

        let Some(librarian) = ctx.registry.default_librarian() else { return Ok(()) };
        let texts: Vec<String> = volumes.iter().map(|v| v.text.clone()).collect();
        let summary = librarian.summarize(topic, &texts).await;
        if summary.summary.trim().is_empty() {
            return Ok(());
        }

        let Ok(mut vectors) = ctx.embeddings.embed(std::slice::from_ref(&summary.summary), None).await else {
            return Ok(());
        };
        if vectors.is_empty() {
            return Ok(());
        }
        let mut metadata = HashMap::new();
        metadata.insert("topic".to_string(), topic.to_string());
        metadata.insert("entryType".to_string(), "compendium".to_string());
        let _ = ctx.stacks.add(summary.summary, vectors.remove(0), metadata);

        if self.config.compendium.delete_originals {
            let original_ids: Vec<VolumeId> = volumes.iter().map(|v| v.id.clone()).collect();
            ctx.stacks.delete_batch(&original_ids);
        }
        Ok(())
    }

    /// spec.md §4.12 "Optimization": Librarian.optimize, then apply the plan.
    async fn handle_optimization(&mut self, topic: &str, ctx: &mut JobContext<'_>) -> crate::Result<()> {
        let Some(librarian) = ctx.registry.default_librarian() else { return Ok(()) };
        let entries = self.topic_entries(topic, ctx);
        let model_id = self.config.optimization.model_id.clone();
        let result = librarian.optimize(&entries, topic, model_id.as_deref()).await;
        self.apply_plan(topic, result.plan, ctx).await
    }

    /// spec.md §4.12 "Reorganization": Librarian.reorganize, then apply the
    /// plan identically to optimization.
    async fn handle_reorganization(&mut self, topic: &str, ctx: &mut JobContext<'_>) -> crate::Result<()> {
        let Some(librarian) = ctx.registry.default_librarian() else { return Ok(()) };
        let entries = self.topic_entries(topic, ctx);
        let plan = librarian.reorganize(topic, &entries).await;
        self.apply_plan(topic, plan, ctx).await
    }

    fn topic_entries(&self, topic: &str, ctx: &JobContext<'_>) -> Vec<(VolumeId, String)> {
        ctx.stacks
            .filter_by_topic(topic)
            .into_iter()
            .filter_map(|id| ctx.stacks.get(&id).map(|v| (id, v.text.clone())))
            .collect()
    }

    async fn apply_plan(&mut self, topic: &str, plan: ReorganizationPlan, ctx: &mut JobContext<'_>) -> crate::Result<()> {
        ctx.stacks.delete_batch(&plan.pruned);

        if let Some(summary) = plan.summary {
            if !summary.trim().is_empty() {
                if let Ok(mut vectors) = ctx.embeddings.embed(std::slice::from_ref(&summary), None).await {
                    if !vectors.is_empty() {
                        let mut metadata = HashMap::new();
                        metadata.insert("topic".to_string(), topic.to_string());
                        metadata.insert("entryType".to_string(), "compendium".to_string());
                        let _ = ctx.stacks.add(summary, vectors.remove(0), metadata);
                    }
                }
            }
        }

        for (id, new_topic) in plan.moves {
            let _ = ctx.stacks.relocate(&id, &new_topic);
        }
        for subtopic in plan.new_subtopics {
            ctx.stacks.register_topic(&subtopic);
        }
        for (src, dst) in plan.merges {
            ctx.stacks.merge_topics(&src, &dst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::librarian::{ExtractResult, ExtractedMemory, Librarian, LibrarianIdentity, TextGenerationProvider};
    use crate::library::EmbeddingError;
    use crate::logging::NoopLogger;
    use crate::stacks::StacksConfig;
    use crate::storage::FileBackend;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct CannedProvider(String);

    #[async_trait]
    impl TextGenerationProvider for CannedProvider {
        async fn generate(&self, _prompt: &str, _system_prompt: Option<&str>) -> Result<String, crate::librarian::LibrarianError> {
            Ok(self.0.clone())
        }
    }

    struct FakeEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for FakeEmbeddings {
        async fn embed(&self, texts: &[String], _model_hint: Option<&str>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn identity(name: &str) -> LibrarianIdentity {
        LibrarianIdentity { name: name.to_string(), purpose: "test".to_string(), topics: vec![], permissions: vec![] }
    }

    #[tokio::test]
    async fn extraction_job_adds_non_duplicate_memories() {
        let mut desk = Desk::new(DeskConfig::default());
        desk.enqueue(
            Job::Extraction { user_input: "tell me about rust".to_string(), response: "ownership rules".to_string() },
            &NoopLogger,
        );

        let mut registry = Registry::with_default(Librarian::new(
            identity("default"),
            Arc::new(CannedProvider(
                r#"{"memories":[{"text":"rust has ownership","topic":"rust","tags":[],"entryType":"fact"}]}"#.to_string(),
            )),
        ));
        let mut stacks = Stacks::new(StacksConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path(), 6, true).unwrap();
        let embeddings = FakeEmbeddings;

        let mut ctx = JobContext {
            stacks: &mut stacks,
            storage: &backend,
            registry: &mut registry,
            embeddings: &embeddings,
            logger: &NoopLogger,
        };
        desk.drain(&mut ctx).await;

        assert_eq!(stacks.len(), 1);
    }

    #[tokio::test]
    async fn compendium_job_is_a_noop_below_min_entries() {
        let config = DeskConfig { compendium: CompendiumThresholds { min_entries: 5, ..Default::default() }, ..Default::default() };
        let mut desk = Desk::new(config);
        desk.enqueue(Job::Compendium { topic: "rust".to_string() }, &NoopLogger);

        let mut registry = Registry::with_default(Librarian::new(identity("default"), Arc::new(CannedProvider("{}".to_string()))));
        let mut stacks = Stacks::new(StacksConfig::default());
        stacks.add("one entry".into(), vec![1.0], [("topic".to_string(), "rust".to_string())].into()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path(), 6, true).unwrap();
        let embeddings = FakeEmbeddings;

        let mut ctx = JobContext { stacks: &mut stacks, storage: &backend, registry: &mut registry, embeddings: &embeddings, logger: &NoopLogger };
        desk.drain(&mut ctx).await;

        assert_eq!(stacks.len(), 1);
    }

    #[test]
    fn enqueue_after_dispose_is_ignored() {
        let mut desk = Desk::new(DeskConfig::default());
        desk.dispose();
        desk.enqueue(Job::Compendium { topic: "x".to_string() }, &NoopLogger);
        assert!(desk.is_empty());
    }

    #[test]
    fn flush_cancels_pending_without_touching_disposed_flag() {
        let mut desk = Desk::new(DeskConfig::default());
        desk.enqueue(Job::Compendium { topic: "x".to_string() }, &NoopLogger);
        desk.flush();
        assert!(desk.is_empty());
        assert!(!desk.is_disposed());
    }
}
