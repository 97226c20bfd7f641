//! Librarian & Registry (spec.md §4.13, component C13)
//!
//! A Librarian binds one text-generation provider capability to a fixed
//! identity and exposes a small set of prompted operations. Every response
//! is parsed defensively: malformed or partial JSON degrades to the safe
//! default for that operation rather than propagating a parse error
//! (spec.md §9: "decode Librarian responses through strict tagged variants;
//! malformed input returns the safe default value of that variant").

pub mod registry;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::VolumeId;

pub use registry::Registry;

#[derive(Debug, thiserror::Error)]
pub enum LibrarianError {
    #[error("text generation provider error: {0}")]
    Provider(String),
    #[error("missing template variable: {0}")]
    MissingTemplateVariable(String),
}

/// The narrow capability a Librarian wraps (spec.md §6).
#[async_trait]
pub trait TextGenerationProvider: Send + Sync {
    async fn generate(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String, LibrarianError>;

    async fn generate_with_model(
        &self,
        prompt: &str,
        model_id: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, LibrarianError> {
        let _ = model_id;
        self.generate(prompt, system_prompt).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMemory {
    pub text: String,
    pub topic: String,
    pub tags: Vec<String>,
    pub entry_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractResult {
    pub memories: Vec<ExtractedMemory>,
}

#[derive(Debug, Clone, Default)]
pub struct SummaryResult {
    pub summary: String,
}

#[derive(Debug, Clone, Default)]
pub struct ClassifyResult {
    pub topic: Option<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct ReorganizationPlan {
    pub pruned: Vec<VolumeId>,
    pub summary: Option<String>,
    pub moves: Vec<(VolumeId, String)>,
    pub new_subtopics: Vec<String>,
    pub merges: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct OptimizationResult {
    pub plan: ReorganizationPlan,
}

#[derive(Debug, Clone)]
pub struct Bid {
    pub name: String,
    pub argument: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Default)]
pub struct LibrarianIdentity {
    pub name: String,
    pub purpose: String,
    pub topics: Vec<String>,
    pub permissions: Vec<String>,
}

// ============================================================================
// Defensive JSON decoding helpers
// ============================================================================

#[derive(Deserialize, Default)]
struct RawExtractedMemory {
    #[serde(default)]
    text: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(rename = "entryType", default = "default_entry_type")]
    entry_type: String,
}

fn default_entry_type() -> String {
    "fact".to_string()
}

#[derive(Deserialize, Default)]
struct RawExtractResponse {
    #[serde(default)]
    memories: Vec<RawExtractedMemory>,
}

fn parse_extract(raw: &str) -> ExtractResult {
    let Ok(parsed) = serde_json::from_str::<RawExtractResponse>(raw) else {
        return ExtractResult::default();
    };
    let memories = parsed
        .memories
        .into_iter()
        .filter(|m| !m.text.trim().is_empty())
        .map(|m| ExtractedMemory {
            text: m.text,
            topic: if m.topic.trim().is_empty() { "general".to_string() } else { m.topic },
            tags: m.tags,
            entry_type: m.entry_type,
        })
        .collect();
    ExtractResult { memories }
}

#[derive(Deserialize, Default)]
struct RawSummary {
    #[serde(default)]
    summary: String,
}

fn parse_summary(raw: &str) -> SummaryResult {
    serde_json::from_str::<RawSummary>(raw)
        .map(|r| SummaryResult { summary: r.summary })
        .unwrap_or_default()
}

#[derive(Deserialize, Default)]
struct RawClassify {
    topic: Option<String>,
    #[serde(default)]
    confidence: f32,
}

fn parse_classify(raw: &str) -> ClassifyResult {
    serde_json::from_str::<RawClassify>(raw)
        .map(|r| ClassifyResult { topic: r.topic, confidence: r.confidence.clamp(0.0, 1.0) })
        .unwrap_or_default()
}

#[derive(Deserialize, Default)]
struct RawMove {
    #[serde(default)]
    id: String,
    #[serde(default)]
    topic: String,
}

#[derive(Deserialize, Default)]
struct RawMerge {
    #[serde(default)]
    from: String,
    #[serde(default)]
    into: String,
}

#[derive(Deserialize, Default)]
struct RawPlan {
    #[serde(default)]
    pruned: Vec<String>,
    summary: Option<String>,
    #[serde(default)]
    moves: Vec<RawMove>,
    #[serde(default, rename = "newSubtopics")]
    new_subtopics: Vec<String>,
    #[serde(default)]
    merges: Vec<RawMerge>,
}

fn parse_plan(raw: &str) -> ReorganizationPlan {
    let Ok(parsed) = serde_json::from_str::<RawPlan>(raw) else {
        return ReorganizationPlan::default();
    };
    ReorganizationPlan {
        pruned: parsed.pruned,
        summary: parsed.summary,
        moves: parsed.moves.into_iter().filter(|m| !m.id.is_empty() && !m.topic.is_empty()).map(|m| (m.id, m.topic)).collect(),
        new_subtopics: parsed.new_subtopics,
        merges: parsed
            .merges
            .into_iter()
            .filter(|m| !m.from.is_empty() && !m.into.is_empty())
            .map(|m| (m.from, m.into))
            .collect(),
    }
}

#[derive(Deserialize, Default)]
struct RawBid {
    #[serde(default)]
    name: String,
    #[serde(default)]
    argument: String,
    #[serde(default)]
    confidence: f32,
}

fn parse_bid(raw: &str, fallback_name: &str) -> Bid {
    match serde_json::from_str::<RawBid>(raw) {
        Ok(b) => Bid {
            name: if b.name.is_empty() { fallback_name.to_string() } else { b.name },
            argument: b.argument,
            confidence: b.confidence.clamp(0.0, 1.0),
        },
        Err(_) => Bid { name: fallback_name.to_string(), argument: String::new(), confidence: 0.0 },
    }
}

// ============================================================================
// Librarian
// ============================================================================

/// An LLM-backed actor bound to one identity and one provider (spec.md §4.13
/// / GLOSSARY).
pub struct Librarian {
    identity: LibrarianIdentity,
    provider: std::sync::Arc<dyn TextGenerationProvider>,
}

impl Librarian {
    pub fn new(identity: LibrarianIdentity, provider: std::sync::Arc<dyn TextGenerationProvider>) -> Self {
        Self { identity, provider }
    }

    pub fn identity(&self) -> &LibrarianIdentity {
        &self.identity
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// The underlying provider capability, so a caller can hand it to
    /// [`Registry::spawn_specialist`] when deriving a new identity from this
    /// librarian.
    pub fn provider(&self) -> std::sync::Arc<dyn TextGenerationProvider> {
        self.provider.clone()
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are {}, a librarian responsible for: {}. Respond with strict JSON only.",
            self.identity.name, self.identity.purpose
        )
    }

    pub async fn extract(&self, user_input: &str, response: &str) -> ExtractResult {
        let prompt = format!(
            "Extract durable memories from this exchange.\nUser: {user_input}\nAssistant: {response}\n\
             Respond as JSON: {{\"memories\":[{{\"text\":...,\"topic\":...,\"tags\":[...],\"entryType\":...}}]}}"
        );
        match self.provider.generate(&prompt, Some(&self.system_prompt())).await {
            Ok(raw) => parse_extract(&raw),
            Err(_) => ExtractResult::default(),
        }
    }

    pub async fn summarize(&self, topic: &str, entries: &[String]) -> SummaryResult {
        let prompt = format!(
            "Summarize these {} entries under topic '{topic}' into one compendium:\n{}\n\
             Respond as JSON: {{\"summary\":...}}",
            entries.len(),
            entries.join("\n---\n")
        );
        match self.provider.generate(&prompt, Some(&self.system_prompt())).await {
            Ok(raw) => parse_summary(&raw),
            Err(_) => SummaryResult::default(),
        }
    }

    pub async fn classify_topic(&self, text: &str) -> ClassifyResult {
        let prompt = format!(
            "Classify this text into one topic path from: {:?}.\nText: {text}\n\
             Respond as JSON: {{\"topic\":...,\"confidence\":0..1}}",
            self.identity.topics
        );
        match self.provider.generate(&prompt, Some(&self.system_prompt())).await {
            Ok(raw) => parse_classify(&raw),
            Err(_) => ClassifyResult::default(),
        }
    }

    pub async fn reorganize(&self, topic: &str, entries: &[(VolumeId, String)]) -> ReorganizationPlan {
        let prompt = format!(
            "Propose a reorganization for topic '{topic}' with entries: {:?}.\n\
             Respond as JSON: {{\"pruned\":[...],\"summary\":...,\"moves\":[{{\"id\":...,\"topic\":...}}],\
             \"newSubtopics\":[...],\"merges\":[{{\"from\":...,\"into\":...}}]}}",
            entries
        );
        match self.provider.generate(&prompt, Some(&self.system_prompt())).await {
            Ok(raw) => parse_plan(&raw),
            Err(_) => ReorganizationPlan::default(),
        }
    }

    pub async fn optimize(&self, entries: &[(VolumeId, String)], topic: &str, model_id: Option<&str>) -> OptimizationResult {
        let prompt = format!(
            "Optimize storage for topic '{topic}' over entries: {:?}.\n\
             Respond as JSON: {{\"pruned\":[...],\"summary\":...,\"moves\":[{{\"id\":...,\"topic\":...}}],\
             \"newSubtopics\":[...],\"merges\":[{{\"from\":...,\"into\":...}}]}}",
            entries
        );
        let raw = match model_id {
            Some(model) => self.provider.generate_with_model(&prompt, model, Some(&self.system_prompt())).await,
            None => self.provider.generate(&prompt, Some(&self.system_prompt())).await,
        };
        match raw {
            Ok(raw) => OptimizationResult { plan: parse_plan(&raw) },
            Err(_) => OptimizationResult::default(),
        }
    }

    /// Confidence-weighted bid on handling `content` under `topic` (spec.md
    /// §4.13). `library_view` is a caller-supplied summary of current state,
    /// kept opaque here (the Librarian only forwards it into the prompt).
    pub async fn bid(&self, content: &str, topic: &str, library_view: &HashMap<String, String>) -> Bid {
        let prompt = format!(
            "Given content: {content}\ntopic: {topic}\nlibrary state: {library_view:?}\n\
             Do you want to handle this? Respond as JSON: {{\"name\":...,\"argument\":...,\"confidence\":0..1}}"
        );
        match self.provider.generate(&prompt, Some(&self.system_prompt())).await {
            Ok(raw) => parse_bid(&raw, &self.identity.name),
            Err(_) => Bid { name: self.identity.name.clone(), argument: String::new(), confidence: 0.0 },
        }
    }
}
