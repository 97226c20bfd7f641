//! Job variants and configured thresholds for the Circulation Desk
//! (spec.md §4.12, §6 "Desk thresholds").

/// One unit of background work (spec.md §4.12).
#[derive(Debug, Clone)]
pub enum Job {
    /// Extract durable memories from one user/assistant exchange.
    Extraction { user_input: String, response: String },
    /// Summarize a topic's volumes into a compendium entry.
    Compendium { topic: String },
    /// Ask the Librarian to optimize (prune/merge/relocate) a topic.
    Optimization { topic: String },
    /// Ask the Librarian to propose a reorganization plan for a topic.
    Reorganization { topic: String },
}

impl Job {
    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Extraction { .. } => "extraction",
            Job::Compendium { .. } => "compendium",
            Job::Optimization { .. } => "optimization",
            Job::Reorganization { .. } => "reorganization",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompendiumThresholds {
    pub min_entries: usize,
    pub min_age_ms: i64,
    pub delete_originals: bool,
}

impl Default for CompendiumThresholds {
    fn default() -> Self {
        Self { min_entries: 20, min_age_ms: 0, delete_originals: false }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OptimizationThresholds {
    pub model_id: Option<String>,
    pub topic_threshold: usize,
    pub global_threshold: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ReorganizationThresholds {
    pub max_volumes_per_topic: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SpawningThresholds {
    pub complexity_threshold: usize,
    pub model_id: Option<String>,
}

/// Desk-side configuration (spec.md §6: "Desk thresholds").
#[derive(Debug, Clone, Default)]
pub struct DeskConfig {
    pub compendium: CompendiumThresholds,
    pub optimization: OptimizationThresholds,
    pub reorganization: ReorganizationThresholds,
    pub spawning: SpawningThresholds,
}

/// Logged when the queue depth crosses this many pending jobs (spec.md
/// §4.12: "logs when depth exceeds 256").
pub const BACK_PRESSURE_DEPTH: usize = 256;
