//! Registry: holds managed librarians and resolves bidding contests
//! (spec.md §4.13, component C13).

use std::collections::HashMap;
use std::sync::Arc;

use super::{Bid, Librarian, LibrarianIdentity, TextGenerationProvider};

/// Holds every managed [`Librarian`] plus a default fallback. Registry
/// operations are side-effect free except [`Registry::spawn_specialist`]
/// and [`Registry::register`]/[`Registry::unregister`] (spec.md §4.13).
pub struct Registry {
    librarians: Vec<Arc<Librarian>>,
    default_name: Option<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self { librarians: Vec::new(), default_name: None }
    }

    pub fn with_default(default: Librarian) -> Self {
        let mut registry = Self::new();
        let name = default.name().to_string();
        registry.register(default);
        registry.default_name = Some(name);
        registry
    }

    /// Registers a librarian, replacing any existing one of the same name.
    pub fn register(&mut self, librarian: Librarian) {
        let name = librarian.name().to_string();
        self.librarians.retain(|l| l.name() != name);
        self.librarians.push(Arc::new(librarian));
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.librarians.len();
        self.librarians.retain(|l| l.name() != name);
        if self.default_name.as_deref() == Some(name) {
            self.default_name = None;
        }
        self.librarians.len() != before
    }

    pub fn get(&self, name: &str) -> Option<Arc<Librarian>> {
        self.librarians.iter().find(|l| l.name() == name).cloned()
    }

    pub fn default_librarian(&self) -> Option<Arc<Librarian>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    pub fn librarians(&self) -> &[Arc<Librarian>] {
        &self.librarians
    }

    /// Polls every registered librarian for a bid in parallel and picks the
    /// highest confidence; ties are broken by explicit topic permission,
    /// then registration order (spec.md §4.13).
    pub async fn resolve_librarian(
        &self,
        content: &str,
        topic: &str,
        library_view: &HashMap<String, String>,
    ) -> Option<(Arc<Librarian>, Bid)> {
        if self.librarians.is_empty() {
            return None;
        }

        let bids = futures::future::join_all(
            self.librarians.iter().map(|librarian| {
                let librarian = librarian.clone();
                async move {
                    let bid = librarian.bid(content, topic, library_view).await;
                    (librarian, bid)
                }
            }),
        )
        .await;

        bids.into_iter()
            .enumerate()
            .max_by(|(ia, (la, ba)), (ib, (lb, bb))| {
                ba.confidence
                    .partial_cmp(&bb.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        let has_topic_a = la.identity().topics.iter().any(|t| t == topic);
                        let has_topic_b = lb.identity().topics.iter().any(|t| t == topic);
                        has_topic_a.cmp(&has_topic_b)
                    })
                    // earlier registration order wins ties, so later index loses.
                    .then_with(|| ib.cmp(ia))
            })
            .map(|(_, pair)| pair)
    }

    /// Instantiates a new librarian with a derived identity — narrowed to
    /// `topics` and named `{parent}-{topics[0]}` — and registers it
    /// (spec.md §4.12 "spawning", §4.13).
    pub fn spawn_specialist(
        &mut self,
        parent_name: &str,
        topics: Vec<String>,
        provider: Arc<dyn TextGenerationProvider>,
    ) -> Option<Arc<Librarian>> {
        let parent = self.get(parent_name)?;
        let suffix = topics.first().cloned().unwrap_or_else(|| "general".to_string());
        let identity = LibrarianIdentity {
            name: format!("{parent_name}-{suffix}"),
            purpose: format!("specialist derived from {parent_name} for: {suffix}"),
            topics,
            permissions: parent.identity().permissions.clone(),
        };
        let specialist = Librarian::new(identity, provider);
        self.register(specialist);
        self.get(&format!("{parent_name}-{suffix}"))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct CannedProvider(String);

    #[async_trait]
    impl TextGenerationProvider for CannedProvider {
        async fn generate(&self, _prompt: &str, _system_prompt: Option<&str>) -> Result<String, super::super::LibrarianError> {
            Ok(self.0.clone())
        }
    }

    fn identity(name: &str, topics: &[&str]) -> LibrarianIdentity {
        LibrarianIdentity {
            name: name.to_string(),
            purpose: "test".to_string(),
            topics: topics.iter().map(|s| s.to_string()).collect(),
            permissions: vec![],
        }
    }

    #[tokio::test]
    async fn resolve_picks_highest_confidence_bid() {
        let mut registry = Registry::new();
        registry.register(Librarian::new(
            identity("low", &[]),
            Arc::new(CannedProvider(r#"{"name":"low","argument":"","confidence":0.2}"#.to_string())),
        ));
        registry.register(Librarian::new(
            identity("high", &[]),
            Arc::new(CannedProvider(r#"{"name":"high","argument":"","confidence":0.9}"#.to_string())),
        ));

        let (winner, bid) = registry.resolve_librarian("content", "topic", &HashMap::new()).await.unwrap();
        assert_eq!(winner.name(), "high");
        assert_eq!(bid.confidence, 0.9);
    }

    #[tokio::test]
    async fn resolve_breaks_ties_with_topic_permission() {
        let mut registry = Registry::new();
        registry.register(Librarian::new(
            identity("generalist", &[]),
            Arc::new(CannedProvider(r#"{"name":"generalist","argument":"","confidence":0.5}"#.to_string())),
        ));
        registry.register(Librarian::new(
            identity("rust-specialist", &["rust"]),
            Arc::new(CannedProvider(r#"{"name":"rust-specialist","argument":"","confidence":0.5}"#.to_string())),
        ));

        let (winner, _) = registry.resolve_librarian("content", "rust", &HashMap::new()).await.unwrap();
        assert_eq!(winner.name(), "rust-specialist");
    }

    #[tokio::test]
    async fn spawn_specialist_registers_a_derived_librarian() {
        let mut registry = Registry::new();
        registry.register(Librarian::new(identity("parent", &[]), Arc::new(CannedProvider("{}".to_string()))));
        let specialist = registry
            .spawn_specialist("parent", vec!["rust".to_string()], Arc::new(CannedProvider("{}".to_string())))
            .unwrap();
        assert_eq!(specialist.name(), "parent-rust");
        assert!(registry.get("parent-rust").is_some());
    }

    #[test]
    fn unregister_clears_default_if_it_was_the_default() {
        let mut registry = Registry::with_default(Librarian::new(identity("default", &[]), Arc::new(CannedProvider("{}".to_string()))));
        assert!(registry.unregister("default"));
        assert!(registry.default_librarian().is_none());
    }
}
