//! Tag registry — the runtime-mutable set of valid tag names.
//!
//! The tag namespace is open: tags arrive from a seed file at startup, from
//! persisted storage, and from inbound requests. The registry holds the
//! in-process view; the subscription store holds the durable one, and the
//! two are reconciled at startup (re-registering an existing tag is a no-op
//! on both sides).

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::RwLock;

use relay_common::error::AppError;
use relay_common::types::Tag;
use relay_store::SubscriptionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Added,
    AlreadyPresent,
}

#[derive(Default)]
pub struct TagRegistry {
    tags: RwLock<BTreeSet<Tag>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tag: Tag) -> RegisterOutcome {
        if self.tags.write().unwrap().insert(tag) {
            RegisterOutcome::Added
        } else {
            RegisterOutcome::AlreadyPresent
        }
    }

    /// Normalize and register a batch of raw tag names.
    ///
    /// Invalid tokens are logged and skipped rather than failing the batch
    /// (partial success). Returns the number of tags newly added.
    pub fn register_all<I>(&self, raw: I) -> usize
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut added = 0;
        for candidate in raw {
            match Tag::normalize(candidate.as_ref()) {
                Ok(tag) => {
                    if self.register(tag) == RegisterOutcome::Added {
                        added += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!(candidate = candidate.as_ref(), error = %e, "Skipping malformed tag");
                }
            }
        }
        added
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.tags.read().unwrap().contains(tag)
    }

    /// All registered tags, sorted.
    pub fn all(&self) -> Vec<Tag> {
        self.tags.read().unwrap().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tags.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.read().unwrap().is_empty()
    }

    /// Build the startup registry: seed tags from configuration, pushed into
    /// the store (idempotent), then unioned with every tag the store already
    /// knows.
    pub async fn bootstrap(
        seed: Vec<String>,
        store: &dyn SubscriptionStore,
    ) -> Result<Self, AppError> {
        let registry = Self::new();

        let seeded = registry.register_all(seed);
        for tag in registry.all() {
            store.add_tag(&tag).await?;
        }

        let mut persisted = 0;
        for tag in store.tags_now().await? {
            if registry.register(tag) == RegisterOutcome::Added {
                persisted += 1;
            }
        }

        tracing::info!(
            seeded,
            persisted,
            total = registry.len(),
            "Tag registry bootstrapped"
        );
        Ok(registry)
    }
}

/// Read a seed tags file: comma- or newline-separated raw tag names.
/// A missing file is not an error — the registry starts empty.
pub fn read_seed_file(path: &Path) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .split([',', '\n'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Err(e) => {
            tracing::info!(path = %path.display(), error = %e, "Tags file not loaded, starting with no seed tags");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::MemoryStore;

    fn tag(s: &str) -> Tag {
        Tag::normalize(s).unwrap()
    }

    #[test]
    fn test_register_twice_reports_already_present() {
        let registry = TagRegistry::new();

        assert_eq!(registry.register(tag("news")), RegisterOutcome::Added);
        assert_eq!(registry.register(tag("news")), RegisterOutcome::AlreadyPresent);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_all_partial_success() {
        let registry = TagRegistry::new();

        // Two valid (one a duplicate after normalization), two invalid.
        let added = registry.register_all(["News", "  news ", "bad-tag", "sports"]);

        assert_eq!(added, 2);
        assert_eq!(registry.all(), vec![tag("news"), tag("sports")]);
    }

    #[test]
    fn test_register_all_empty_input() {
        let registry = TagRegistry::new();
        assert_eq!(registry.register_all(Vec::<String>::new()), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_read_seed_file_splits_commas_and_newlines() {
        let path = std::env::temp_dir().join("relay_seed_tags_test.txt");
        std::fs::write(&path, "news, sports\nweather,\n\n finance ").unwrap();

        let raw = read_seed_file(&path);
        assert_eq!(raw, vec!["news", "sports", "weather", "finance"]);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_seed_file_missing_file_yields_no_tags() {
        let raw = read_seed_file(Path::new("/nonexistent/relay_tags.txt"));
        assert!(raw.is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_unions_seed_and_persisted_tags() {
        let store = MemoryStore::new();
        store.add_tag(&tag("persisted")).await.unwrap();

        let registry = TagRegistry::bootstrap(vec!["seeded".to_string()], &store)
            .await
            .unwrap();

        assert_eq!(registry.all(), vec![tag("persisted"), tag("seeded")]);
        // Seed tag was pushed into the store.
        assert!(store.tags_now().await.unwrap().contains(&tag("seeded")));
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent_for_overlapping_tags() {
        let store = MemoryStore::new();
        store.add_tag(&tag("news")).await.unwrap();

        let registry = TagRegistry::bootstrap(vec!["news".to_string()], &store)
            .await
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(store.tags_now().await.unwrap().len(), 1);
    }
}
