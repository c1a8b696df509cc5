//! In-memory subscription store.
//!
//! Backs pipeline and API tests: records every mutation it receives so a
//! test can assert exactly which store calls a provider response produced,
//! and supports injected failures mid-mutation to exercise the
//! all-or-nothing contract.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use relay_common::error::AppError;
use relay_common::types::Tag;

use crate::SubscriptionStore;

/// A recorded mutation, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    AddTag(String),
    AddSubscriptions { device_id: String, tags: Vec<String> },
    RemoveSubscriptions { device_id: String, tags: Vec<String> },
    UpdateIdentifier { old_id: String, new_id: String },
    RemoveIdentifier(String),
}

#[derive(Default)]
struct Inner {
    tags: BTreeSet<Tag>,
    // Vec preserves subscription order, matching the Postgres ORDER BY.
    subscribers: HashMap<Tag, Vec<String>>,
    calls: Vec<StoreCall>,
    fail_add_subscriptions_after: Option<usize>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a tag with an ordered subscriber list.
    pub fn with_subscribers(self, tag: Tag, ids: Vec<String>) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.tags.insert(tag.clone());
            inner.subscribers.insert(tag, ids);
        }
        self
    }

    /// Make the next `add_subscriptions` call fail after writing `n` rows.
    /// The failed call must leave no partial writes behind.
    pub fn fail_add_subscriptions_after(&self, n: usize) {
        self.inner.lock().unwrap().fail_add_subscriptions_after = Some(n);
    }

    /// Every mutation received so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Mutations received, excluding tag registrations. Convenient for
    /// asserting what a reconciliation pass did.
    pub fn mutation_calls(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, StoreCall::AddTag(_)))
            .collect()
    }

    /// Current subscriber list for a tag (empty if unknown).
    pub fn subscribers(&self, tag: &Tag) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .subscribers
            .get(tag)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn add_tag(&self, tag: &Tag) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(StoreCall::AddTag(tag.to_string()));
        Ok(inner.tags.insert(tag.clone()))
    }

    async fn tags_now(&self) -> Result<Vec<Tag>, AppError> {
        Ok(self.inner.lock().unwrap().tags.iter().cloned().collect())
    }

    async fn subscribed_identifiers(&self, tag: &Tag) -> Result<Vec<String>, AppError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .subscribers
            .get(tag)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_subscriptions(&self, device_id: &str, tags: &[Tag]) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(StoreCall::AddSubscriptions {
            device_id: device_id.to_string(),
            tags: tags.iter().map(Tag::to_string).collect(),
        });

        // Stage writes and only commit the whole set, so an injected failure
        // mid-way leaves the store untouched.
        let fail_after = inner.fail_add_subscriptions_after.take();
        let mut staged = inner.subscribers.clone();
        let mut changed = false;

        for (written, tag) in tags.iter().enumerate() {
            if fail_after.is_some_and(|n| written >= n) {
                return Err(AppError::Internal("injected storage failure".to_string()));
            }
            let list = staged.entry(tag.clone()).or_default();
            if !list.iter().any(|id| id == device_id) {
                list.push(device_id.to_string());
                changed = true;
            }
        }

        for tag in tags {
            inner.tags.insert(tag.clone());
        }
        inner.subscribers = staged;
        Ok(changed)
    }

    async fn remove_subscriptions(&self, device_id: &str, tags: &[Tag]) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(StoreCall::RemoveSubscriptions {
            device_id: device_id.to_string(),
            tags: tags.iter().map(Tag::to_string).collect(),
        });

        let mut changed = false;
        for tag in tags {
            if let Some(list) = inner.subscribers.get_mut(tag) {
                let before = list.len();
                list.retain(|id| id != device_id);
                changed |= list.len() != before;
            }
        }
        Ok(changed)
    }

    async fn update_identifier_on_all_tags(
        &self,
        old_id: &str,
        new_id: &str,
    ) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(StoreCall::UpdateIdentifier {
            old_id: old_id.to_string(),
            new_id: new_id.to_string(),
        });

        let mut rotated = false;
        for list in inner.subscribers.values_mut() {
            if !list.iter().any(|id| id == old_id) {
                continue;
            }
            rotated = true;
            if list.iter().any(|id| id == new_id) {
                // New identifier already subscribed here; just drop the old.
                list.retain(|id| id != old_id);
            } else {
                for id in list.iter_mut() {
                    if id == old_id {
                        *id = new_id.to_string();
                    }
                }
            }
        }
        Ok(rotated)
    }

    async fn remove_identifier_from_all_tags(&self, id: &str) -> Result<bool, AppError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(StoreCall::RemoveIdentifier(id.to_string()));

        let mut removed = false;
        for list in inner.subscribers.values_mut() {
            let before = list.len();
            list.retain(|existing| existing != id);
            removed |= list.len() != before;
        }
        Ok(removed)
    }
}
