//! Subscription storage — the single source of truth for device ⇄ tag state.
//!
//! The dispatch pipeline never touches SQL directly; it talks to the
//! [`SubscriptionStore`] trait. Two implementations:
//! - [`PgSubscriptionStore`] — PostgreSQL via sqlx, one `(tag, device_id)`
//!   subscription table (tag names are never used as schema identifiers)
//! - [`MemoryStore`] — in-process store with call recording and failure
//!   injection, used by pipeline and API tests

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgSubscriptionStore;

use async_trait::async_trait;

use relay_common::error::AppError;
use relay_common::types::Tag;

/// Persistence operations consumed by the dispatch core.
///
/// Every multi-row mutation is atomic: either all affected rows change or
/// none do. The store is the single writer of persisted subscription state.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Register a tag. Returns `true` if it was newly added, `false` if it
    /// was already present (idempotent, not an error).
    async fn add_tag(&self, tag: &Tag) -> Result<bool, AppError>;

    /// All tags currently known to the store.
    async fn tags_now(&self) -> Result<Vec<Tag>, AppError>;

    /// Device identifiers subscribed to a tag, in subscription order.
    async fn subscribed_identifiers(&self, tag: &Tag) -> Result<Vec<String>, AppError>;

    /// Associate a device with every tag in `tags`. All associations are
    /// written or none are. Returns `false` if nothing changed.
    async fn add_subscriptions(&self, device_id: &str, tags: &[Tag]) -> Result<bool, AppError>;

    /// Remove the device's association with every tag in `tags`, atomically.
    async fn remove_subscriptions(&self, device_id: &str, tags: &[Tag]) -> Result<bool, AppError>;

    /// Replace `old_id` with `new_id` across every tag subscription, in one
    /// transaction. Used when the provider reports an identifier rotation.
    async fn update_identifier_on_all_tags(
        &self,
        old_id: &str,
        new_id: &str,
    ) -> Result<bool, AppError>;

    /// Drop every subscription held by `id`, in one transaction. Used when
    /// the provider reports the identifier is no longer registered.
    async fn remove_identifier_from_all_tags(&self, id: &str) -> Result<bool, AppError>;
}
