//! Queue item types for the two pipeline stages.

use std::hash::{Hash, Hasher};
use std::time::Duration;

use uuid::Uuid;

use relay_common::types::Tag;

use crate::backoff::Backoff;
use crate::queue::Keyed;

/// Hard per-request recipient limit imposed by the provider (must stay at
/// 1000 or less).
pub const MAX_RECIPIENTS_PER_REQUEST: usize = 950;

/// A tag waiting to be broadcast. At most one may be queued per tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTagSync {
    pub tag: Tag,
}

impl Keyed for PendingTagSync {
    type Key = Tag;

    fn key(&self) -> Tag {
        self.tag.clone()
    }
}

/// One outbound batch of recipients for a tag.
///
/// The recipient list is the snapshot taken at batching time and is retained
/// unchanged across retries — provider results are correlated to recipients
/// by position, so the list must never be re-queried or reordered while the
/// request is in flight.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    /// Stable id for log correlation across retries.
    pub id: Uuid,
    pub tag: Tag,
    pub recipients: Vec<String>,
    /// Delay before this request becomes eligible for sending.
    pub delay: Duration,
    /// How many times this batch has been sent (0 = never).
    pub attempt: u32,
}

impl DeliveryRequest {
    pub fn new(tag: Tag, recipients: Vec<String>, delay: Duration) -> Self {
        debug_assert!(recipients.len() <= MAX_RECIPIENTS_PER_REQUEST);
        Self {
            id: Uuid::new_v4(),
            tag,
            recipients,
            delay,
            attempt: 0,
        }
    }

    /// The same payload rescheduled with a strictly increased delay.
    pub fn retried(&self, backoff: &Backoff) -> Self {
        Self {
            id: self.id,
            tag: self.tag.clone(),
            recipients: self.recipients.clone(),
            delay: backoff.next(self.delay),
            attempt: self.attempt + 1,
        }
    }

    /// Identity is the payload — tag plus recipient list. Scheduling state
    /// (delay, attempt) and the log id are excluded, so a retry of a batch
    /// still deduplicates against an identical queued batch.
    pub fn payload_key(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.tag.hash(&mut hasher);
        self.recipients.hash(&mut hasher);
        hasher.finish()
    }
}

impl Keyed for DeliveryRequest {
    type Key = u64;

    fn key(&self) -> u64 {
        self.payload_key()
    }
}
