//! Batching — turns one tag into provider-sized delivery requests.

use std::time::Duration;

use relay_common::error::AppError;
use relay_common::types::Tag;
use relay_store::SubscriptionStore;

use crate::request::{DeliveryRequest, MAX_RECIPIENTS_PER_REQUEST};

pub struct Batcher;

impl Batcher {
    /// Snapshot the tag's current subscriber list and partition it into
    /// contiguous chunks of at most 950 identifiers, each wrapped as a
    /// delivery request with the given initial delay.
    ///
    /// The snapshot is taken once; retries of the resulting requests reuse
    /// it without re-querying. An empty subscriber list yields no requests.
    pub async fn batch(
        tag: &Tag,
        store: &dyn SubscriptionStore,
        initial_delay: Duration,
    ) -> Result<Vec<DeliveryRequest>, AppError> {
        let subscribers = store.subscribed_identifiers(tag).await?;

        let requests: Vec<DeliveryRequest> = subscribers
            .chunks(MAX_RECIPIENTS_PER_REQUEST)
            .map(|chunk| DeliveryRequest::new(tag.clone(), chunk.to_vec(), initial_delay))
            .collect();

        tracing::debug!(
            tag = %tag,
            subscribers = subscribers.len(),
            requests = requests.len(),
            "Tag batched into delivery requests"
        );

        Ok(requests)
    }
}
