//! Pipeline wiring — queues, consumer loops, and reconciliation.
//!
//! `Dispatcher` owns both delay queues and runs two long-lived consumers:
//! one drains the sync queue into batched delivery requests, the other
//! sends delivery requests and applies the classifier's verdict. Consumer
//! loops never exit on an internal failure: log, pause, resume.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;

use relay_common::config::AppConfig;
use relay_common::types::Tag;
use relay_store::SubscriptionStore;

use crate::DispatchError;
use crate::backoff::Backoff;
use crate::batch::Batcher;
use crate::classifier::{Disposition, RecipientDisposition, classify};
use crate::provider::PushClient;
use crate::queue::{DelayQueue, EnqueueOutcome};
use crate::request::{DeliveryRequest, PendingTagSync};

/// Pause after an internal consumer failure before resuming the loop.
const CONSUMER_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub sync_queue_capacity: usize,
    pub delivery_queue_capacity: usize,
    /// Scheduling delay for freshly batched requests.
    pub initial_delay: Duration,
    /// Backoff schedule for delivery retries and full-queue insertions.
    pub retry_backoff: Backoff,
    /// Insertion attempts against a full queue before giving up.
    pub max_enqueue_attempts: u32,
    /// Send attempts per batch before it is dropped as permanently failed.
    pub max_delivery_attempts: u32,
}

impl DispatchConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            sync_queue_capacity: config.sync_queue_capacity,
            delivery_queue_capacity: config.delivery_queue_capacity,
            initial_delay: Duration::ZERO,
            retry_backoff: Backoff::new(
                Duration::from_millis(config.initial_retry_delay_ms),
                Duration::from_millis(config.max_retry_delay_ms),
            ),
            max_enqueue_attempts: config.max_enqueue_attempts,
            max_delivery_attempts: config.max_delivery_attempts,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            sync_queue_capacity: 20,
            delivery_queue_capacity: 100,
            initial_delay: Duration::ZERO,
            retry_backoff: Backoff::default(),
            max_enqueue_attempts: 10,
            max_delivery_attempts: 8,
        }
    }
}

/// Outcome of a sync request at the queue boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Enqueued,
    /// A sync for this tag is already in flight; the request was dropped.
    AlreadyQueued,
}

struct Inner {
    store: Arc<dyn SubscriptionStore>,
    client: PushClient,
    sync_queue: DelayQueue<PendingTagSync>,
    delivery_queue: DelayQueue<DeliveryRequest>,
    config: DispatchConfig,
}

/// The dispatch-and-reconciliation pipeline. Cheap to clone; all clones
/// share the same queues.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn SubscriptionStore>, client: PushClient, config: DispatchConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                client,
                sync_queue: DelayQueue::new(config.sync_queue_capacity),
                delivery_queue: DelayQueue::new(config.delivery_queue_capacity),
                config,
            }),
        }
    }

    /// Queue a broadcast for every current subscriber of `tag`.
    ///
    /// At most one sync per tag may be queued at a time; a duplicate request
    /// is reported as [`SyncOutcome::AlreadyQueued`] and relies on the
    /// in-flight sync to cover the tag.
    pub async fn request_sync(&self, tag: Tag) -> Result<SyncOutcome, DispatchError> {
        let outcome = self
            .inner
            .sync_queue
            .enqueue_with_backoff(
                PendingTagSync { tag: tag.clone() },
                Duration::ZERO,
                self.inner.config.retry_backoff,
                self.inner.config.max_enqueue_attempts,
            )
            .await?;

        match outcome {
            EnqueueOutcome::Enqueued => {
                tracing::info!(tag = %tag, "Tag sync queued");
                Ok(SyncOutcome::Enqueued)
            }
            EnqueueOutcome::AlreadyQueued => {
                tracing::debug!(tag = %tag, "Tag sync already queued, dropping duplicate");
                Ok(SyncOutcome::AlreadyQueued)
            }
            // enqueue_with_backoff surfaces a persistently full queue as
            // Err(QueueFull); a Full outcome here must not be mistaken for
            // deduplication.
            EnqueueOutcome::Full => Err(DispatchError::QueueFull {
                attempts: self.inner.config.max_enqueue_attempts,
            }),
        }
    }

    /// Start the two consumer loops. The returned handles run until the
    /// process shuts down.
    pub fn spawn(&self) -> Vec<JoinHandle<()>> {
        let sync = self.clone();
        let delivery = self.clone();
        vec![
            tokio::spawn(async move { sync.run_sync_consumer().await }),
            tokio::spawn(async move { delivery.run_delivery_consumer().await }),
        ]
    }

    async fn run_sync_consumer(self) {
        tracing::info!("Sync request consumer started");
        loop {
            let pending = self.inner.sync_queue.take().await;
            if let Err(e) = self.sync_tag(&pending.tag).await {
                tracing::error!(tag = %pending.tag, error = %e, "Tag sync failed, pausing consumer");
                sleep(CONSUMER_PAUSE).await;
            }
        }
    }

    async fn run_delivery_consumer(self) {
        tracing::info!("Delivery consumer started");
        loop {
            let request = self.inner.delivery_queue.take().await;
            let outcome = self.inner.client.send(&request).await;
            let disposition = classify(&outcome);
            if let Err(e) = self.apply(request, disposition).await {
                tracing::error!(error = %e, "Delivery reconciliation failed, pausing consumer");
                sleep(CONSUMER_PAUSE).await;
            }
        }
    }

    /// Batch a tag's subscriber snapshot into the delivery queue.
    async fn sync_tag(&self, tag: &Tag) -> anyhow::Result<()> {
        let requests =
            Batcher::batch(tag, self.inner.store.as_ref(), self.inner.config.initial_delay).await?;

        tracing::info!(tag = %tag, requests = requests.len(), "Tag sync batched");

        for request in requests {
            let delay = request.delay;
            self.inner
                .delivery_queue
                .enqueue_with_backoff(
                    request,
                    delay,
                    self.inner.config.retry_backoff,
                    self.inner.config.max_enqueue_attempts,
                )
                .await?;
        }

        Ok(())
    }

    /// Apply a classified provider verdict: mutate the store per recipient,
    /// re-enqueue the batch, or drop it.
    async fn apply(&self, request: DeliveryRequest, disposition: Disposition) -> anyhow::Result<()> {
        match disposition {
            Disposition::Done => {
                tracing::debug!(request = %request.id, tag = %request.tag, "Delivery complete");
                Ok(())
            }
            Disposition::Retry(reason) => self.retry(request, &reason).await,
            Disposition::Fatal(reason) => {
                tracing::error!(
                    request = %request.id,
                    tag = %request.tag,
                    attempt = request.attempt,
                    reason,
                    "Fatal provider response, dropping batch"
                );
                Ok(())
            }
            Disposition::Reconcile(dispositions) => self.reconcile(request, dispositions).await,
        }
    }

    async fn reconcile(
        &self,
        request: DeliveryRequest,
        dispositions: Vec<RecipientDisposition>,
    ) -> anyhow::Result<()> {
        let mut wants_retry = false;

        for (position, disposition) in dispositions.iter().enumerate() {
            let Some(recipient) = request.recipients.get(position) else {
                tracing::warn!(
                    request = %request.id,
                    position,
                    "Provider returned more results than recipients, ignoring extras"
                );
                break;
            };

            match disposition {
                RecipientDisposition::Delivered => {}
                RecipientDisposition::Ignore => {
                    tracing::debug!(request = %request.id, position, "Empty target set acknowledged");
                }
                RecipientDisposition::Rotated { new_id } => {
                    tracing::info!(
                        request = %request.id,
                        old_id = recipient,
                        new_id,
                        "Identifier rotation requested by provider"
                    );
                    self.inner
                        .store
                        .update_identifier_on_all_tags(recipient, new_id)
                        .await?;
                }
                RecipientDisposition::Remove => {
                    tracing::info!(
                        request = %request.id,
                        id = recipient,
                        "Unregistered identifier, removing from all tags"
                    );
                    self.inner
                        .store
                        .remove_identifier_from_all_tags(recipient)
                        .await?;
                }
                RecipientDisposition::RetryRequest => {
                    wants_retry = true;
                }
                RecipientDisposition::Fatal(code) => {
                    // Mutations already applied for earlier positions stand;
                    // the rest of this batch is abandoned.
                    tracing::error!(
                        request = %request.id,
                        tag = %request.tag,
                        position,
                        code = %code,
                        "Fatal provider error code, aborting batch"
                    );
                    return Ok(());
                }
            }
        }

        if wants_retry {
            self.retry(request, "recipient temporarily unavailable").await?;
        }

        Ok(())
    }

    /// Re-enqueue a batch with increased delay, or drop it once the attempt
    /// budget is spent.
    async fn retry(&self, request: DeliveryRequest, reason: &str) -> anyhow::Result<()> {
        if request.attempt + 1 >= self.inner.config.max_delivery_attempts {
            tracing::error!(
                request = %request.id,
                tag = %request.tag,
                attempts = request.attempt + 1,
                reason,
                "Delivery retries exhausted, dropping batch permanently"
            );
            return Ok(());
        }

        let retried = request.retried(&self.inner.config.retry_backoff);
        tracing::warn!(
            request = %retried.id,
            tag = %retried.tag,
            attempt = retried.attempt,
            delay_ms = retried.delay.as_millis() as u64,
            reason,
            "Re-enqueueing delivery with backoff"
        );

        let delay = retried.delay;
        self.inner
            .delivery_queue
            .enqueue_with_backoff(
                retried,
                delay,
                self.inner.config.retry_backoff,
                self.inner.config.max_enqueue_attempts,
            )
            .await?;
        Ok(())
    }

    /// Number of delivery requests currently queued.
    pub fn delivery_queue_len(&self) -> usize {
        self.inner.delivery_queue.len()
    }

    /// Number of tag syncs currently queued.
    pub fn sync_queue_len(&self) -> usize {
        self.inner.sync_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_store::memory::StoreCall;
    use relay_store::MemoryStore;

    use crate::provider::{DeliveryOutcome, ProviderResponse};

    fn tag(s: &str) -> Tag {
        Tag::normalize(s).unwrap()
    }

    fn recipients(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("device-{i}")).collect()
    }

    fn dispatcher_with(store: Arc<MemoryStore>, config: DispatchConfig) -> Dispatcher {
        let client = PushClient::new(
            "http://localhost:1/unused".to_string(),
            "key=test".to_string(),
        );
        Dispatcher::new(store, client, config)
    }

    fn reply(status: u16, body: &str) -> Disposition {
        classify(&DeliveryOutcome::Reply {
            status,
            body: serde_json::from_str::<ProviderResponse>(body).ok(),
        })
    }

    #[tokio::test]
    async fn test_sync_request_deduplicates_in_flight_tag() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher_with(store, DispatchConfig::default());

        assert_eq!(
            dispatcher.request_sync(tag("news")).await.unwrap(),
            SyncOutcome::Enqueued
        );
        assert_eq!(
            dispatcher.request_sync(tag("news")).await.unwrap(),
            SyncOutcome::AlreadyQueued
        );
        assert_eq!(dispatcher.sync_queue_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_queue_full_is_an_error_not_dedup() {
        let config = DispatchConfig {
            sync_queue_capacity: 1,
            max_enqueue_attempts: 2,
            ..DispatchConfig::default()
        };
        let dispatcher = dispatcher_with(Arc::new(MemoryStore::new()), config);

        assert_eq!(
            dispatcher.request_sync(tag("news")).await.unwrap(),
            SyncOutcome::Enqueued
        );

        // A different tag against a full queue exhausts its insertion
        // attempts and surfaces an error rather than AlreadyQueued.
        let result = dispatcher.request_sync(tag("sports")).await;
        assert!(matches!(
            result,
            Err(DispatchError::QueueFull { attempts: 2 })
        ));
        assert_eq!(dispatcher.sync_queue_len(), 1);
    }

    #[tokio::test]
    async fn test_rotation_at_position_3_updates_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher_with(store.clone(), DispatchConfig::default());
        let request = DeliveryRequest::new(tag("news"), recipients(4), Duration::ZERO);

        let disposition = reply(
            200,
            r#"{
                "failure": 0,
                "canonical_ids": 1,
                "results": [
                    { "message_id": "1:a" },
                    { "message_id": "1:b" },
                    { "message_id": "1:c" },
                    { "message_id": "1:d", "registration_id": "rotated-id" }
                ]
            }"#,
        );

        dispatcher.apply(request, disposition).await.unwrap();

        assert_eq!(
            store.mutation_calls(),
            vec![StoreCall::UpdateIdentifier {
                old_id: "device-3".to_string(),
                new_id: "rotated-id".to_string(),
            }]
        );
        assert_eq!(dispatcher.delivery_queue_len(), 0);
    }

    #[tokio::test]
    async fn test_not_registered_at_position_1_removes_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher_with(store.clone(), DispatchConfig::default());
        let request = DeliveryRequest::new(tag("news"), recipients(3), Duration::ZERO);

        let disposition = reply(
            200,
            r#"{
                "failure": 1,
                "canonical_ids": 0,
                "results": [
                    { "message_id": "1:a" },
                    { "error": "NotRegistered" },
                    { "message_id": "1:c" }
                ]
            }"#,
        );

        dispatcher.apply(request, disposition).await.unwrap();

        assert_eq!(
            store.mutation_calls(),
            vec![StoreCall::RemoveIdentifier("device-1".to_string())]
        );
        assert_eq!(dispatcher.delivery_queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_http_500_reenqueues_with_strictly_greater_delay() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher_with(store.clone(), DispatchConfig::default());
        let request = DeliveryRequest::new(tag("news"), recipients(2), Duration::ZERO);
        let original_delay = request.delay;
        let original_key = request.payload_key();

        dispatcher.apply(request, reply(500, "{}")).await.unwrap();

        // Not dropped: the batch is back in the queue.
        assert_eq!(dispatcher.delivery_queue_len(), 1);

        let retried = dispatcher.inner.delivery_queue.take().await;
        assert!(retried.delay > original_delay);
        assert_eq!(retried.attempt, 1);
        assert_eq!(retried.payload_key(), original_key);
        assert!(store.mutation_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_recipient_retries_whole_request() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher_with(store.clone(), DispatchConfig::default());
        let request = DeliveryRequest::new(tag("news"), recipients(2), Duration::ZERO);

        let disposition = reply(
            200,
            r#"{
                "failure": 1,
                "canonical_ids": 0,
                "results": [
                    { "message_id": "1:a" },
                    { "error": "Unavailable" }
                ]
            }"#,
        );

        dispatcher.apply(request, disposition).await.unwrap();

        assert_eq!(dispatcher.delivery_queue_len(), 1);
        let retried = dispatcher.inner.delivery_queue.take().await;
        assert_eq!(retried.recipients, recipients(2));
        assert!(store.mutation_calls().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_code_aborts_batch_and_keeps_prior_mutations() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher_with(store.clone(), DispatchConfig::default());
        let request = DeliveryRequest::new(tag("news"), recipients(3), Duration::ZERO);

        let disposition = reply(
            200,
            r#"{
                "failure": 3,
                "canonical_ids": 0,
                "results": [
                    { "error": "NotRegistered" },
                    { "error": "MessageTooBig" },
                    { "error": "NotRegistered" }
                ]
            }"#,
        );

        dispatcher.apply(request, disposition).await.unwrap();

        // Position 0 was reconciled before the fatal abort; position 2 never was.
        assert_eq!(
            store.mutation_calls(),
            vec![StoreCall::RemoveIdentifier("device-0".to_string())]
        );
        assert_eq!(dispatcher.delivery_queue_len(), 0);
    }

    #[tokio::test]
    async fn test_auth_failure_drops_batch_without_retry() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher_with(store.clone(), DispatchConfig::default());
        let request = DeliveryRequest::new(tag("news"), recipients(2), Duration::ZERO);

        dispatcher.apply(request, reply(401, "{}")).await.unwrap();

        assert_eq!(dispatcher.delivery_queue_len(), 0);
        assert!(store.mutation_calls().is_empty());
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_drops_batch() {
        let store = Arc::new(MemoryStore::new());
        let config = DispatchConfig {
            max_delivery_attempts: 2,
            ..DispatchConfig::default()
        };
        let dispatcher = dispatcher_with(store, config);

        let mut request = DeliveryRequest::new(tag("news"), recipients(1), Duration::ZERO);
        request.attempt = 1; // second send already happened

        dispatcher.apply(request, reply(500, "{}")).await.unwrap();

        assert_eq!(dispatcher.delivery_queue_len(), 0);
    }

    #[tokio::test]
    async fn test_clean_200_leaves_no_trace() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = dispatcher_with(store.clone(), DispatchConfig::default());
        let request = DeliveryRequest::new(tag("news"), recipients(2), Duration::ZERO);

        let disposition = reply(200, r#"{"failure": 0, "canonical_ids": 0, "results": []}"#);
        dispatcher.apply(request, disposition).await.unwrap();

        assert_eq!(dispatcher.delivery_queue_len(), 0);
        assert!(store.mutation_calls().is_empty());
    }
}
