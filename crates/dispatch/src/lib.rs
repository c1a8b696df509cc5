//! Dispatch-and-reconciliation pipeline.
//!
//! A tag sync request flows through the pipeline as:
//!
//! 1. [`registry::TagRegistry`] validates the tag and the sync queue
//!    deduplicates it (at most one in-flight sync per tag)
//! 2. [`batch::Batcher`] snapshots the tag's subscriber list and partitions
//!    it into delivery requests of at most 950 recipients
//! 3. The delivery retry queue releases each request once its delay elapses
//! 4. [`provider::PushClient`] posts the batch to the push provider
//! 5. [`classifier`] inspects the provider reply and decides, per recipient,
//!    whether to retry the whole batch, rotate or remove a stored
//!    identifier, or abort on a fatal configuration error
//!
//! [`pipeline::Dispatcher`] owns the queues and runs the two consumer loops.

pub mod backoff;
pub mod batch;
pub mod classifier;
pub mod pipeline;
pub mod provider;
pub mod queue;
pub mod registry;
pub mod request;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("queue full after {attempts} insertion attempts")]
    QueueFull { attempts: u32 },
}
