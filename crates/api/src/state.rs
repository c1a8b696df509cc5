//! Shared application state for the Axum API server.

use std::sync::Arc;

use relay_dispatch::pipeline::Dispatcher;
use relay_dispatch::registry::TagRegistry;
use relay_store::SubscriptionStore;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SubscriptionStore>,
    pub registry: Arc<TagRegistry>,
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        registry: Arc<TagRegistry>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            store,
            registry,
            dispatcher,
        }
    }
}
