//! PushRelay API server binary entrypoint.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use relay_common::config::AppConfig;
use relay_common::db::create_pool;
use relay_dispatch::pipeline::{DispatchConfig, Dispatcher};
use relay_dispatch::provider::PushClient;
use relay_dispatch::registry::{TagRegistry, read_seed_file};
use relay_store::{PgSubscriptionStore, SubscriptionStore};

use relay_api::routes::create_router;
use relay_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("relay_api=debug,relay_dispatch=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting PushRelay API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database pool created");

    // Subscription store and tag registry (seed file unioned with storage)
    let store: Arc<dyn SubscriptionStore> = Arc::new(PgSubscriptionStore::new(pool));
    let seed = config
        .tags_file
        .as_deref()
        .map(|path| read_seed_file(Path::new(path)))
        .unwrap_or_default();
    let registry = Arc::new(TagRegistry::bootstrap(seed, store.as_ref()).await?);

    // Dispatch pipeline: queues plus the two consumer loops
    let client = PushClient::new(config.push_provider_url.clone(), config.push_api_key.clone());
    let dispatcher = Dispatcher::new(store.clone(), client, DispatchConfig::from_app(&config));
    dispatcher.spawn();
    tracing::info!("Dispatch pipeline started");

    // Build application state
    let state = AppState::new(store, registry, dispatcher);

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
