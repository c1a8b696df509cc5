//! PostgreSQL pool construction for the subscription store.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// How long a checkout may wait on a saturated pool before the caller gets
/// a database error instead of blocking a consumer loop.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect a bounded pool shared by the API handlers and the dispatch
/// consumers.
///
/// `max_connections` comes from `AppConfig::db_max_connections` (default 20).
pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(database_url)
        .await?;

    tracing::info!(max_connections, "Subscription store pool ready");
    Ok(pool)
}
