use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Push provider send endpoint (one HTTP POST per delivery batch)
    pub push_provider_url: String,

    /// API key sent in the Authorization header of every provider request
    pub push_api_key: String,

    /// Port the HTTP API listens on (default: 3000)
    pub port: u16,

    /// Optional path to a seed tags file (comma/newline-separated raw tags)
    pub tags_file: Option<String>,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Capacity of the tag sync request queue (default: 20)
    pub sync_queue_capacity: usize,

    /// Capacity of the delivery retry queue (default: 100)
    pub delivery_queue_capacity: usize,

    /// Base delay for retry backoff in milliseconds (default: 1000)
    pub initial_retry_delay_ms: u64,

    /// Ceiling for retry backoff in milliseconds (default: 300000 = 5 min)
    pub max_retry_delay_ms: u64,

    /// Attempts to insert into a full queue before giving up (default: 10)
    pub max_enqueue_attempts: u32,

    /// Delivery attempts per batch before it is dropped as permanently
    /// failed (default: 8)
    pub max_delivery_attempts: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            push_provider_url: std::env::var("PUSH_PROVIDER_URL").map_err(|_| {
                anyhow::anyhow!("PUSH_PROVIDER_URL environment variable is required")
            })?,
            push_api_key: std::env::var("PUSH_API_KEY")
                .map_err(|_| anyhow::anyhow!("PUSH_API_KEY environment variable is required"))?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid u16"))?,
            tags_file: std::env::var("TAGS_FILE").ok(),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DB_MAX_CONNECTIONS must be a valid u32"))?,
            sync_queue_capacity: std::env::var("SYNC_QUEUE_CAPACITY")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SYNC_QUEUE_CAPACITY must be a valid usize"))?,
            delivery_queue_capacity: std::env::var("DELIVERY_QUEUE_CAPACITY")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DELIVERY_QUEUE_CAPACITY must be a valid usize"))?,
            initial_retry_delay_ms: std::env::var("INITIAL_RETRY_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("INITIAL_RETRY_DELAY_MS must be a valid u64"))?,
            max_retry_delay_ms: std::env::var("MAX_RETRY_DELAY_MS")
                .unwrap_or_else(|_| "300000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_RETRY_DELAY_MS must be a valid u64"))?,
            max_enqueue_attempts: std::env::var("MAX_ENQUEUE_ATTEMPTS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_ENQUEUE_ATTEMPTS must be a valid u32"))?,
            max_delivery_attempts: std::env::var("MAX_DELIVERY_ATTEMPTS")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("MAX_DELIVERY_ATTEMPTS must be a valid u32"))?,
        })
    }
}
