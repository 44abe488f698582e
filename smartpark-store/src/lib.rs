pub mod app_config;
pub mod memory;
pub mod paynow;
pub mod postgres;
pub mod redis_repo;

pub use memory::MemoryStore;
pub use paynow::PaynowGateway;
pub use postgres::PgDocumentStore;
pub use redis_repo::RedisClient;

use app_config::{StoreBackend, StoreConfig};
use smartpark_core::DocumentStore;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("store.database_url is required for the postgres backend")]
    MissingDatabaseUrl,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Build the configured document store, running migrations for Postgres
pub async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>, ConnectError> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory document store");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .ok_or(ConnectError::MissingDatabaseUrl)?;
            let store = PgDocumentStore::connect(url, config.max_connections).await?;
            store.migrate().await?;
            info!("Connected to Postgres document store");
            Ok(Arc::new(store))
        }
    }
}
