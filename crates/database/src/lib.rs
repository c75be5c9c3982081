pub mod migrations;
pub mod mock;
pub mod pool;
pub mod repositories;

pub use pool::DbPool;
pub use repositories::{ConversationRepository, InMemoryConversationRepository, PgConversationRepository, RepositoryError};

use anyhow::Result;
use config::DatabaseConfig;
use tracing::info;

pub use mock::create_mock_database;

/// Conversation Store (§4.J) bundling the connection pool with its
/// repository. Chronicle has exactly one bounded context worth persisting,
/// so — unlike the multi-tenant original this crate was carved out of —
/// `Database` wraps a single repository rather than a repository-per-table
/// grab bag.
pub struct Database {
    pub conversations: PgConversationRepository,
    pool: DbPool,
}

impl Database {
    pub fn new(pool: DbPool) -> Self {
        Self {
            conversations: PgConversationRepository::new(pool.clone()),
            pool,
        }
    }

    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        info!(host = %config.host, database = %config.database, "connecting to database");
        let pool = pool::create_pool(config).await?;
        Ok(Self::new(pool))
    }

    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run(&self.pool).await
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}
