use config::DatabaseConfig;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::info;

/// Create a connection pool from configuration.
pub async fn create_pool(config: &DatabaseConfig) -> anyhow::Result<Pool> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.database.clone());
    cfg.user = Some(config.username.clone());
    cfg.password = Some(config.password.clone());
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });
    cfg.pool = Some(PoolConfig::new(config.max_connections as usize));

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| anyhow::anyhow!("failed to create pool: {e}"))?;

    info!(
        host = %config.host,
        port = config.port,
        database = %config.database,
        "database connection pool created"
    );

    let client = pool
        .get()
        .await
        .map_err(|e| anyhow::anyhow!("failed to get connection from pool: {e}"))?;
    client
        .simple_query("SELECT 1")
        .await
        .map_err(|e| anyhow::anyhow!("failed to test database connection: {e}"))?;
    info!("database connection test successful");

    Ok(pool)
}

/// Connection pool type alias
pub type DbPool = Pool;
