use crate::Database;
use anyhow::Result;
use std::env;

/// Create a database handle for tests. If `TEST_DATABASE_URL` is set, connects to a
/// real local Postgres; otherwise builds a pool pointed at a host that doesn't
/// exist with a 1ms connect timeout, so anything that actually touches it fails
/// fast instead of hanging — for tests that exercise everything except the
/// repository's SQL.
pub async fn create_mock_database() -> Result<Database> {
    if let Ok(database_url) = env::var("TEST_DATABASE_URL") {
        let (_client, connection) = tokio_postgres::connect(&database_url, tokio_postgres::NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                eprintln!("connection error: {e}");
            }
        });

        let config = database_url.parse::<tokio_postgres::Config>()?;
        let mgr_config = deadpool_postgres::ManagerConfig {
            recycling_method: deadpool_postgres::RecyclingMethod::Fast,
        };
        let mgr = deadpool_postgres::Manager::from_config(config, tokio_postgres::NoTls, mgr_config);
        let pool = deadpool_postgres::Pool::builder(mgr).max_size(1).build()?;
        return Ok(Database::new(pool));
    }

    let mut pg_config = tokio_postgres::Config::new();
    pg_config
        .host("mock-host-that-doesnt-exist")
        .port(5432)
        .dbname("mock_db")
        .user("mock_user")
        .password("mock_pass")
        .connect_timeout(std::time::Duration::from_millis(1));

    let mgr_config = deadpool_postgres::ManagerConfig {
        recycling_method: deadpool_postgres::RecyclingMethod::Fast,
    };
    let mgr = deadpool_postgres::Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
    let pool = deadpool_postgres::Pool::builder(mgr).max_size(1).build()?;

    Ok(Database::new(pool))
}
