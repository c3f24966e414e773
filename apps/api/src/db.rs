use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::migrate::MigrateError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Creates a PostgreSQL connection pool without connecting.
///
/// Connections are opened on first use, so an unreachable database does not
/// stop the server. The short acquire timeout turns a lost database into a
/// service-unavailable response instead of a hung request.
pub fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_lazy(database_url)
        .context("invalid DATABASE_URL")?;

    info!("PostgreSQL connection pool configured (max {max_connections} connections)");
    Ok(pool)
}

/// Applies pending migrations from `migrations/`.
pub async fn run_migrations(pool: &PgPool) -> Result<(), MigrateError> {
    sqlx::migrate!().run(pool).await?;
    info!("PostgreSQL schema is up to date");
    Ok(())
}
