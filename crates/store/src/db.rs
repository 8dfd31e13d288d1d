use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use depesche_core::config::PostgresConfig;

use crate::error::StoreError;

/// Create the PostgreSQL connection pool and apply migrations.
pub async fn init_pg_pool(config: &PostgresConfig) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await?;
    info!("PostgreSQL connected: {}:{}/{}", config.host, config.port, config.database);

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("Database migrations applied");

    Ok(pool)
}
