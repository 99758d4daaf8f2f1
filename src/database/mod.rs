//! Storage connections.

use redis::aio::ConnectionManager;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::{DatabaseConfig, RedisConfig};
use crate::errors::Result;

pub mod schema;

/// Open the shared PostgreSQL connection pool.
pub async fn connect_postgres(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect(&config.uri)
        .await?;

    info!(uri = %config.uri, "Connected to PostgreSQL");
    Ok(pool)
}

/// Open the shared Redis connection.
///
/// The returned manager is cheap to clone and safe to share across tasks;
/// it reconnects transparently.
pub async fn connect_redis(config: &RedisConfig) -> Result<ConnectionManager> {
    let client = redis::Client::open(config.url.as_str())?;
    let mut conn = ConnectionManager::new(client).await?;

    let _: String = redis::cmd("PING").query_async(&mut conn).await?;

    info!(url = %config.url, "Connected to Redis");
    Ok(conn)
}
