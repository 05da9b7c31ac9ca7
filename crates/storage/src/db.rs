use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{self, SqliteConnectOptions, SqlitePool};
use tracing::info;

/// Open (creating if missing) the durable state database and apply the
/// schema. WAL mode so webhook invocations for different symbols never
/// block each other on reads.
pub async fn connect(database_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", database_path))?
        .create_if_missing(true)
        .journal_mode(sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlite::SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .statement_cache_capacity(100);

    let pool = SqlitePool::connect_with(options).await?;

    let schema = include_str!("../../../sql/schema.sql");
    sqlx::query(schema).execute(&pool).await?;

    info!("State database ready at {}", database_path);
    Ok(pool)
}

/// In-memory database for tests.
#[doc(hidden)]
pub async fn connect_ephemeral() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    let schema = include_str!("../../../sql/schema.sql");
    sqlx::query(schema).execute(&pool).await?;
    Ok(pool)
}
