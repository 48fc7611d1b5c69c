use crate::error::DbError;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

/// Establishes a connection pool to the PostgreSQL database.
///
/// The pool is shared by every session in the process; `acquire_timeout`
/// keeps a saturated pool from blocking a trade indefinitely.
pub async fn connect(
    database_url: Option<&str>,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<PgPool, DbError> {
    let database_url = database_url.ok_or_else(|| {
        DbError::ConnectionConfigError("DATABASE_URL or store.database_url must be set.".to_string())
    })?;

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Applies the embedded migrations so the ledger tables exist.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DbError> {
    // Use a relative path from the crate root
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
