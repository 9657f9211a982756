//! Database initialization and migration runner.
//!
//! SYSTEM CONTEXT
//! ==============
//! The CLI uses this module to create the shared `SQLx` pool and bring the
//! `boards` / `board_elements` / `board_participants` schema (and its change
//! notification triggers) up to date before touching any board.

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Initialize the `PostgreSQL` connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    let pool = connect(database_url, max_connections).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Open a pool without touching the schema.
///
/// # Errors
///
/// Returns an error if the connection fails.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(database_url)
        .await
}

/// Apply pending migrations.
///
/// # Errors
///
/// Returns an error if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("src/db/migrations").run(pool).await?;
    Ok(())
}
