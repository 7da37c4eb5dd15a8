//! Error type shared by pools, connection sources and the query store.

use thiserror::Error;

/// Errors raised by either database backend.
#[derive(Debug, Error)]
pub enum DbError {
    /// The Postgres driver reported an error.
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// SQLite reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The SQLite pool could not be built or could not hand out a connection.
    #[error("sqlite pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A row held a value the domain model cannot represent.
    #[error("failed to decode row: {0}")]
    Decode(String),

    /// A SQLite connection was lost when a blocking task holding it failed.
    #[error("sqlite connection lost after a failed blocking task")]
    ConnectionLost,

    /// A blocking database task panicked or was cancelled.
    #[error("database task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
