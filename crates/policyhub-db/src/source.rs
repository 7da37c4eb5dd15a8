//! Connection sources: where the migration runner gets its single connection.
//!
//! The runner only needs four operations on a connection and three on its
//! source, so both backends (and test doubles) plug in through these traits.

use crate::{DbError, SqlitePool};
use async_trait::async_trait;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use sqlx::pool::PoolConnection;
use sqlx::{Executor, PgPool, Postgres};

/// A checked-out connection able to run a schema script transactionally.
#[async_trait]
pub trait SchemaConnection: Send {
    /// Opens a transaction.
    async fn begin(&mut self) -> Result<(), DbError>;

    /// Executes `sql` as one multi-statement batch.
    async fn execute_batch(&mut self, sql: &str) -> Result<(), DbError>;

    /// Commits the open transaction.
    async fn commit(&mut self) -> Result<(), DbError>;

    /// Rolls back the open transaction.
    async fn rollback(&mut self) -> Result<(), DbError>;
}

/// Issues and reclaims [`SchemaConnection`]s.
///
/// `release` takes the connection by value, so a connection can be handed
/// back at most once.
#[async_trait]
pub trait ConnectionSource: Send + Sync + Sized {
    /// The connection type this source hands out.
    type Connection: SchemaConnection;

    /// Checks out one connection.
    async fn acquire(&self) -> Result<Self::Connection, DbError>;

    /// Returns a connection to the source.
    async fn release(&self, conn: Self::Connection);

    /// Shuts the source down. No connections remain open afterwards.
    async fn close(self);
}

#[async_trait]
impl SchemaConnection for PoolConnection<Postgres> {
    async fn begin(&mut self) -> Result<(), DbError> {
        Executor::execute(&mut **self, "BEGIN").await?;
        Ok(())
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), DbError> {
        // A bare string with no bind arguments goes over the simple query
        // protocol, which accepts several statements in one round trip.
        Executor::execute(&mut **self, sql).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        Executor::execute(&mut **self, "COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        Executor::execute(&mut **self, "ROLLBACK").await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionSource for PgPool {
    type Connection = PoolConnection<Postgres>;

    async fn acquire(&self) -> Result<Self::Connection, DbError> {
        let conn = sqlx::Pool::acquire(self).await?;
        tracing::debug!("acquired postgres connection");
        Ok(conn)
    }

    async fn release(&self, conn: Self::Connection) {
        drop(conn);
        tracing::debug!("released postgres connection");
    }

    async fn close(self) {
        // Waits for checked-out connections to come back before closing them.
        sqlx::Pool::close(&self).await;
        tracing::debug!("postgres pool closed");
    }
}

/// A pooled SQLite connection that runs its statements on the blocking pool.
///
/// rusqlite calls block, so each statement moves the connection into
/// `spawn_blocking` and takes it back when the call returns.
pub struct SqliteSchemaConnection {
    conn: Option<PooledConnection<SqliteConnectionManager>>,
}

impl SqliteSchemaConnection {
    fn new(conn: PooledConnection<SqliteConnectionManager>) -> Self {
        Self { conn: Some(conn) }
    }

    async fn run(&mut self, sql: String) -> Result<(), DbError> {
        // Only empty if an earlier blocking task panicked, in which case the
        // connection was already dropped back into the pool.
        let conn = self.conn.take().ok_or(DbError::ConnectionLost)?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = conn.execute_batch(&sql);
            (conn, result)
        })
        .await?;
        self.conn = Some(conn);
        Ok(result?)
    }
}

#[async_trait]
impl SchemaConnection for SqliteSchemaConnection {
    async fn begin(&mut self) -> Result<(), DbError> {
        self.run("BEGIN".to_string()).await
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), DbError> {
        self.run(sql.to_string()).await
    }

    async fn commit(&mut self) -> Result<(), DbError> {
        self.run("COMMIT".to_string()).await
    }

    async fn rollback(&mut self) -> Result<(), DbError> {
        self.run("ROLLBACK".to_string()).await
    }
}

#[async_trait]
impl ConnectionSource for SqlitePool {
    type Connection = SqliteSchemaConnection;

    async fn acquire(&self) -> Result<Self::Connection, DbError> {
        let pool = self.clone();
        let conn = tokio::task::spawn_blocking(move || pool.get()).await??;
        tracing::debug!("acquired sqlite connection");
        Ok(SqliteSchemaConnection::new(conn))
    }

    async fn release(&self, conn: Self::Connection) {
        drop(conn);
        tracing::debug!("released sqlite connection");
    }

    async fn close(self) {
        // r2d2 closes idle connections once the last pool handle is dropped.
        drop(self);
        tracing::debug!("sqlite pool closed");
    }
}
