//! Database layer for the policyhub backend.
//!
//! Provides connection pools for the two supported backends, the
//! single-transaction schema migration runner, and the query store used by
//! the HTTP service.
//!
//! # Design decisions
//!
//! - **Postgres via `sqlx`**: the deployed backend. Pools are built lazily,
//!   so constructing one performs no network I/O. TLS is always requested;
//!   certificate validation is skipped unless the operator opts in (see
//!   [`DbSettings::accept_invalid_certs`]).
//! - **SQLite via `r2d2` + `rusqlite`**: a file-backed backend for local
//!   development and tests, with WAL mode and foreign keys enabled.
//! - **One script, one transaction**: the migration runner sends the whole
//!   schema script as a single batch between `BEGIN` and `COMMIT`. There is
//!   no history table and no per-statement splitting.

mod error;
pub mod migrate;
mod pool;
mod source;
pub mod store;

pub use error::DbError;
pub use migrate::{MigrateConfig, MigrationError, MigrationReport, Migrator, SchemaScript};
pub use pool::{
    create_pg_pool, create_sqlite_pool, pg_connect_options, Backend, DbSettings, SqlitePool,
};
pub use source::{ConnectionSource, SchemaConnection, SqliteSchemaConnection};
pub use store::PolicyStore;
