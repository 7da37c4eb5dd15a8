//! Connection pool creation and configuration.

use crate::DbError;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::time::Duration;

/// Runtime tunables shared by both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbSettings {
    /// Maximum number of pooled connections.
    pub max_connections: u32,

    /// How long to wait for a free connection before giving up, in seconds.
    pub acquire_timeout_secs: u64,

    /// Accept any server certificate on Postgres TLS connections.
    ///
    /// Defaults to `true`: the connection is still encrypted (`sslmode=require`)
    /// but a self-signed or otherwise untrusted certificate is accepted. This
    /// trades server authentication for compatibility with managed hosts that
    /// present private CAs. Set to `false` to require `verify-full`.
    pub accept_invalid_certs: bool,

    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for DbSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_secs: 30,
            accept_invalid_certs: true,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Which backend a database URL points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// `postgres://` or `postgresql://`.
    Postgres,
    /// `sqlite://<path>` or `sqlite:<path>`.
    Sqlite {
        /// Filesystem path, or `:memory:`.
        path: String,
    },
}

impl Backend {
    /// Classifies a database URL by scheme. Returns `None` for schemes no
    /// backend understands.
    pub fn from_url(url: &str) -> Option<Self> {
        let url = url.trim();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Some(Self::Postgres);
        }

        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))?;
        if path.is_empty() {
            return None;
        }
        Some(Self::Sqlite {
            path: path.to_string(),
        })
    }
}

/// A type alias for the SQLite connection pool.
pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Parses a Postgres URL and applies the TLS policy from `settings`.
///
/// Any `sslmode` in the URL is overridden: the mode is always `require`
/// (encrypted, certificate not checked) or `verify-full`.
///
/// # Errors
///
/// Returns `DbError::Postgres` if the URL cannot be parsed.
pub fn pg_connect_options(url: &str, settings: &DbSettings) -> Result<PgConnectOptions, DbError> {
    let options: PgConnectOptions = url.parse()?;
    let ssl_mode = if settings.accept_invalid_certs {
        PgSslMode::Require
    } else {
        PgSslMode::VerifyFull
    };
    Ok(options.ssl_mode(ssl_mode))
}

/// Creates a lazily connecting Postgres pool.
///
/// No connection is opened until the first acquire, so this succeeds even if
/// the server is unreachable. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `DbError::Postgres` if the URL cannot be parsed.
pub fn create_pg_pool(url: &str, settings: &DbSettings) -> Result<PgPool, DbError> {
    let options = pg_connect_options(url, settings)?;
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .connect_lazy_with(options);
    Ok(pool)
}

/// Creates a new SQLite connection pool with WAL mode and foreign keys enabled.
///
/// # Arguments
///
/// * `db_path` - Path to the SQLite database file. `:memory:` is accepted,
///   but every pooled connection then sees its own private database.
///
/// # Errors
///
/// Returns `DbError::Pool` if the connection pool cannot be created.
pub fn create_sqlite_pool(db_path: &str, settings: &DbSettings) -> Result<SqlitePool, DbError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let busy_timeout_ms = settings.busy_timeout_ms;

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| {
            // In-memory databases report "memory" and that is fine.
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!(
                        "failed to set WAL journal mode, got: {}",
                        journal_mode
                    )),
                ));
            }
            conn.execute_batch(&format!(
                "PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = {};",
                busy_timeout_ms
            ))
        });

    // Connections open on demand; a migration run only ever needs one.
    let pool = Pool::builder()
        .max_size(settings.max_connections)
        .min_idle(Some(0))
        .connection_timeout(Duration::from_secs(settings.acquire_timeout_secs))
        .build(manager)?;

    Ok(pool)
}
