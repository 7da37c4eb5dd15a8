//! Single-transaction schema migration runner.
//!
//! A run reads one SQL script, checks out one connection, and executes the
//! whole script between `BEGIN` and `COMMIT`. Any failure inside the
//! transaction rolls it back, so the database ends up either fully migrated
//! or exactly as it was. Nothing records which scripts have run: a script
//! with unconditional DDL fails on its second run and that failure leaves the
//! first run's schema untouched.

use crate::{ConnectionSource, DbError, SchemaConnection};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that end a migration run.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Required configuration is missing. Raised before any database I/O.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The schema script could not be read. Raised before any database I/O.
    #[error("failed to read schema script {}: {source}", .path.display())]
    ScriptRead {
        /// Resolved script path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The database rejected the script. The transaction was rolled back.
    #[error("schema script {} failed and was rolled back: {source}", .path.display())]
    Execution {
        /// Resolved script path.
        path: PathBuf,
        /// The database error that aborted the script.
        source: DbError,
    },

    /// Any other failure, such as a connection that could not be acquired.
    #[error("unexpected migration failure: {0}")]
    Unexpected(#[source] DbError),
}

/// A schema script read fully into memory.
#[derive(Debug, Clone)]
pub struct SchemaScript {
    path: PathBuf,
    sql: String,
}

impl SchemaScript {
    /// Reads the script at `path` in full.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::ScriptRead` if the file is missing or is not
    /// valid UTF-8.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MigrationError> {
        let path = path.into();
        match std::fs::read_to_string(&path) {
            Ok(sql) => Ok(Self { path, sql }),
            Err(source) => Err(MigrationError::ScriptRead { path, source }),
        }
    }

    /// Where the script was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The script text.
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Inputs for one migration run.
#[derive(Debug, Clone)]
pub struct MigrateConfig {
    /// Target database URL. `None` or blank is a configuration error.
    pub database_url: Option<String>,

    /// Resolved location of the schema script.
    pub script_path: PathBuf,
}

/// Summary of a successful run.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    /// The script that was applied.
    pub script_path: PathBuf,
    /// Time from acquiring the connection to commit.
    pub elapsed: Duration,
}

/// Runs one schema script against one database.
#[derive(Debug, Clone)]
pub struct Migrator {
    config: MigrateConfig,
}

impl Migrator {
    pub fn new(config: MigrateConfig) -> Self {
        Self { config }
    }

    /// The configuration this runner was built with.
    pub fn config(&self) -> &MigrateConfig {
        &self.config
    }

    /// Performs a full migration run.
    ///
    /// The script is read and the URL checked before `open` is called, so a
    /// missing script or URL never touches the database. Once a source is
    /// open it is closed on every path, after the connection is released.
    ///
    /// # Errors
    ///
    /// Returns the [`MigrationError`] that ended the run.
    pub async fn run<S, F>(&self, open: F) -> Result<MigrationReport, MigrationError>
    where
        S: ConnectionSource,
        F: FnOnce(&str) -> Result<S, DbError>,
    {
        let script = SchemaScript::load(&self.config.script_path)?;

        let database_url = self
            .config
            .database_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| MigrationError::Configuration("DATABASE_URL is not set".to_string()))?;

        let source = open(database_url).map_err(MigrationError::Unexpected)?;
        let result = apply_script(&source, &script).await;
        source.close().await;
        result
    }
}

/// Applies `script` through one connection checked out of `source`.
///
/// The connection is released exactly once whether the script commits or
/// not. The source itself is left open.
///
/// # Errors
///
/// `Unexpected` if no connection can be acquired or no transaction started,
/// `Execution` if the script or its commit fails.
pub async fn apply_script<S: ConnectionSource>(
    source: &S,
    script: &SchemaScript,
) -> Result<MigrationReport, MigrationError> {
    tracing::info!(path = %script.path().display(), "running migrations");
    let started = Instant::now();

    let mut conn = source.acquire().await.map_err(MigrationError::Unexpected)?;
    let result = run_in_transaction(&mut conn, script).await;
    source.release(conn).await;
    result?;

    let report = MigrationReport {
        script_path: script.path().to_path_buf(),
        elapsed: started.elapsed(),
    };
    tracing::info!(
        path = %report.script_path.display(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "migrations completed successfully"
    );
    Ok(report)
}

async fn run_in_transaction<C: SchemaConnection>(
    conn: &mut C,
    script: &SchemaScript,
) -> Result<(), MigrationError> {
    conn.begin().await.map_err(MigrationError::Unexpected)?;

    let applied = match conn.execute_batch(script.sql()).await {
        Ok(()) => conn.commit().await,
        Err(e) => Err(e),
    };

    if let Err(source) = applied {
        match conn.rollback().await {
            Ok(()) => tracing::info!("migration transaction rolled back"),
            Err(e) => tracing::warn!(error = %e, "rollback after failed migration also failed"),
        }
        return Err(MigrationError::Execution {
            path: script.path().to_path_buf(),
            source,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    struct Log {
        opened: usize,
        acquired: usize,
        released: usize,
        closed: usize,
        calls: Vec<&'static str>,
        batches: Vec<String>,
    }

    #[derive(Debug, Clone, Copy, Default)]
    struct Faults {
        acquire: bool,
        begin: bool,
        execute: bool,
        commit: bool,
    }

    struct RecordingSource {
        log: Arc<Mutex<Log>>,
        faults: Faults,
    }

    struct RecordingConnection {
        log: Arc<Mutex<Log>>,
        faults: Faults,
    }

    fn driver_error(message: &str) -> DbError {
        DbError::Postgres(sqlx::Error::Protocol(message.to_string()))
    }

    #[async_trait]
    impl SchemaConnection for RecordingConnection {
        async fn begin(&mut self) -> Result<(), DbError> {
            self.log.lock().unwrap().calls.push("begin");
            if self.faults.begin {
                return Err(driver_error("cannot begin"));
            }
            Ok(())
        }

        async fn execute_batch(&mut self, sql: &str) -> Result<(), DbError> {
            let mut log = self.log.lock().unwrap();
            log.calls.push("execute");
            log.batches.push(sql.to_string());
            if self.faults.execute {
                return Err(driver_error("relation \"nonexistent_table\" does not exist"));
            }
            Ok(())
        }

        async fn commit(&mut self) -> Result<(), DbError> {
            self.log.lock().unwrap().calls.push("commit");
            if self.faults.commit {
                return Err(driver_error("deferred constraint violated"));
            }
            Ok(())
        }

        async fn rollback(&mut self) -> Result<(), DbError> {
            self.log.lock().unwrap().calls.push("rollback");
            Ok(())
        }
    }

    #[async_trait]
    impl ConnectionSource for RecordingSource {
        type Connection = RecordingConnection;

        async fn acquire(&self) -> Result<Self::Connection, DbError> {
            if self.faults.acquire {
                return Err(DbError::Postgres(sqlx::Error::PoolTimedOut));
            }
            self.log.lock().unwrap().acquired += 1;
            Ok(RecordingConnection {
                log: self.log.clone(),
                faults: self.faults,
            })
        }

        async fn release(&self, _conn: Self::Connection) {
            self.log.lock().unwrap().released += 1;
        }

        async fn close(self) {
            self.log.lock().unwrap().closed += 1;
        }
    }

    fn script_file(sql: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(sql.as_bytes()).unwrap();
        file
    }

    fn migrator(url: Option<&str>, script_path: &Path) -> Migrator {
        Migrator::new(MigrateConfig {
            database_url: url.map(str::to_string),
            script_path: script_path.to_path_buf(),
        })
    }

    async fn run_with(
        migrator: &Migrator,
        faults: Faults,
    ) -> (Result<MigrationReport, MigrationError>, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let handle = log.clone();
        let result = migrator
            .run(move |_url| {
                handle.lock().unwrap().opened += 1;
                Ok(RecordingSource {
                    log: handle.clone(),
                    faults,
                })
            })
            .await;
        (result, log)
    }

    #[tokio::test]
    async fn successful_run_commits_once_and_cleans_up() {
        let sql = "CREATE TABLE t (id INT);";
        let script = script_file(sql);
        let (result, log) = run_with(
            &migrator(Some("postgres://localhost/app"), script.path()),
            Faults::default(),
        )
        .await;

        let report = result.expect("run should succeed");
        assert_eq!(report.script_path, script.path());

        let log = log.lock().unwrap();
        assert_eq!(log.calls, vec!["begin", "execute", "commit"]);
        assert_eq!(log.batches, vec![sql.to_string()], "script is sent as one batch");
        assert_eq!((log.acquired, log.released, log.closed), (1, 1, 1));
    }

    #[tokio::test]
    async fn missing_url_fails_without_touching_the_database() {
        let script = script_file("CREATE TABLE t (id INT);");
        let (result, log) = run_with(&migrator(None, script.path()), Faults::default()).await;

        let err = result.expect_err("missing url should fail");
        assert!(matches!(err, MigrationError::Configuration(_)));
        assert!(err.to_string().contains("DATABASE_URL"));

        let log = log.lock().unwrap();
        assert_eq!(log.opened, 0);
        assert_eq!(log.acquired, 0);
        assert!(log.calls.is_empty());
    }

    #[tokio::test]
    async fn blank_url_counts_as_missing() {
        let script = script_file("SELECT 1;");
        let (result, log) = run_with(&migrator(Some("   "), script.path()), Faults::default()).await;

        assert!(matches!(result, Err(MigrationError::Configuration(_))));
        assert_eq!(log.lock().unwrap().opened, 0);
    }

    #[tokio::test]
    async fn missing_script_fails_without_touching_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("init.sql");
        let (result, log) = run_with(
            &migrator(Some("postgres://localhost/app"), &path),
            Faults::default(),
        )
        .await;

        match result.expect_err("missing script should fail") {
            MigrationError::ScriptRead { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other:?}"),
        }
        let log = log.lock().unwrap();
        assert_eq!((log.opened, log.acquired), (0, 0));
    }

    #[tokio::test]
    async fn missing_script_is_reported_before_missing_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.sql");
        let (result, _) = run_with(&migrator(None, &path), Faults::default()).await;

        assert!(matches!(result, Err(MigrationError::ScriptRead { .. })));
    }

    #[tokio::test]
    async fn failing_batch_rolls_back_and_releases() {
        let script = script_file("CREATE TABLE t (id INT); INSERT INTO nonexistent_table VALUES (1);");
        let faults = Faults {
            execute: true,
            ..Faults::default()
        };
        let (result, log) = run_with(
            &migrator(Some("postgres://localhost/app"), script.path()),
            faults,
        )
        .await;

        let err = result.expect_err("execution failure should surface");
        assert!(matches!(err, MigrationError::Execution { .. }));
        assert!(err.to_string().contains("nonexistent_table"));

        let log = log.lock().unwrap();
        assert_eq!(log.calls, vec!["begin", "execute", "rollback"]);
        assert_eq!((log.acquired, log.released, log.closed), (1, 1, 1));
    }

    #[tokio::test]
    async fn failing_commit_is_an_execution_error() {
        let script = script_file("CREATE TABLE t (id INT);");
        let faults = Faults {
            commit: true,
            ..Faults::default()
        };
        let (result, log) = run_with(
            &migrator(Some("postgres://localhost/app"), script.path()),
            faults,
        )
        .await;

        assert!(matches!(result, Err(MigrationError::Execution { .. })));
        let log = log.lock().unwrap();
        assert_eq!(log.calls, vec!["begin", "execute", "commit", "rollback"]);
        assert_eq!(log.acquired, log.released);
    }

    #[tokio::test]
    async fn failing_begin_is_unexpected_and_still_releases() {
        let script = script_file("CREATE TABLE t (id INT);");
        let faults = Faults {
            begin: true,
            ..Faults::default()
        };
        let (result, log) = run_with(
            &migrator(Some("postgres://localhost/app"), script.path()),
            faults,
        )
        .await;

        assert!(matches!(result, Err(MigrationError::Unexpected(_))));
        let log = log.lock().unwrap();
        assert_eq!(log.calls, vec!["begin"]);
        assert_eq!((log.acquired, log.released, log.closed), (1, 1, 1));
    }

    #[tokio::test]
    async fn acquire_failure_is_unexpected_and_closes_source() {
        let script = script_file("CREATE TABLE t (id INT);");
        let faults = Faults {
            acquire: true,
            ..Faults::default()
        };
        let (result, log) = run_with(
            &migrator(Some("postgres://localhost/app"), script.path()),
            faults,
        )
        .await;

        assert!(matches!(result, Err(MigrationError::Unexpected(_))));
        let log = log.lock().unwrap();
        assert_eq!((log.acquired, log.released, log.closed), (0, 0, 1));
        assert!(log.calls.is_empty());
    }

    #[tokio::test]
    async fn source_open_failure_is_unexpected() {
        let script = script_file("CREATE TABLE t (id INT);");
        let result = migrator(Some("postgres://localhost/app"), script.path())
            .run(|_url| -> Result<RecordingSource, DbError> { Err(driver_error("bad url")) })
            .await;

        assert!(matches!(result, Err(MigrationError::Unexpected(_))));
    }

    #[tokio::test]
    async fn open_receives_trimmed_url() {
        let script = script_file("SELECT 1;");
        let seen = Arc::new(Mutex::new(String::new()));
        let seen_in_open = seen.clone();
        let log = Arc::new(Mutex::new(Log::default()));

        migrator(Some("  sqlite://app.db \n"), script.path())
            .run(move |url| {
                *seen_in_open.lock().unwrap() = url.to_string();
                Ok(RecordingSource {
                    log,
                    faults: Faults::default(),
                })
            })
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), "sqlite://app.db");
    }
}
