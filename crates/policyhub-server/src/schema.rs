//! Locating the shipped schema scripts and running them.
//!
//! Scripts live in a `db/` directory next to the runner, never relative to
//! the working directory. An installed binary looks in `<exe dir>/db/`; a
//! binary run from the source tree falls back to this crate's own `db/`.

use crate::config::Config;
use policyhub_db::{
    create_pg_pool, create_sqlite_pool, Backend, MigrateConfig, MigrationError, MigrationReport,
    Migrator,
};
use std::path::{Path, PathBuf};

/// Schema script for Postgres.
pub const POSTGRES_SCRIPT: &str = "init.sql";

/// Schema script for SQLite.
pub const SQLITE_SCRIPT: &str = "init.sqlite.sql";

/// The script that matches `backend`. Postgres when no backend is known.
pub fn script_name(backend: Option<&Backend>) -> &'static str {
    match backend {
        Some(Backend::Sqlite { .. }) => SQLITE_SCRIPT,
        Some(Backend::Postgres) | None => POSTGRES_SCRIPT,
    }
}

/// Resolves `name` against the running executable, then the crate's
/// source directory.
pub fn resolve_script_path(name: &str) -> PathBuf {
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    resolve_script_path_from(exe_dir.as_deref(), name)
}

fn resolve_script_path_from(exe_dir: Option<&Path>, name: &str) -> PathBuf {
    if let Some(dir) = exe_dir {
        let installed = dir.join("db").join(name);
        if installed.is_file() {
            return installed;
        }
    }
    Path::new(env!("CARGO_MANIFEST_DIR")).join("db").join(name)
}

/// Applies the backend's schema script to the configured database.
///
/// # Errors
///
/// Returns `MigrationError::Configuration` for an unsupported URL scheme,
/// otherwise whatever [`Migrator::run`] reports.
pub async fn run_migration(config: &Config) -> Result<MigrationReport, MigrationError> {
    let backend = config
        .database
        .backend()
        .map_err(|e| MigrationError::Configuration(e.to_string()))?;

    let script_path = resolve_script_path(script_name(backend.as_ref()));
    tracing::info!(path = %script_path.display(), "resolved schema script");

    let migrator = Migrator::new(MigrateConfig {
        database_url: config.database.url().map(str::to_string),
        script_path,
    });
    let settings = config.database.settings();

    match backend {
        Some(Backend::Sqlite { path }) => {
            migrator
                .run(|_url| create_sqlite_pool(&path, &settings))
                .await
        }
        Some(Backend::Postgres) | None => migrator.run(|url| create_pg_pool(url, &settings)).await,
    }
}
