//! policyhub schema migration runner.
//!
//! Applies `db/init.sql` (or `db/init.sqlite.sql` for SQLite URLs) inside a
//! single transaction. Exits 0 when the script commits and 1 on any failure.

use policyhub_server::{config, init_tracing, schema};
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let (config_path, config_source) = config::resolve_config_path();
    let config = match config::load_config(Some(config_path.as_str())) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(&config::LoggingConfig::default());
            tracing::error!(path = %config_path, error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.logging);
    tracing::debug!(
        source = config_source,
        path = %config_path,
        "resolved configuration path"
    );

    match schema::run_migration(&config).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "migration failed");
            ExitCode::FAILURE
        }
    }
}
