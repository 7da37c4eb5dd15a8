//! policyhub server library logic.

pub mod api;
pub mod config;
pub mod schema;

use axum::{extract::DefaultBodyLimit, routing::get, Extension, Json, Router};
use config::{ConfigError, DatabaseConfig, LoggingConfig};
use policyhub_db::{create_pg_pool, create_sqlite_pool, Backend, DbError, PolicyStore};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Query store for the configured backend.
    pub store: Arc<dyn PolicyStore>,
}

/// Errors that stop the server from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,

    #[error("failed to open database: {0}")]
    Database(#[from] DbError),
}

/// Maximum request body size (100 KiB).
const MAX_REQUEST_BODY_BYTES: usize = 100 * 1024;

/// Installs the global tracing subscriber.
pub fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_new(&logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Opens the query store for the configured backend.
///
/// Postgres pools connect lazily, so an unreachable server is only noticed
/// on first use (see [`check_database`]).
///
/// # Errors
///
/// Returns `StartupError` if no URL is set, the scheme is unsupported, or
/// the pool cannot be built.
pub fn open_store(database: &DatabaseConfig) -> Result<Arc<dyn PolicyStore>, StartupError> {
    let backend = database.backend()?.ok_or(StartupError::MissingDatabaseUrl)?;
    let settings = database.settings();

    let store: Arc<dyn PolicyStore> = match backend {
        Backend::Postgres => {
            let url = database.url().ok_or(StartupError::MissingDatabaseUrl)?;
            Arc::new(create_pg_pool(url, &settings)?)
        }
        Backend::Sqlite { path } => Arc::new(create_sqlite_pool(&path, &settings)?),
    };
    Ok(store)
}

/// Pings the database once and logs its clock or the failure.
///
/// Returns whether the ping succeeded. Startup continues either way.
pub async fn check_database(store: &dyn PolicyStore) -> bool {
    match store.ping().await {
        Ok(now) => {
            tracing::info!(database_time = %now, "successfully connected to the database");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "database connection error");
            false
        }
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/users",
            get(api::list_users_handler).post(api::create_user_handler),
        )
        .route("/housepolicies", get(api::list_house_policies_handler))
        .route("/policies", get(api::list_policies_handler))
        .route(
            "/users-with-policies",
            get(api::list_users_with_policies_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
