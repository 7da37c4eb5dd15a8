//! HTTP handlers for users and policies.
//!
//! Every handler is one store call. Database failures become a 500 with a
//! fixed `error` label and the driver message in `details`.

use crate::AppState;
use axum::{
    body::{Body, Bytes},
    extract::{Extension, Form, FromRequest, Json, Request},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use policyhub_db::DbError;
use policyhub_types::{HousePolicy, NewUser, Policy, User, UserWithPolicies};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("{error}: {details}")]
    Database {
        /// Stable label for the failed operation.
        error: &'static str,
        /// The underlying database message.
        details: String,
    },
}

impl ApiError {
    fn database(error: &'static str, source: DbError) -> Self {
        tracing::error!(details = %source, "{}", error);
        Self::Database {
            error,
            details: source.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
            }
            ApiError::Database { error, details } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": error, "details": details }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Extracts a body sent either as JSON or as an urlencoded form.
///
/// An empty body, or one with neither content type, yields `T::default()`
/// so the handler can report missing fields itself.
#[derive(Debug)]
pub struct JsonOrForm<T>(pub T);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyKind {
    Json,
    Form,
    Other,
}

fn body_kind(headers: &HeaderMap) -> BodyKind {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    else {
        return BodyKind::Other;
    };
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence == "application/x-www-form-urlencoded" {
        BodyKind::Form
    } else if essence == "application/json" || essence.ends_with("+json") {
        BodyKind::Json
    } else {
        BodyKind::Other
    }
}

impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Default,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let kind = body_kind(req.headers());
        let (parts, body) = req.into_parts();

        // Bytes honours the router's body limit.
        let bytes = Bytes::from_request(Request::from_parts(parts.clone(), body), state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        if kind == BodyKind::Other || bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(T::default()));
        }

        let req = Request::from_parts(parts, Body::from(bytes));
        let value = if kind == BodyKind::Form {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            value
        } else {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| ApiError::BadRequest(e.body_text()))?;
            value
        };
        Ok(Self(value))
    }
}

/// Request body for `POST /users`. Both fields are optional here so that a
/// missing field yields the route's own 400 message.
#[derive(Debug, Default, Deserialize)]
pub struct CreateUserRequest {
    pub full_name: Option<String>,
    pub role: Option<String>,
}

impl CreateUserRequest {
    fn into_new_user(self) -> Result<NewUser, ApiError> {
        let present = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        match (present(self.full_name), present(self.role)) {
            (Some(full_name), Some(role)) => Ok(NewUser { full_name, role }),
            _ => Err(ApiError::BadRequest(
                "full_name and role are required".to_string(),
            )),
        }
    }
}

/// Handler for `GET /users`.
pub async fn list_users_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = state
        .store
        .list_users()
        .await
        .map_err(|e| ApiError::database("Failed to fetch users", e))?;

    tracing::info!(count = users.len(), "retrieved users");
    Ok(Json(users))
}

/// Handler for `POST /users`.
pub async fn create_user_handler(
    Extension(state): Extension<Arc<AppState>>,
    JsonOrForm(payload): JsonOrForm<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let new_user = payload.into_new_user()?;

    let user = state
        .store
        .create_user(&new_user)
        .await
        .map_err(|e| ApiError::database("Failed to create user", e))?;

    tracing::info!(user_id = user.id, "created user");
    Ok((StatusCode::CREATED, Json(user)))
}

/// Handler for `GET /housepolicies`.
pub async fn list_house_policies_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<HousePolicy>>, ApiError> {
    let policies = state
        .store
        .list_house_policies()
        .await
        .map_err(|e| ApiError::database("Failed to fetch house policies", e))?;

    tracing::info!(count = policies.len(), "retrieved house policies");
    Ok(Json(policies))
}

/// Handler for `GET /policies`.
pub async fn list_policies_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<Policy>>, ApiError> {
    let policies = state
        .store
        .list_policies()
        .await
        .map_err(|e| ApiError::database("Failed to fetch policies", e))?;

    tracing::info!(count = policies.len(), "retrieved policies");
    Ok(Json(policies))
}

/// Handler for `GET /users-with-policies`.
///
/// Users without any policy are included with both flags false.
pub async fn list_users_with_policies_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<UserWithPolicies>>, ApiError> {
    let users = state
        .store
        .list_users_with_policies()
        .await
        .map_err(|e| ApiError::database("Failed to fetch users with policies", e))?;

    tracing::info!(count = users.len(), "retrieved users with policies");
    Ok(Json(users))
}
