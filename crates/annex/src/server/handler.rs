//! Plugin record handlers
//!
//! Thin callers of [`PluginLifecycle`](crate::lifecycle::PluginLifecycle);
//! all policy lives there. Errors map onto status codes in [`ApiError`].

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use annex_types::{NewPlugin, PluginRecord};

use crate::error::Error;

use super::state::AppState;

/// `PUT /plugins/:id` body
#[derive(Debug, Deserialize)]
pub struct UpdateVersion {
    pub version: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostic: Option<String>,
}

/// Lifecycle error carrying the backoff hint for contention
pub struct ApiError {
    error: Error,
    retry_after_secs: u64,
}

impl ApiError {
    fn new(state: &AppState, error: Error) -> Self {
        Self {
            error,
            retry_after_secs: state.retry_after().as_secs().max(1),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.error.to_string();
        let (status, id, diagnostic) = match self.error {
            Error::Conflict { id, diagnostic } => (StatusCode::CONFLICT, Some(id), Some(diagnostic)),
            Error::NotFound(id) => (StatusCode::NOT_FOUND, Some(id), None),
            Error::LockContention(_) => (StatusCode::SERVICE_UNAVAILABLE, None, None),
            Error::Transition(_) => (StatusCode::UNPROCESSABLE_ENTITY, None, None),
            ref other => {
                tracing::error!("Plugin request failed: {}", other);
                (StatusCode::INTERNAL_SERVER_ERROR, None, None)
            }
        };

        let mut response = (
            status,
            Json(ErrorBody {
                error: message,
                id,
                diagnostic,
            }),
        )
            .into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(self.retry_after_secs),
            );
        }
        response
    }
}

pub async fn list_plugins(
    State(state): State<AppState>,
) -> Result<Json<Vec<PluginRecord>>, ApiError> {
    state
        .lifecycle()
        .list()
        .map(Json)
        .map_err(|e| ApiError::new(&state, e))
}

pub async fn get_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PluginRecord>, ApiError> {
    state
        .lifecycle()
        .get(&id)
        .map(Json)
        .map_err(|e| ApiError::new(&state, e))
}

pub async fn create_plugin(
    State(state): State<AppState>,
    Json(request): Json<NewPlugin>,
) -> Result<(StatusCode, Json<PluginRecord>), ApiError> {
    let record = state
        .lifecycle()
        .create(request)
        .await
        .map_err(|e| ApiError::new(&state, e))?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn update_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateVersion>,
) -> Result<Json<PluginRecord>, ApiError> {
    state
        .lifecycle()
        .update_version(&id, &body.version)
        .await
        .map(Json)
        .map_err(|e| ApiError::new(&state, e))
}

pub async fn delete_plugin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .lifecycle()
        .delete(&id)
        .await
        .map(|()| StatusCode::NO_CONTENT)
        .map_err(|e| ApiError::new(&state, e))
}
