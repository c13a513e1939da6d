//! Sync slot handlers: register, put, get and version.

use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use loopsync_core::sync::models::{RegisterResponse, VersionResponse};
use loopsync_core::sync::{SyncData, SyncServer};

pub async fn register(
    State(state): State<AppState>,
) -> Result<Json<RegisterResponse>, RelayError> {
    let key = state.store.register().await?;
    Ok(Json(RegisterResponse { key }))
}

pub async fn put_data(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(data): Json<SyncData>,
) -> Result<StatusCode, RelayError> {
    if data.version < 0 {
        return Err(RelayError::BadRequest("version must not be negative".to_string()));
    }

    state.store.put(&key, &data).await?;
    tracing::debug!("Accepted version {} for sync key", data.version);
    Ok(StatusCode::OK)
}

pub async fn get_data(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<SyncData>, RelayError> {
    Ok(Json(state.store.get_data(&key).await?))
}

pub async fn get_version(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<VersionResponse>, RelayError> {
    let version = state.store.get_data_version(&key).await?;
    Ok(Json(VersionResponse { version }))
}
