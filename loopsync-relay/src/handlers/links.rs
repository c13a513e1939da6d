//! Pairing link handlers.

use crate::error::RelayError;
use crate::server::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use loopsync_core::sync::models::CreateLinkRequest;
use loopsync_core::sync::PairingLink;

pub async fn create_link(
    State(state): State<AppState>,
    Json(req): Json<CreateLinkRequest>,
) -> Result<Json<PairingLink>, RelayError> {
    if req.sync_key.is_empty() {
        return Err(RelayError::BadRequest("syncKey is required".to_string()));
    }
    if !state.storage.sync_key_exists(&req.sync_key)? {
        return Err(RelayError::NotFound("Sync key not found".to_string()));
    }

    let link = state
        .storage
        .insert_link(&req.sync_key, Utc::now().timestamp())?;
    tracing::info!("Created pairing link {}", link.id);
    Ok(Json(link))
}

pub async fn fetch_link(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PairingLink>, RelayError> {
    state
        .storage
        .find_link(&id, Utc::now().timestamp(), state.link_ttl_secs)?
        .map(Json)
        .ok_or_else(|| RelayError::NotFound("Link not found or expired".to_string()))
}
