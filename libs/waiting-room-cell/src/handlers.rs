use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use shared_models::{auth::Principal, error::AppError};

use crate::WaitingRoomCell;
use crate::models::InitializeSessionRequest;

/// Open a waiting-room session for an authenticated principal and return
/// the initial aggregated snapshot.
pub async fn initialize_session(
    State(cell): State<Arc<WaitingRoomCell>>,
    Json(request): Json<InitializeSessionRequest>,
) -> Result<Json<Value>, AppError> {
    info!("Session initialization for user: {}", request.user_id);

    let principal = Principal {
        user_id: request.user_id,
        email: request.email,
    };

    let snapshot = cell
        .registry
        .initialize_session(&principal, request.channel)
        .await?;

    Ok(Json(json!({
        "session_id": snapshot.session_id,
        "patient_id": snapshot.patient_id,
        "entries": snapshot.entries,
        "generated_at": snapshot.generated_at,
    })))
}

/// Close a session. Queue membership is untouched; a disconnected patient
/// keeps their place.
pub async fn teardown_session(
    State(cell): State<Arc<WaitingRoomCell>>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    cell.registry.teardown_session(session_id).await?;

    Ok(Json(json!({ "success": true })))
}

/// Ordered snapshot of one provider's queue.
pub async fn get_queue(
    State(cell): State<Arc<WaitingRoomCell>>,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let entries = cell.store.list(provider_id).await?;

    Ok(Json(json!({
        "provider_id": provider_id,
        "entries": entries,
    })))
}

/// Live position lookup; null when the patient is not queued here.
pub async fn get_position(
    State(cell): State<Arc<WaitingRoomCell>>,
    Path((provider_id, patient_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let position = cell.store.position(provider_id, patient_id).await?;

    Ok(Json(json!({
        "provider_id": provider_id,
        "patient_id": patient_id,
        "position": position,
    })))
}

pub async fn get_is_next(
    State(cell): State<Arc<WaitingRoomCell>>,
    Path((provider_id, patient_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let is_next = cell.store.is_next(provider_id, patient_id).await?;

    Ok(Json(json!({
        "provider_id": provider_id,
        "patient_id": patient_id,
        "is_next": is_next,
    })))
}

/// Take a patient out of one provider's queue, e.g. after a status change
/// marked their visit completed or cancelled. Fans out the compacted
/// snapshot when something was actually removed.
pub async fn remove_patient(
    State(cell): State<Arc<WaitingRoomCell>>,
    Path((provider_id, patient_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>, AppError> {
    let removed = cell.store.remove(provider_id, patient_id).await?;

    if removed {
        info!(
            "Removed patient {} from provider {} queue",
            patient_id, provider_id
        );
        let snapshot = cell.store.list(provider_id).await?;
        if let Err(e) = cell.fanout.publish_provider(provider_id, snapshot).await {
            warn!("Fanout after removal failed for provider {}: {}", provider_id, e);
        }
    }

    Ok(Json(json!({ "removed": removed })))
}

/// Administrative wipe of one provider's queue.
pub async fn clear_queue(
    State(cell): State<Arc<WaitingRoomCell>>,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    cell.store.clear(provider_id).await?;

    if let Err(e) = cell.fanout.publish_provider(provider_id, Vec::new()).await {
        warn!("Fanout after clear failed for provider {}: {}", provider_id, e);
    }

    Ok(Json(json!({ "success": true })))
}

pub async fn get_stats(
    State(cell): State<Arc<WaitingRoomCell>>,
) -> Result<Json<Value>, AppError> {
    let stats = cell.registry.stats().await?;

    Ok(Json(json!({
        "active_sessions": stats.active_sessions,
        "tracked_providers": stats.tracked_providers,
    })))
}
