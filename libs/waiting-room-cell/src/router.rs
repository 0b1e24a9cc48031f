use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::handlers::{
    clear_queue, get_is_next, get_position, get_queue, get_stats, initialize_session,
    remove_patient, teardown_session,
};
use crate::WaitingRoomCell;

/// Waiting-room routes. Authentication sits in the connection layer in
/// front of this router; requests arrive with a resolved principal.
pub fn create_waiting_room_router(cell: Arc<WaitingRoomCell>) -> Router {
    Router::new()
        .route("/sessions", post(initialize_session))
        .route("/sessions/{session_id}", delete(teardown_session))
        .route("/queues/{provider_id}", get(get_queue).delete(clear_queue))
        .route(
            "/queues/{provider_id}/position/{patient_id}",
            get(get_position),
        )
        .route("/queues/{provider_id}/next/{patient_id}", get(get_is_next))
        .route(
            "/queues/{provider_id}/patients/{patient_id}",
            delete(remove_patient),
        )
        .route("/stats", get(get_stats))
        .with_state(cell)
}
