use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use waiting_room_cell::{create_waiting_room_router, WaitingRoomCell};

pub fn create_router(cell: Arc<WaitingRoomCell>) -> Router {
    Router::new()
        .route("/", get(|| async { "Solace Clinic API is running!" }))
        .nest("/waiting-room", create_waiting_room_router(cell))
}
