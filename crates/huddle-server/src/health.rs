use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

/// Structured health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub rooms: RoomInfo,
    pub connections: usize,
}

#[derive(Serialize)]
pub struct RoomInfo {
    pub active: usize,
    pub members: usize,
}

/// GET /health — server status, live room and connection counts.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let (active, members) = state.manager.stats();

    Json(HealthResponse {
        status: "ok",
        service: "huddle-server",
        version: env!("CARGO_PKG_VERSION"),
        rooms: RoomInfo { active, members },
        connections: state.ws_connection_count.load(Ordering::Relaxed),
    })
}
