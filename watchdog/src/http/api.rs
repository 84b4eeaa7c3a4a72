use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use crate::{
    app::{AppState, get_health},
    health::HealthState,
};

pub(crate) fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(get_all_health))
        .route("/health/{device_id}", get(get_device_health))
}

/// Health of every monitored device, keyed by device id.
async fn get_all_health(State(state): State<AppState>) -> impl IntoResponse {
    let table = state.health_rx.borrow().clone();
    Json((*table).clone())
}

async fn get_device_health(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<HealthState>, (StatusCode, String)> {
    get_health(&state.health_rx, &device_id)
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("No health recorded for device '{device_id}'"),
            )
        })
}
