use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use smartpark_core::ParkingError;
use smartpark_shared::Reservation;

use crate::{error::AppError, metrics, middleware::UserSession, state::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub lot_id: String,
    pub slot_id: String,
    pub hours: u32,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/reservations", post(claim).get(list_reservations))
        .route("/v1/reservations/{id}/parked", post(mark_parked))
        .route("/v1/reservations/{id}/leave", post(leave))
}

/// POST /v1/reservations
/// Claim a free slot directly
async fn claim(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Json(req): Json<ClaimRequest>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    match state.engine.claim(&session.user_id, &req.lot_id, &req.slot_id, req.hours).await {
        Ok(reservation) => {
            metrics::record_claim("confirmed");
            Ok((StatusCode::CREATED, Json(reservation)))
        }
        Err(e @ ParkingError::SlotUnavailable) => {
            metrics::record_claim("slot_unavailable");
            Err(e.into())
        }
        Err(e) => {
            metrics::record_claim("rejected");
            Err(e.into())
        }
    }
}

/// GET /v1/reservations
async fn list_reservations(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> Result<Json<Vec<Reservation>>, AppError> {
    Ok(Json(state.engine.list_for_user(&session.user_id).await?))
}

/// POST /v1/reservations/{id}/parked
async fn mark_parked(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(reservation_id): Path<String>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.engine.mark_parked(&session.user_id, &reservation_id).await?))
}

/// POST /v1/reservations/{id}/leave
async fn leave(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(reservation_id): Path<String>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.engine.leave(&session.user_id, &reservation_id).await?))
}
