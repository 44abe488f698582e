use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use smartpark_reservation::accounts::ProfileUpdate;
use smartpark_shared::{Bill, User};

use crate::{error::AppError, middleware::UserSession, state::AppState};

#[derive(Debug, Serialize)]
pub struct FavoriteResponse {
    pub favorite: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/me", get(get_profile).put(update_profile))
        .route("/v1/me/favorites/{lot_id}", post(toggle_favorite))
        .route("/v1/me/notices-viewed", post(mark_notices_viewed))
        .route("/v1/bills", get(list_bills))
        .route("/v1/bills/{id}/pay", post(pay_bill))
}

// ============================================================================
// Profile
// ============================================================================

/// GET /v1/me
async fn get_profile(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.accounts.profile(&session.user_id, &session.email).await?))
}

/// PUT /v1/me
async fn update_profile(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.accounts.update_profile(&session.user_id, &session.email, update).await?))
}

/// POST /v1/me/favorites/{lot_id}
async fn toggle_favorite(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(lot_id): Path<String>,
) -> Result<Json<FavoriteResponse>, AppError> {
    // Unknown lots are not worth remembering
    state.lots.get(&lot_id).await?;
    let favorite = state.accounts.toggle_favorite(&session.user_id, &session.email, &lot_id).await?;
    Ok(Json(FavoriteResponse { favorite }))
}

/// POST /v1/me/notices-viewed
async fn mark_notices_viewed(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.accounts.mark_notices_viewed(&session.user_id, &session.email).await?))
}

// ============================================================================
// Bills
// ============================================================================

/// GET /v1/bills
async fn list_bills(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> Result<Json<Vec<Bill>>, AppError> {
    Ok(Json(state.billing.list_for(&session.user_id).await?))
}

/// POST /v1/bills/{id}/pay
async fn pay_bill(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(bill_id): Path<String>,
) -> Result<Json<Bill>, AppError> {
    Ok(Json(state.billing.pay(&session.user_id, &bill_id).await?))
}
