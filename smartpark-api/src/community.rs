use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use smartpark_reservation::community::NewReview;
use smartpark_shared::{Notice, Review};

use crate::{error::AppError, middleware::UserSession, state::AppState};

/// Unauthenticated reads
pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/notices", get(list_notices))
        .route("/v1/lots/{id}/reviews", get(list_lot_reviews))
}

pub fn customer_routes() -> Router<AppState> {
    Router::new().route("/v1/reviews", post(submit_review))
}

/// GET /v1/notices
async fn list_notices(State(state): State<AppState>) -> Result<Json<Vec<Notice>>, AppError> {
    Ok(Json(state.community.notices().await?))
}

/// GET /v1/lots/{id}/reviews
async fn list_lot_reviews(
    State(state): State<AppState>,
    Path(lot_id): Path<String>,
) -> Result<Json<Vec<Review>>, AppError> {
    Ok(Json(state.community.reviews(Some(&lot_id)).await?))
}

/// POST /v1/reviews
async fn submit_review(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Json(review): Json<NewReview>,
) -> Result<(StatusCode, Json<Review>), AppError> {
    let review = state.community.submit_review(&session.user_id, &session.email, review).await?;
    Ok((StatusCode::CREATED, Json(review)))
}
