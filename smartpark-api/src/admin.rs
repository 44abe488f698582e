use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smartpark_reservation::accounts::{ProfileUpdate, UserDetail};
use smartpark_reservation::community::NewNotice;
use smartpark_reservation::lots::{LotUpdate, NewLot, NewSlot};
use smartpark_reservation::reports::{Period, RevenueReport};
use smartpark_shared::{Notice, ParkingLot, PaymentIntent, Review, User};

use crate::{error::AppError, middleware::UserSession, state::AppState};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub reply: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RevenueQuery {
    #[serde(default)]
    pub period: Period,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SeedResponse {
    pub created: usize,
}

/// Mounted under `/v1/admin` behind the admin guard
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/lots", post(create_lot))
        .route("/lots/{id}", put(update_lot).delete(delete_lot))
        .route("/lots/{id}/slots", post(add_slot))
        .route("/lots/{id}/slots/{slot_id}", delete(remove_slot))
        .route("/users", get(list_users))
        .route("/users/{uid}", get(get_user).put(update_user))
        .route("/notices", post(create_notice))
        .route("/notices/{id}", delete(delete_notice))
        .route("/reviews", get(list_reviews))
        .route("/reviews/{id}", delete(delete_review))
        .route("/reviews/{id}/reply", post(reply_to_review))
        .route("/reports/revenue", get(revenue_report))
        .route("/payments/refunds", get(refunds_due))
        .route("/seed", post(seed_demo_lots))
}

// ============================================================================
// Lot Management Handlers
// ============================================================================

/// POST /v1/admin/lots
async fn create_lot(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Json(req): Json<NewLot>,
) -> Result<(StatusCode, Json<ParkingLot>), AppError> {
    let lot = state.lots.create(req).await?;
    tracing::info!(admin = %session.user_id, lot_id = %lot.id, "Admin created lot");
    Ok((StatusCode::CREATED, Json(lot)))
}

/// PUT /v1/admin/lots/{id}
async fn update_lot(
    State(state): State<AppState>,
    Path(lot_id): Path<String>,
    Json(update): Json<LotUpdate>,
) -> Result<Json<ParkingLot>, AppError> {
    Ok(Json(state.lots.update(&lot_id, update).await?))
}

/// DELETE /v1/admin/lots/{id}
async fn delete_lot(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(lot_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.lots.delete(&lot_id).await?;
    tracing::info!(admin = %session.user_id, lot_id = %lot_id, "Admin deleted lot");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/admin/lots/{id}/slots
async fn add_slot(
    State(state): State<AppState>,
    Path(lot_id): Path<String>,
    Json(slot): Json<NewSlot>,
) -> Result<Json<ParkingLot>, AppError> {
    Ok(Json(state.lots.add_slot(&lot_id, slot).await?))
}

/// DELETE /v1/admin/lots/{id}/slots/{slot_id}
async fn remove_slot(
    State(state): State<AppState>,
    Path((lot_id, slot_id)): Path<(String, String)>,
) -> Result<Json<ParkingLot>, AppError> {
    Ok(Json(state.lots.remove_slot(&lot_id, &slot_id).await?))
}

/// POST /v1/admin/seed
async fn seed_demo_lots(State(state): State<AppState>) -> Result<Json<SeedResponse>, AppError> {
    let created = state.lots.seed_demo_lots().await?;
    Ok(Json(SeedResponse { created }))
}

// ============================================================================
// User Management Handlers
// ============================================================================

/// GET /v1/admin/users
async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.accounts.list().await?))
}

/// GET /v1/admin/users/{uid}
async fn get_user(State(state): State<AppState>, Path(uid): Path<String>) -> Result<Json<UserDetail>, AppError> {
    Ok(Json(state.accounts.detail(&uid).await?))
}

/// PUT /v1/admin/users/{uid}
async fn update_user(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.accounts.admin_update(&uid, update).await?))
}

// ============================================================================
// Notices & Reviews
// ============================================================================

/// POST /v1/admin/notices
async fn create_notice(
    State(state): State<AppState>,
    Json(req): Json<NewNotice>,
) -> Result<(StatusCode, Json<Notice>), AppError> {
    Ok((StatusCode::CREATED, Json(state.community.publish_notice(req).await?)))
}

/// DELETE /v1/admin/notices/{id}
async fn delete_notice(State(state): State<AppState>, Path(notice_id): Path<String>) -> Result<StatusCode, AppError> {
    state.community.delete_notice(&notice_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/admin/reviews
async fn list_reviews(State(state): State<AppState>) -> Result<Json<Vec<Review>>, AppError> {
    Ok(Json(state.community.reviews(None).await?))
}

/// POST /v1/admin/reviews/{id}/reply
async fn reply_to_review(
    State(state): State<AppState>,
    Path(review_id): Path<String>,
    Json(req): Json<ReplyRequest>,
) -> Result<Json<Review>, AppError> {
    Ok(Json(state.community.reply_to_review(&review_id, &req.reply).await?))
}

/// DELETE /v1/admin/reviews/{id}
async fn delete_review(State(state): State<AppState>, Path(review_id): Path<String>) -> Result<StatusCode, AppError> {
    state.community.delete_review(&review_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Reports
// ============================================================================

/// GET /v1/admin/reports/revenue?period=day|week|month&from&to
async fn revenue_report(
    State(state): State<AppState>,
    Query(query): Query<RevenueQuery>,
) -> Result<Json<RevenueReport>, AppError> {
    Ok(Json(state.reports.revenue(query.period, query.from, query.to).await?))
}

/// GET /v1/admin/payments/refunds
/// Paid intents whose slot was taken before confirmation
async fn refunds_due(State(state): State<AppState>) -> Result<Json<Vec<PaymentIntent>>, AppError> {
    Ok(Json(state.reconciler.refunds_due().await?))
}
