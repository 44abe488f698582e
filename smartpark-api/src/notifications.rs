use axum::{extract::State, routing::{get, post}, Extension, Json, Router};
use serde::{Deserialize, Serialize};
use smartpark_shared::Notification;

use crate::{error::AppError, middleware::UserSession, state::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct MarkReadRequest {
    /// All unread notifications when omitted
    #[serde(default)]
    pub ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/notifications", get(list_notifications))
        .route("/v1/notifications/read", post(mark_read))
}

/// GET /v1/notifications
async fn list_notifications(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
) -> Result<Json<Vec<Notification>>, AppError> {
    Ok(Json(state.notifier.list_for(&session.user_id).await?))
}

/// POST /v1/notifications/read
async fn mark_read(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, AppError> {
    let updated = state.notifier.mark_read(&session.user_id, req.ids.as_deref()).await?;
    Ok(Json(MarkReadResponse { updated }))
}
