use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::AppError,
    middleware::auth::{issue_token, ROLE_CUSTOMER},
    state::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    token: String,
    user_id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/guest", post(login_guest))
}

/// POST /v1/auth/guest
/// Anonymous customer session; the profile is created on first use
async fn login_guest(State(state): State<AppState>) -> Result<Json<AuthResponse>, AppError> {
    let user_id = format!("guest_{}", Uuid::new_v4().simple());
    let email = format!("{}@guest.smartpark.local", user_id);

    let token = issue_token(&state.auth, &user_id, &email, ROLE_CUSTOMER)
        .map_err(|e| anyhow::anyhow!("Token encoding failed: {}", e))?;

    tracing::info!(user_id = %user_id, "Guest session issued");
    Ok(Json(AuthResponse { token, user_id }))
}
