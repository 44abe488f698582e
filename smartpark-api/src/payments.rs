use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use smartpark_reservation::reconciler::{InitiatePayment, InitiateResponse};
use smartpark_reservation::ApplyOutcome;
use smartpark_shared::{PaymentIntent, Reservation};

use crate::{error::AppError, metrics, middleware::UserSession, state::AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    pub intent: PaymentIntent,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<Reservation>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments", post(initiate_payment))
        .route("/v1/payments/{id}", get(get_payment))
        .route("/v1/payments/{id}/poll", post(poll_payment))
}

/// POST /v1/payments
/// Start an EcoCash payment for a slot; the reservation is created when the payment lands
async fn initiate_payment(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Json(req): Json<InitiatePayment>,
) -> Result<Json<InitiateResponse>, AppError> {
    let result = state.reconciler.initiate(&session.user_id, &session.email, req).await;
    let outcome = match &result {
        Ok(response) if response.success => "accepted",
        Ok(_) => "rejected",
        Err(_) => "error",
    };
    metrics::PAYMENTS_INITIATED.with_label_values(&[outcome]).inc();
    Ok(Json(result?))
}

/// GET /v1/payments/{id}
async fn get_payment(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(intent_id): Path<String>,
) -> Result<Json<PaymentIntent>, AppError> {
    Ok(Json(state.reconciler.get_intent(Some(&session.user_id), &intent_id).await?))
}

/// POST /v1/payments/{id}/poll
/// Ask the gateway directly, for when the status update is slow to arrive
async fn poll_payment(
    State(state): State<AppState>,
    Extension(session): Extension<UserSession>,
    Path(intent_id): Path<String>,
) -> Result<Json<PollResponse>, AppError> {
    let (intent, outcome) = state.reconciler.poll_intent(Some(&session.user_id), &intent_id).await?;

    let (outcome, reservation) = match outcome {
        ApplyOutcome::Confirmed(reservation) => ("confirmed", Some(reservation)),
        ApplyOutcome::Failed(_) => ("failed", None),
        ApplyOutcome::Pending => ("pending", None),
        ApplyOutcome::AlreadyProcessed => ("already_processed", None),
    };
    Ok(Json(PollResponse { intent, outcome, reservation }))
}
