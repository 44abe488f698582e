use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use smartpark_core::ParkingError;
use smartpark_reservation::ApplyOutcome;

use crate::{metrics, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/paynow", post(handle_paynow_webhook))
}

/// POST /v1/webhooks/paynow
/// Form-encoded status update from Paynow. Untrusted until the hash checks out;
/// answers with a bare status code only.
pub async fn handle_paynow_webhook(State(state): State<AppState>, body: Bytes) -> StatusCode {
    let (status, result) = match state.reconciler.handle_webhook(&body).await {
        Ok(ApplyOutcome::Confirmed(_)) => (StatusCode::OK, "confirmed"),
        Ok(ApplyOutcome::Failed(_)) => (StatusCode::OK, "failed"),
        Ok(ApplyOutcome::Pending) => (StatusCode::OK, "pending"),
        Ok(ApplyOutcome::AlreadyProcessed) => (StatusCode::OK, "duplicate"),
        // Intent is already flagged for refund
        Err(ParkingError::PostPaymentSlotConflict { .. }) => (StatusCode::OK, "slot_conflict"),
        Err(ParkingError::Validation(reason)) => {
            tracing::warn!(%reason, "Malformed webhook");
            (StatusCode::BAD_REQUEST, "malformed")
        }
        Err(ParkingError::SignatureInvalid) => (StatusCode::FORBIDDEN, "bad_signature"),
        Err(ParkingError::IntentNotFound(reference)) => {
            tracing::warn!(%reference, "Webhook for unknown payment");
            (StatusCode::NOT_FOUND, "unknown_intent")
        }
        Err(e) => {
            tracing::error!(error = %e, "Webhook processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "error")
        }
    };

    metrics::record_webhook(result);
    status
}
