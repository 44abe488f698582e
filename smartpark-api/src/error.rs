use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use smartpark_core::{ParkingError, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Unauthorized(String),
    #[error(transparent)]
    Parking(#[from] ParkingError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::Parking(err.into())
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Parking(err) => parking_status(err),
            AppError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub fn parking_status(err: &ParkingError) -> StatusCode {
    match err {
        ParkingError::Validation(_) | ParkingError::AmountMismatch { .. } => StatusCode::BAD_REQUEST,
        ParkingError::Forbidden(_) | ParkingError::SignatureInvalid => StatusCode::FORBIDDEN,
        ParkingError::LotNotFound(_)
        | ParkingError::SlotNotFound(_)
        | ParkingError::ReservationNotFound(_)
        | ParkingError::IntentNotFound(_)
        | ParkingError::NotFound(_)
        | ParkingError::Store(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND,
        ParkingError::SlotUnavailable
        | ParkingError::SlotOccupied(_)
        | ParkingError::InvalidTransition { .. }
        | ParkingError::PostPaymentSlotConflict { .. } => StatusCode::CONFLICT,
        ParkingError::OutstandingBill => StatusCode::PAYMENT_REQUIRED,
        ParkingError::Gateway(_) => StatusCode::BAD_GATEWAY,
        ParkingError::Configuration(_) | ParkingError::PartialTransaction(_) | ParkingError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Internal Server Error");
            "Internal Server Error".to_string()
        } else {
            if status == StatusCode::BAD_GATEWAY {
                tracing::warn!(error = %self, "Payment gateway error");
            }
            self.to_string()
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
