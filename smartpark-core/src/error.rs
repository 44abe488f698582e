use crate::gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
    #[error("Transaction conflict: {0}")]
    Conflict(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum ParkingError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Parking lot not found: {0}")]
    LotNotFound(String),
    #[error("Slot not found: {0}")]
    SlotNotFound(String),
    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),
    #[error("Payment intent not found: {0}")]
    IntentNotFound(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("This slot has just been taken! Please select another one.")]
    SlotUnavailable,
    #[error("Slot is occupied: {0}")]
    SlotOccupied(String),
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("You have an unpaid bill. Please settle it before reserving.")]
    OutstandingBill,
    #[error("Amount mismatch: expected {expected:.2}, received {received:.2}")]
    AmountMismatch { expected: f64, received: f64 },
    #[error("Invalid payment signature")]
    SignatureInvalid,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("Slot was taken after payment for intent {intent_id}")]
    PostPaymentSlotConflict { intent_id: String },
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Partial transaction failure: {0}")]
    PartialTransaction(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ParkingError {
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        ParkingError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<serde_json::Error> for ParkingError {
    fn from(err: serde_json::Error) -> Self {
        ParkingError::Store(StoreError::Serialization(err))
    }
}

pub type ParkingResult<T> = Result<T, ParkingError>;
