pub mod error;
pub mod gateway;
pub mod reference;
pub mod signature;
pub mod store;

pub use error::{ParkingError, ParkingResult, StoreError, StoreResult};
pub use gateway::{
    classify_status, GatewayError, GatewayInitiation, GatewayOutcome, GatewayRequest,
    MockPaymentGateway, PaymentGateway, PollStatus,
};
pub use reference::PaymentReference;
pub use signature::SignedPayload;
pub use store::{
    collections, run_transaction, ChangeEvent, ChangeKind, DocumentStore, Filter, Transaction,
};
