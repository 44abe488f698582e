pub mod content;
pub mod lot;
pub mod money;
pub mod notification;
pub mod payment;
pub mod reservation;
pub mod user;

pub use content::{Bill, BillStatus, Notice, Review};
pub use lot::{GeoPoint, ParkingLot, ParkingSlot};
pub use notification::{Notification, NotificationData, NotificationType};
pub use payment::{Currency, PaymentIntent, PaymentIntentStatus};
pub use reservation::{Reservation, ReservationStatus};
pub use user::User;
