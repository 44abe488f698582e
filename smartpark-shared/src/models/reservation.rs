use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Reservation lifecycle.
///
/// `Confirmed -> Active -> Completed`, and `Confirmed | Active -> Expired` once past due.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Confirmed,
    Active,
    Completed,
    Expired,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationStatus::Completed | ReservationStatus::Expired)
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Confirmed, Active) | (Active, Completed) | (Confirmed, Expired) | (Active, Expired)
        )
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: String,
    pub user_id: String,
    pub parking_lot_id: String,
    pub slot_id: String,
    pub parking_lot_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_hours: u32,
    pub amount_paid: f64,
    pub status: ReservationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_intent_id: Option<String>,
}

impl Reservation {
    /// A freshly claimed reservation running from `now` for `hours`
    pub fn confirmed(
        user_id: impl Into<String>,
        parking_lot_id: impl Into<String>,
        parking_lot_name: impl Into<String>,
        slot_id: impl Into<String>,
        hours: u32,
        amount_paid: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            user_id: user_id.into(),
            parking_lot_id: parking_lot_id.into(),
            slot_id: slot_id.into(),
            parking_lot_name: parking_lot_name.into(),
            start_time: now,
            end_time: now + Duration::hours(i64::from(hours)),
            duration_hours: hours,
            amount_paid,
            status: ReservationStatus::Confirmed,
            payment_intent_id: None,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.end_time < now
    }

    /// Restart the paid window at `now` (used when the driver actually parks)
    pub fn restamp(&mut self, now: DateTime<Utc>) {
        self.start_time = now;
        self.end_time = now + Duration::hours(i64::from(self.duration_hours));
    }
}
