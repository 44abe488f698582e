use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

use crate::error::ParkingError;

const PREFIX: &str = "SP";

/// Merchant reference sent to the gateway and echoed back on the webhook.
///
/// Wire form: `SP-{userId}-{lotId}-{slotId}-{hours}-{millis}`. Id components
/// may only contain ASCII letters, digits and `_`, so `-` stays a safe separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReference {
    pub user_id: String,
    pub lot_id: String,
    pub slot_id: String,
    pub hours: u32,
    pub timestamp_ms: i64,
}

impl PaymentReference {
    /// Whether `value` can appear as a user, lot or slot id inside a reference
    pub fn is_valid_id(value: &str) -> bool {
        is_component(value)
    }

    pub fn new(
        user_id: &str,
        lot_id: &str,
        slot_id: &str,
        hours: u32,
        at: DateTime<Utc>,
    ) -> Result<Self, ParkingError> {
        for (name, value) in [("user id", user_id), ("lot id", lot_id), ("slot id", slot_id)] {
            if !is_component(value) {
                return Err(ParkingError::Validation(format!(
                    "{} '{}' cannot be used in a payment reference",
                    name, value
                )));
            }
        }

        Ok(Self {
            user_id: user_id.to_string(),
            lot_id: lot_id.to_string(),
            slot_id: slot_id.to_string(),
            hours,
            timestamp_ms: at.timestamp_millis(),
        })
    }
}

fn is_component(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}-{}",
            PREFIX, self.user_id, self.lot_id, self.slot_id, self.hours, self.timestamp_ms
        )
    }
}

impl FromStr for PaymentReference {
    type Err = ParkingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParkingError::Validation(format!("Malformed payment reference: {}", s));

        let parts: Vec<&str> = s.trim().split('-').collect();
        let [prefix, user_id, lot_id, slot_id, hours, millis] = parts.as_slice() else {
            return Err(malformed());
        };

        if *prefix != PREFIX || ![user_id, lot_id, slot_id].iter().all(|c| is_component(c)) {
            return Err(malformed());
        }

        let hours: u32 = hours.parse().map_err(|_| malformed())?;
        let timestamp_ms: i64 = millis.parse().map_err(|_| malformed())?;
        if hours == 0 {
            return Err(malformed());
        }

        Ok(Self {
            user_id: user_id.to_string(),
            lot_id: lot_id.to_string(),
            slot_id: slot_id.to_string(),
            hours,
            timestamp_ms,
        })
    }
}
