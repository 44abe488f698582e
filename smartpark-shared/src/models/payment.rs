use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pii::Masked;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Zwl,
}

impl Currency {
    /// `ECOCASH_USD` settles in dollars, every other method in local currency
    pub fn for_payment_method(method: &str) -> Self {
        if method.trim().eq_ignore_ascii_case("ECOCASH_USD") {
            Currency::Usd
        } else {
            Currency::Zwl
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Zwl => "ZWL",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentIntentStatus {
    Pending,
    Successful,
    Failed,
}

impl PaymentIntentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentIntentStatus::Pending)
    }
}

/// A payment the user started but the gateway has not yet settled.
/// One intent yields at most one reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    pub id: String,
    /// Correlation key sent to the gateway and echoed back on the webhook
    pub reference: String,
    pub user_id: String,
    pub parking_lot_id: String,
    pub parking_lot_name: String,
    pub slot_id: String,
    pub duration_hours: u32,
    pub amount: f64,
    pub currency: Currency,
    pub payment_method: String,
    pub phone: Masked<String>,
    pub status: PaymentIntentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub requires_refund: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentIntent {
    /// Pending, or failed on our side without the money being accounted for.
    /// A paid result for such an intent must still produce a reservation or a refund.
    pub fn may_still_settle(&self) -> bool {
        match self.status {
            PaymentIntentStatus::Pending => true,
            PaymentIntentStatus::Failed => !self.requires_refund && self.reservation_id.is_none(),
            _ => false,
        }
    }

    pub fn mark_successful(&mut self, reservation_id: String, now: DateTime<Utc>) {
        self.status = PaymentIntentStatus::Successful;
        self.reservation_id = Some(reservation_id);
        self.failure_reason = None;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = PaymentIntentStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_follows_payment_method() {
        assert_eq!(Currency::for_payment_method("ECOCASH_USD"), Currency::Usd);
        assert_eq!(Currency::for_payment_method("ecocash_usd"), Currency::Usd);
        assert_eq!(Currency::for_payment_method("ECOCASH"), Currency::Zwl);
        assert_eq!(serde_json::to_value(Currency::Usd).unwrap(), "USD");
    }
}
