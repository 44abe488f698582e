use chrono::{DateTime, Utc};
use smartpark_core::{collections, DocumentStore, Filter, ParkingError, ParkingResult};
use smartpark_shared::money::round_cents;
use smartpark_shared::{Bill, BillStatus, NotificationData, NotificationType, Reservation};
use smartpark_store::app_config::BillingRules;
use std::sync::Arc;
use tracing::{error, info};

use crate::notifier::Notifier;

/// Overstay charge: every started hour past `end_time`, at least one.
pub fn overstay_amount(end_time: DateTime<Utc>, now: DateTime<Utc>, hourly_rate: f64) -> f64 {
    let overdue_minutes = (now - end_time).num_minutes().max(0);
    let hours = ((overdue_minutes + 59) / 60).max(1);
    round_cents(hours as f64 * hourly_rate)
}

#[derive(Clone)]
pub struct BillingService {
    store: Arc<dyn DocumentStore>,
    notifier: Notifier,
    rules: BillingRules,
}

impl BillingService {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Notifier, rules: BillingRules) -> Self {
        Self { store, notifier, rules }
    }

    pub async fn has_outstanding(&self, user_id: &str) -> ParkingResult<bool> {
        let unpaid = self
            .store
            .query(
                collections::BILLS,
                &Filter::all().eq("userId", user_id).eq("status", "unpaid"),
            )
            .await?;
        Ok(!unpaid.is_empty())
    }

    pub async fn list_for(&self, user_id: &str) -> ParkingResult<Vec<Bill>> {
        let mut bills: Vec<Bill> = self
            .store
            .list(collections::BILLS, &Filter::all().eq("userId", user_id))
            .await?;
        bills.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bills)
    }

    pub async fn pay(&self, user_id: &str, bill_id: &str) -> ParkingResult<Bill> {
        let mut bill: Bill = self
            .store
            .read(collections::BILLS, bill_id)
            .await?
            .ok_or_else(|| ParkingError::NotFound(format!("bill {}", bill_id)))?;
        if bill.user_id != user_id {
            return Err(ParkingError::Forbidden("bill belongs to another user".to_string()));
        }
        if bill.status == BillStatus::Paid {
            return Ok(bill);
        }

        bill.status = BillStatus::Paid;
        bill.updated_at = Utc::now();
        self.store.write(collections::BILLS, &bill.id, &bill).await?;
        info!(bill_id, user_id, amount = bill.amount, "Bill settled");
        Ok(bill)
    }

    /// Issue (or raise) the overstay bill for an expired reservation. Best effort.
    pub async fn issue_overstay(&self, reservation: &Reservation, now: DateTime<Utc>) -> Option<Bill> {
        if self.rules.overstay_hourly_rate <= 0.0 {
            return None;
        }

        match self.upsert_overstay(reservation, now).await {
            Ok(bill) => {
                self.notifier
                    .send(
                        &bill.user_id,
                        NotificationType::BillDue,
                        format!(
                            "You overstayed at {}. A bill of ${:.2} is due.",
                            reservation.parking_lot_name, bill.amount
                        ),
                        Some(NotificationData {
                            reservation_id: Some(reservation.id.clone()),
                            bill_amount: Some(bill.amount),
                            bill_id: Some(bill.id.clone()),
                            parking_lot_name: Some(reservation.parking_lot_name.clone()),
                            ..Default::default()
                        }),
                    )
                    .await;
                Some(bill)
            }
            Err(e) => {
                error!(reservation_id = %reservation.id, error = %e, "Failed to issue overstay bill");
                None
            }
        }
    }

    async fn upsert_overstay(&self, reservation: &Reservation, now: DateTime<Utc>) -> ParkingResult<Bill> {
        let amount = overstay_amount(reservation.end_time, now, self.rules.overstay_hourly_rate);

        let existing: Vec<Bill> = self
            .store
            .list(
                collections::BILLS,
                &Filter::all().eq("reservationId", reservation.id.as_str()),
            )
            .await?;

        let bill = match existing.into_iter().next() {
            Some(mut bill) if bill.status == BillStatus::Unpaid => {
                bill.amount = bill.amount.max(amount);
                bill.updated_at = now;
                bill
            }
            Some(bill) => return Ok(bill),
            None => Bill::unpaid(&reservation.user_id, Some(reservation.id.clone()), amount, now),
        };

        self.store.write(collections::BILLS, &bill.id, &bill).await?;
        info!(bill_id = %bill.id, reservation_id = %reservation.id, amount = bill.amount, "Overstay bill issued");
        Ok(bill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_overstay_charges_started_hours() {
        let end = Utc::now();
        assert_eq!(overstay_amount(end, end + Duration::minutes(1), 2.0), 2.0);
        assert_eq!(overstay_amount(end, end + Duration::minutes(60), 2.0), 2.0);
        assert_eq!(overstay_amount(end, end + Duration::minutes(61), 2.0), 4.0);
        assert_eq!(overstay_amount(end, end + Duration::hours(3), 1.5), 4.5);
        // Clock skew never yields a zero bill
        assert_eq!(overstay_amount(end, end - Duration::minutes(5), 2.0), 2.0);
    }
}
