use chrono::{DateTime, Utc};
use smartpark_core::{collections, run_transaction, DocumentStore, ParkingError, ParkingResult, Transaction};
use smartpark_shared::{
    NotificationData, NotificationType, ParkingLot, Reservation, ReservationStatus, User,
};
use smartpark_store::app_config::ReservationRules;
use std::sync::Arc;
use tracing::{info, warn};

use crate::billing::BillingService;
use crate::notifier::Notifier;

/// Parameters of a slot claim
#[derive(Debug, Clone)]
pub struct Claim {
    pub user_id: String,
    pub lot_id: String,
    pub slot_id: String,
    pub hours: u32,
    /// Amount already collected; priced from the lot when `None`
    pub amount_paid: Option<f64>,
    pub payment_intent_id: Option<String>,
}

/// Result of an expiry that actually happened
#[derive(Debug, Clone)]
pub struct Expired {
    pub reservation: Reservation,
    pub previous: ReservationStatus,
}

/// Owns every reservation state transition and the slot occupancy that goes with it.
///
/// Lot documents are only ever written inside a transaction, and each transition
/// writes the slot and the reservation in the same transaction.
pub struct ReservationEngine {
    store: Arc<dyn DocumentStore>,
    notifier: Notifier,
    billing: BillingService,
    rules: ReservationRules,
}

impl ReservationEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifier: Notifier,
        billing: BillingService,
        rules: ReservationRules,
    ) -> Self {
        Self { store, notifier, billing, rules }
    }

    pub fn validate_hours(&self, hours: u32) -> ParkingResult<()> {
        if hours == 0 || hours > self.rules.max_hours {
            return Err(ParkingError::Validation(format!(
                "hours must be between 1 and {}",
                self.rules.max_hours
            )));
        }
        Ok(())
    }

    /// Claim a free slot for `hours` (direct path, no payment)
    pub async fn claim(&self, user_id: &str, lot_id: &str, slot_id: &str, hours: u32) -> ParkingResult<Reservation> {
        self.validate_hours(hours)?;
        if self.billing.has_outstanding(user_id).await? {
            return Err(ParkingError::OutstandingBill);
        }

        let claim = Claim {
            user_id: user_id.to_string(),
            lot_id: lot_id.to_string(),
            slot_id: slot_id.to_string(),
            hours,
            amount_paid: None,
            payment_intent_id: None,
        };

        let reservation = run_transaction(self.store.as_ref(), |tx| {
            let claim = claim.clone();
            Box::pin(async move { Self::stage_claim(tx, &claim, Utc::now()).await })
        })
        .await?;

        info!(
            reservation_id = %reservation.id,
            lot_id,
            slot_id,
            hours,
            "Slot claimed"
        );
        self.notify_reserved(&reservation).await;
        Ok(reservation)
    }

    /// Stage a claim on `tx`. Nothing is written unless every check passes.
    pub async fn stage_claim(
        tx: &mut dyn Transaction,
        claim: &Claim,
        now: DateTime<Utc>,
    ) -> ParkingResult<Reservation> {
        let mut lot: ParkingLot = tx
            .read(collections::PARKING_LOTS, &claim.lot_id)
            .await?
            .ok_or_else(|| ParkingError::LotNotFound(claim.lot_id.clone()))?;

        let amount_paid = claim.amount_paid.unwrap_or_else(|| lot.price_for(claim.hours));
        let mut reservation = Reservation::confirmed(
            &claim.user_id,
            &claim.lot_id,
            &lot.name,
            &claim.slot_id,
            claim.hours,
            amount_paid,
            now,
        );
        reservation.payment_intent_id = claim.payment_intent_id.clone();

        let slot = lot
            .slot_mut(&claim.slot_id)
            .ok_or_else(|| ParkingError::SlotNotFound(claim.slot_id.clone()))?;
        if slot.is_occupied {
            return Err(ParkingError::SlotUnavailable);
        }
        slot.occupy(reservation.end_time);

        tx.write(collections::PARKING_LOTS, &claim.lot_id, &lot)?;
        tx.write(collections::RESERVATIONS, &reservation.id, &reservation)?;
        Ok(reservation)
    }

    /// `confirmed -> active`: the driver has arrived; the paid window restarts now
    pub async fn mark_parked(&self, user_id: &str, reservation_id: &str) -> ParkingResult<Reservation> {
        let (user_id, reservation_id) = (user_id.to_string(), reservation_id.to_string());

        let reservation = run_transaction(self.store.as_ref(), |tx| {
            let (user_id, reservation_id) = (user_id.clone(), reservation_id.clone());
            Box::pin(async move {
                let now = Utc::now();
                let mut reservation =
                    Self::load_transition(tx, &reservation_id, Some(&user_id), ReservationStatus::Active).await?;
                // Past its window the reservation only moves to expired
                if reservation.is_overdue(now) {
                    return Err(ParkingError::invalid_transition(reservation.status, ReservationStatus::Active));
                }
                reservation.status = ReservationStatus::Active;
                reservation.restamp(now);

                match tx.read::<ParkingLot>(collections::PARKING_LOTS, &reservation.parking_lot_id).await? {
                    Some(mut lot) => match lot.slot_mut(&reservation.slot_id) {
                        Some(slot) => {
                            slot.occupy(reservation.end_time);
                            tx.write(collections::PARKING_LOTS, &reservation.parking_lot_id, &lot)?;
                        }
                        None => warn!(reservation_id = %reservation.id, "Slot missing while marking parked"),
                    },
                    None => warn!(reservation_id = %reservation.id, "Lot missing while marking parked"),
                }

                tx.write(collections::RESERVATIONS, &reservation.id, &reservation)?;
                Ok::<_, ParkingError>(reservation)
            })
        })
        .await?;

        info!(reservation_id = %reservation.id, "Reservation active");
        Ok(reservation)
    }

    /// `active -> completed`: free the slot and close the reservation
    pub async fn leave(&self, user_id: &str, reservation_id: &str) -> ParkingResult<Reservation> {
        let (user_id, reservation_id) = (user_id.to_string(), reservation_id.to_string());

        let reservation = run_transaction(self.store.as_ref(), |tx| {
            let (user_id, reservation_id) = (user_id.clone(), reservation_id.clone());
            Box::pin(async move {
                let mut reservation =
                    Self::load_transition(tx, &reservation_id, Some(&user_id), ReservationStatus::Completed).await?;
                Self::stage_release(tx, &reservation).await?;
                reservation.status = ReservationStatus::Completed;
                tx.write(collections::RESERVATIONS, &reservation.id, &reservation)?;
                Ok::<_, ParkingError>(reservation)
            })
        })
        .await?;

        info!(reservation_id = %reservation.id, "Reservation completed");
        Ok(reservation)
    }

    /// `confirmed | active -> expired` once past `end_time`.
    ///
    /// Returns `None` when there was nothing to do (already terminal, not yet due,
    /// or gone), so overlapping sweeps expire and notify exactly once.
    pub async fn expire(&self, reservation_id: &str, now: DateTime<Utc>) -> ParkingResult<Option<Expired>> {
        let reservation_id = reservation_id.to_string();

        let expired = run_transaction(self.store.as_ref(), |tx| {
            let reservation_id = reservation_id.clone();
            Box::pin(async move {
                let Some(mut reservation) = tx
                    .read::<Reservation>(collections::RESERVATIONS, &reservation_id)
                    .await?
                else {
                    return Ok(None);
                };
                if !reservation.is_overdue(now) {
                    return Ok(None);
                }

                let previous = reservation.status;
                Self::stage_release(tx, &reservation).await?;
                reservation.status = ReservationStatus::Expired;
                tx.write(collections::RESERVATIONS, &reservation.id, &reservation)?;
                Ok::<_, ParkingError>(Some(Expired { reservation, previous }))
            })
        })
        .await?;

        if let Some(expired) = &expired {
            let r = &expired.reservation;
            info!(reservation_id = %r.id, previous = %expired.previous, "Reservation expired");
            self.notifier
                .send(
                    &r.user_id,
                    NotificationType::TimeExpired,
                    format!("Your parking time for spot {} at {} has expired.", r.slot_id, r.parking_lot_name),
                    Some(NotificationData {
                        reservation_id: Some(r.id.clone()),
                        parking_lot_name: Some(r.parking_lot_name.clone()),
                        ..Default::default()
                    }),
                )
                .await;

            if expired.previous == ReservationStatus::Active {
                self.billing.issue_overstay(r, now).await;
            }
        }
        Ok(expired)
    }

    pub async fn list_for_user(&self, user_id: &str) -> ParkingResult<Vec<Reservation>> {
        let mut reservations: Vec<Reservation> = self
            .store
            .list(
                collections::RESERVATIONS,
                &smartpark_core::Filter::all().eq("userId", user_id),
            )
            .await?;
        reservations.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(reservations)
    }

    pub async fn notify_reserved(&self, reservation: &Reservation) {
        let plate = match self.store.read::<User>(collections::USERS, &reservation.user_id).await {
            Ok(Some(user)) => user.display_plate(),
            _ => "N/A".to_string(),
        };

        self.notifier
            .send(
                &reservation.user_id,
                NotificationType::Reserved,
                format!(
                    "You have successfully reserved spot {} at {}.",
                    reservation.slot_id.to_uppercase(),
                    reservation.parking_lot_name
                ),
                Some(NotificationData {
                    reservation_id: Some(reservation.id.clone()),
                    car_plate: Some(plate),
                    amount_paid: Some(reservation.amount_paid),
                    hours_left: Some(reservation.duration_hours),
                    parking_lot_name: Some(reservation.parking_lot_name.clone()),
                    ..Default::default()
                }),
            )
            .await;
    }

    async fn load_transition(
        tx: &mut dyn Transaction,
        reservation_id: &str,
        owner: Option<&str>,
        next: ReservationStatus,
    ) -> ParkingResult<Reservation> {
        let reservation: Reservation = tx
            .read(collections::RESERVATIONS, reservation_id)
            .await?
            .ok_or_else(|| ParkingError::ReservationNotFound(reservation_id.to_string()))?;

        if let Some(owner) = owner {
            if reservation.user_id != owner {
                return Err(ParkingError::Forbidden("reservation belongs to another user".to_string()));
            }
        }
        if !reservation.status.can_transition_to(next) {
            return Err(ParkingError::invalid_transition(reservation.status, next));
        }
        Ok(reservation)
    }

    /// Free the reservation's slot. A missing lot or slot is logged and skipped
    /// so the reservation can still reach its terminal state.
    async fn stage_release(tx: &mut dyn Transaction, reservation: &Reservation) -> ParkingResult<()> {
        let Some(mut lot) = tx
            .read::<ParkingLot>(collections::PARKING_LOTS, &reservation.parking_lot_id)
            .await?
        else {
            let e = ParkingError::PartialTransaction(format!("lot {} no longer exists", reservation.parking_lot_id));
            warn!(reservation_id = %reservation.id, error = %e, "Releasing slot");
            return Ok(());
        };

        match lot.slot_mut(&reservation.slot_id) {
            Some(slot) => {
                slot.release();
                tx.write(collections::PARKING_LOTS, &reservation.parking_lot_id, &lot)?;
            }
            None => {
                let e = ParkingError::PartialTransaction(format!("slot {} no longer exists", reservation.slot_id));
                warn!(reservation_id = %reservation.id, error = %e, "Releasing slot");
            }
        }
        Ok(())
    }
}
