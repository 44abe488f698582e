use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use smartpark_core::{
    classify_status, collections, run_transaction, DocumentStore, Filter, GatewayInitiation, GatewayOutcome,
    GatewayRequest, ParkingError, ParkingResult, PaymentGateway, PaymentReference, SignedPayload,
};
use smartpark_shared::money::to_cents;
use smartpark_shared::{
    Currency, NotificationData, NotificationType, ParkingLot, PaymentIntent, PaymentIntentStatus, Reservation,
};
use smartpark_store::app_config::PaymentRules;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::billing::BillingService;
use crate::engine::{Claim, ReservationEngine};
use crate::notifier::Notifier;

pub const SLOT_TAKEN_AFTER_PAYMENT: &str = "slot taken after payment";
pub const TIMED_OUT: &str = "timed out";

/// Zimbabwe mobile number as accepted by EcoCash: `07[781356]` then seven digits
pub fn is_ecocash_number(number: &str) -> bool {
    let bytes = number.as_bytes();
    bytes.len() == 10
        && number.starts_with("07")
        && matches!(bytes[2], b'7' | b'8' | b'1' | b'3' | b'5' | b'6')
        && bytes.iter().all(u8::is_ascii_digit)
}

/// Webhook hash keys, one per integration (currency)
#[derive(Debug, Clone, Default)]
pub struct IntegrationKeys {
    pub usd: String,
    pub zwl: String,
}

impl IntegrationKeys {
    pub fn for_currency(&self, currency: Currency) -> &str {
        match currency {
            Currency::Usd => &self.usd,
            Currency::Zwl => &self.zwl,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePayment {
    pub lot_id: String,
    pub slot_id: String,
    pub hours: u32,
    pub payment_method: String,
    #[serde(default)]
    pub ecocash_number: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// What applying a gateway status did to an intent
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    Confirmed(Reservation),
    Failed(String),
    Pending,
    AlreadyProcessed,
}

enum Applied {
    Confirmed(Reservation, PaymentIntent),
    Failed(PaymentIntent),
    SlotConflict(PaymentIntent),
    AlreadyProcessed,
}

/// Drives payment intents from initiation to a terminal state, creating the
/// reservation exactly once when the gateway reports the payment as paid.
pub struct PaymentReconciler {
    store: Arc<dyn DocumentStore>,
    gateway: Arc<dyn PaymentGateway>,
    engine: Arc<ReservationEngine>,
    billing: BillingService,
    notifier: Notifier,
    keys: IntegrationKeys,
    rules: PaymentRules,
}

impl PaymentReconciler {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        gateway: Arc<dyn PaymentGateway>,
        engine: Arc<ReservationEngine>,
        billing: BillingService,
        notifier: Notifier,
        keys: IntegrationKeys,
        rules: PaymentRules,
    ) -> Self {
        Self { store, gateway, engine, billing, notifier, keys, rules }
    }

    pub async fn initiate(&self, user_id: &str, email: &str, req: InitiatePayment) -> ParkingResult<InitiateResponse> {
        if req.lot_id.trim().is_empty() || req.slot_id.trim().is_empty() || req.payment_method.trim().is_empty() {
            return Err(ParkingError::Validation("Missing required payment information.".to_string()));
        }
        self.engine.validate_hours(req.hours)?;

        let number = req
            .ecocash_number
            .as_deref()
            .or(req.phone.as_deref())
            .map(str::trim)
            .ok_or_else(|| ParkingError::Validation("An EcoCash number is required.".to_string()))?;
        if !is_ecocash_number(number) {
            return Err(ParkingError::Validation("Invalid EcoCash number.".to_string()));
        }

        if self.billing.has_outstanding(user_id).await? {
            return Err(ParkingError::OutstandingBill);
        }

        let lot: ParkingLot = self
            .store
            .read(collections::PARKING_LOTS, &req.lot_id)
            .await?
            .ok_or_else(|| ParkingError::LotNotFound(req.lot_id.clone()))?;
        let slot = lot
            .slot(&req.slot_id)
            .ok_or_else(|| ParkingError::SlotNotFound(req.slot_id.clone()))?;
        // Early rejection only; the claim at confirmation is authoritative
        if slot.is_occupied {
            return Err(ParkingError::SlotUnavailable);
        }

        let expected = lot.price_for(req.hours);
        if to_cents(expected) != to_cents(req.amount) {
            return Err(ParkingError::AmountMismatch { expected, received: req.amount });
        }

        let now = Utc::now();
        let reference = PaymentReference::new(user_id, &req.lot_id, &req.slot_id, req.hours, now)?;
        let currency = Currency::for_payment_method(&req.payment_method);

        let intent = PaymentIntent {
            id: Uuid::new_v4().simple().to_string(),
            reference: reference.to_string(),
            user_id: user_id.to_string(),
            parking_lot_id: req.lot_id.clone(),
            parking_lot_name: lot.name.clone(),
            slot_id: req.slot_id.clone(),
            duration_hours: req.hours,
            amount: expected,
            currency,
            payment_method: req.payment_method.clone(),
            phone: number.to_string().into(),
            status: PaymentIntentStatus::Pending,
            poll_url: None,
            instructions: None,
            reservation_id: None,
            failure_reason: None,
            requires_refund: false,
            created_at: now,
            updated_at: now,
        };
        self.store.write(collections::PAYMENT_INTENTS, &intent.id, &intent).await?;

        let request = GatewayRequest {
            reference: intent.reference.clone(),
            amount: intent.amount,
            currency,
            payment_method: "ecocash".to_string(),
            phone: intent.phone.clone(),
            email: email.to_string(),
            description: format!("Parking at {} for {}h", lot.name, req.hours),
        };

        info!(intent_id = %intent.id, reference = %intent.reference, phone = %intent.phone, "Initiating payment");
        match self.gateway.initiate(&request).await {
            Ok(GatewayInitiation::Accepted { poll_url, instructions }) => {
                self.store
                    .update(
                        collections::PAYMENT_INTENTS,
                        &intent.id,
                        json!({ "pollUrl": poll_url, "instructions": instructions, "updatedAt": Utc::now() }),
                    )
                    .await?;
                Ok(InitiateResponse {
                    success: true,
                    intent_id: Some(intent.id),
                    instructions: Some(instructions),
                    message: Some("Payment initiated.".to_string()),
                })
            }
            Ok(GatewayInitiation::Rejected { message }) => {
                warn!(intent_id = %intent.id, %message, "Gateway rejected payment");
                self.mark_intent_failed(&intent.id, &message).await?;
                Ok(InitiateResponse {
                    success: false,
                    intent_id: None,
                    instructions: None,
                    message: Some(message),
                })
            }
            Err(e) => {
                error!(intent_id = %intent.id, error = %e, "Gateway communication failed");
                self.mark_intent_failed(&intent.id, "gateway error").await?;
                Err(e.into())
            }
        }
    }

    async fn mark_intent_failed(&self, intent_id: &str, reason: &str) -> ParkingResult<()> {
        self.store
            .update(
                collections::PAYMENT_INTENTS,
                intent_id,
                json!({ "status": "failed", "failureReason": reason, "updatedAt": Utc::now() }),
            )
            .await?;
        Ok(())
    }

    pub async fn get_intent(&self, user_id: Option<&str>, intent_id: &str) -> ParkingResult<PaymentIntent> {
        let intent: PaymentIntent = self
            .store
            .read(collections::PAYMENT_INTENTS, intent_id)
            .await?
            .ok_or_else(|| ParkingError::IntentNotFound(intent_id.to_string()))?;
        if let Some(user_id) = user_id {
            if intent.user_id != user_id {
                return Err(ParkingError::Forbidden("payment belongs to another user".to_string()));
            }
        }
        Ok(intent)
    }

    /// Handle a gateway status update (form-encoded, untrusted).
    ///
    /// The hash is checked before anything is changed. A paid update for a slot
    /// that was taken meanwhile fails the intent for refund and reports
    /// [`ParkingError::PostPaymentSlotConflict`].
    pub async fn handle_webhook(&self, body: &[u8]) -> ParkingResult<ApplyOutcome> {
        let payload = SignedPayload::parse(body);

        let raw_reference = payload
            .get("reference")
            .ok_or_else(|| ParkingError::Validation("missing reference".to_string()))?;
        let reference: PaymentReference = raw_reference.parse()?;

        let intent: PaymentIntent = self
            .store
            .list::<PaymentIntent>(collections::PAYMENT_INTENTS, &Filter::all().eq("reference", raw_reference))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ParkingError::IntentNotFound(raw_reference.to_string()))?;

        let key = self.keys.for_currency(intent.currency);
        if key.is_empty() {
            error!(intent_id = %intent.id, currency = %intent.currency, "Integration key is not set, refusing webhook");
            return Err(ParkingError::Configuration(format!("integration key for {} is not set", intent.currency)));
        }
        if !payload.verify(key) {
            warn!(intent_id = %intent.id, "Webhook hash mismatch");
            return Err(ParkingError::SignatureInvalid);
        }

        if reference.user_id != intent.user_id
            || reference.lot_id != intent.parking_lot_id
            || reference.slot_id != intent.slot_id
            || reference.hours != intent.duration_hours
        {
            return Err(ParkingError::Validation("reference does not match payment intent".to_string()));
        }

        let status = payload
            .get("status")
            .ok_or_else(|| ParkingError::Validation("missing status".to_string()))?;
        info!(intent_id = %intent.id, status, "Payment status update received");

        self.apply(&intent.id, classify_status(status)).await
    }

    /// Ask the gateway for the intent's status and apply it
    pub async fn poll_intent(&self, user_id: Option<&str>, intent_id: &str) -> ParkingResult<(PaymentIntent, ApplyOutcome)> {
        let intent = self.get_intent(user_id, intent_id).await?;
        if !intent.may_still_settle() {
            return Ok((intent, ApplyOutcome::AlreadyProcessed));
        }
        let Some(poll_url) = intent.poll_url.clone() else {
            let outcome = match intent.status {
                PaymentIntentStatus::Pending => ApplyOutcome::Pending,
                _ => ApplyOutcome::AlreadyProcessed,
            };
            return Ok((intent, outcome));
        };

        let status = self.gateway.poll(&poll_url).await?;
        debug!(intent_id, status = %status.status, paid = status.paid, "Polled payment status");
        let outcome = self.apply(intent_id, classify_status(&status.status)).await?;
        let intent = self.get_intent(None, intent_id).await?;
        Ok((intent, outcome))
    }

    /// Apply a gateway outcome exactly once; terminal intents are left untouched.
    ///
    /// The one exception is a paid result for an intent that was failed without
    /// money changing hands (timeout, cancelled). The claim is retried, and when
    /// the slot is gone the intent is flagged for refund.
    pub async fn apply(&self, intent_id: &str, outcome: GatewayOutcome) -> ParkingResult<ApplyOutcome> {
        let reason = match outcome {
            GatewayOutcome::Pending => return Ok(ApplyOutcome::Pending),
            GatewayOutcome::Paid => None,
            GatewayOutcome::Failed(reason) => Some(reason),
        };
        let intent_id = intent_id.to_string();

        let applied = run_transaction(self.store.as_ref(), |tx| {
            let (intent_id, reason) = (intent_id.clone(), reason.clone());
            Box::pin(async move {
                let now = Utc::now();
                let mut intent: PaymentIntent = tx
                    .read(collections::PAYMENT_INTENTS, &intent_id)
                    .await?
                    .ok_or_else(|| ParkingError::IntentNotFound(intent_id.clone()))?;
                let late_payment = match intent.status {
                    PaymentIntentStatus::Pending => false,
                    PaymentIntentStatus::Failed if reason.is_none() && intent.may_still_settle() => true,
                    _ => return Ok(Applied::AlreadyProcessed),
                };
                if late_payment {
                    warn!(
                        intent_id = %intent.id,
                        previous_reason = ?intent.failure_reason,
                        "Paid result for a failed intent, retrying the claim"
                    );
                }

                if let Some(reason) = reason {
                    intent.mark_failed(reason, now);
                    tx.write(collections::PAYMENT_INTENTS, &intent.id, &intent)?;
                    return Ok(Applied::Failed(intent));
                }

                let claim = Claim {
                    user_id: intent.user_id.clone(),
                    lot_id: intent.parking_lot_id.clone(),
                    slot_id: intent.slot_id.clone(),
                    hours: intent.duration_hours,
                    amount_paid: Some(intent.amount),
                    payment_intent_id: Some(intent.id.clone()),
                };

                match ReservationEngine::stage_claim(tx, &claim, now).await {
                    Ok(reservation) => {
                        intent.mark_successful(reservation.id.clone(), now);
                        tx.write(collections::PAYMENT_INTENTS, &intent.id, &intent)?;
                        Ok(Applied::Confirmed(reservation, intent))
                    }
                    Err(ParkingError::SlotUnavailable | ParkingError::SlotNotFound(_) | ParkingError::LotNotFound(_)) => {
                        intent.mark_failed(SLOT_TAKEN_AFTER_PAYMENT, now);
                        intent.requires_refund = true;
                        tx.write(collections::PAYMENT_INTENTS, &intent.id, &intent)?;
                        Ok(Applied::SlotConflict(intent))
                    }
                    Err(e) => Err(e),
                }
            })
        })
        .await?;

        match applied {
            Applied::AlreadyProcessed => {
                debug!(intent_id = %intent_id, "Payment intent already processed");
                Ok(ApplyOutcome::AlreadyProcessed)
            }
            Applied::Confirmed(reservation, intent) => {
                info!(intent_id = %intent_id, reservation_id = %reservation.id, "Payment confirmed, slot claimed");
                self.notifier
                    .send(
                        &intent.user_id,
                        NotificationType::PaymentConfirmed,
                        format!(
                            "Your payment of {:.2} {} for {} was successful.",
                            intent.amount, intent.currency, intent.parking_lot_name
                        ),
                        Some(NotificationData {
                            reservation_id: Some(reservation.id.clone()),
                            amount_paid: Some(intent.amount),
                            parking_lot_name: Some(intent.parking_lot_name.clone()),
                            ..Default::default()
                        }),
                    )
                    .await;
                self.engine.notify_reserved(&reservation).await;
                Ok(ApplyOutcome::Confirmed(reservation))
            }
            Applied::Failed(intent) => {
                let reason = intent.failure_reason.clone().unwrap_or_default();
                info!(intent_id = %intent_id, %reason, "Payment failed");
                self.notify_failed(&intent, "Your payment could not be completed.").await;
                Ok(ApplyOutcome::Failed(reason))
            }
            Applied::SlotConflict(intent) => {
                error!(
                    intent_id = %intent_id,
                    user_id = %intent.user_id,
                    lot_id = %intent.parking_lot_id,
                    slot_id = %intent.slot_id,
                    amount = intent.amount,
                    "Payment received but slot was taken; intent flagged for refund"
                );
                self.notify_failed(
                    &intent,
                    "Your payment was received but the slot was taken in the meantime. A refund will be arranged.",
                )
                .await;
                Err(ParkingError::PostPaymentSlotConflict { intent_id })
            }
        }
    }

    async fn notify_failed(&self, intent: &PaymentIntent, message: &str) {
        self.notifier
            .send(
                &intent.user_id,
                NotificationType::PaymentFailed,
                message,
                Some(NotificationData {
                    amount_paid: Some(intent.amount),
                    parking_lot_name: Some(intent.parking_lot_name.clone()),
                    ..Default::default()
                }),
            )
            .await;
    }

    /// Close intents left pending past the timeout: poll once, otherwise fail them.
    /// An intent whose poll errors stays pending for the next pass.
    /// Returns how many intents reached a terminal state.
    pub async fn expire_stale_intents(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::minutes(self.rules.pending_timeout_minutes);
        let pending: Vec<PaymentIntent> = match self
            .store
            .list(collections::PAYMENT_INTENTS, &Filter::all().eq("status", "pending"))
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to query pending payment intents");
                return 0;
            }
        };

        let mut closed = 0;
        for intent in pending.into_iter().filter(|i| i.created_at < cutoff) {
            let outcome = match &intent.poll_url {
                Some(poll_url) => match self.gateway.poll(poll_url).await {
                    Ok(status) if status.paid => GatewayOutcome::Paid,
                    Ok(_) => GatewayOutcome::Failed(TIMED_OUT.to_string()),
                    Err(e) => {
                        warn!(intent_id = %intent.id, error = %e, "Poll of stale intent failed, leaving it pending");
                        continue;
                    }
                },
                None => GatewayOutcome::Failed(TIMED_OUT.to_string()),
            };

            match self.apply(&intent.id, outcome).await {
                Ok(ApplyOutcome::Confirmed(_)) | Ok(ApplyOutcome::Failed(_)) => closed += 1,
                Ok(_) => {}
                Err(ParkingError::PostPaymentSlotConflict { .. }) => closed += 1,
                Err(e) => error!(intent_id = %intent.id, error = %e, "Failed to close stale intent"),
            }
        }
        closed
    }

    /// Failed intents whose money still has to be returned
    pub async fn refunds_due(&self) -> ParkingResult<Vec<PaymentIntent>> {
        let mut intents: Vec<PaymentIntent> = self
            .store
            .list(collections::PAYMENT_INTENTS, &Filter::all().eq("requiresRefund", true))
            .await?;
        intents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(intents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ecocash_number_format() {
        for ok in ["0771234567", "0781234567", "0711234567", "0731234567", "0751234567", "0761234567"] {
            assert!(is_ecocash_number(ok), "{ok}");
        }
        for bad in ["0721234567", "077123456", "07712345678", "+263771234567", "077123456a", ""] {
            assert!(!is_ecocash_number(bad), "{bad}");
        }
    }
}
