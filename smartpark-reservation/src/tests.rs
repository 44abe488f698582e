use chrono::{Duration, Utc};
use smartpark_core::{
    collections, run_transaction, DocumentStore, Filter, MockPaymentGateway, ParkingError, SignedPayload,
};
use smartpark_shared::{
    BillStatus, GeoPoint, Notification, NotificationType, ParkingLot, PaymentIntent, PaymentIntentStatus, Reservation,
    ReservationStatus,
};
use smartpark_store::app_config::{BillingRules, PaymentRules, ReservationRules};
use smartpark_store::MemoryStore;
use std::sync::Arc;

use crate::lots::{NewLot, NewSlot};
use crate::reconciler::{InitiatePayment, SLOT_TAKEN_AFTER_PAYMENT, TIMED_OUT};
use crate::*;

const USD_KEY: &str = "usd-integration-key";
const ZWL_KEY: &str = "zwl-integration-key";

struct Harness {
    store: Arc<dyn DocumentStore>,
    gateway: Arc<MockPaymentGateway>,
    engine: Arc<ReservationEngine>,
    reconciler: Arc<PaymentReconciler>,
    sweeper: ExpirySweeper,
    lots: LotService,
    billing: BillingService,
}

fn harness() -> Harness {
    harness_with_keys(IntegrationKeys { usd: USD_KEY.to_string(), zwl: ZWL_KEY.to_string() })
}

fn harness_with_keys(keys: IntegrationKeys) -> Harness {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let gateway = Arc::new(MockPaymentGateway::new());
    let notifier = Notifier::new(store.clone());
    let billing = BillingService::new(store.clone(), notifier.clone(), BillingRules::default());
    let engine = Arc::new(ReservationEngine::new(
        store.clone(),
        notifier.clone(),
        billing.clone(),
        ReservationRules::default(),
    ));
    let reconciler = Arc::new(PaymentReconciler::new(
        store.clone(),
        gateway.clone(),
        engine.clone(),
        billing.clone(),
        notifier,
        keys,
        PaymentRules::default(),
    ));
    let sweeper = ExpirySweeper::new(
        store.clone(),
        engine.clone(),
        reconciler.clone(),
        std::time::Duration::from_secs(60),
    );
    let lots = LotService::new(store.clone());

    Harness { store, gateway, engine, reconciler, sweeper, lots, billing }
}

impl Harness {
    async fn lot(&self, hourly_rate: f64) -> ParkingLot {
        self.lots
            .create(NewLot {
                name: "A".to_string(),
                address: "1 Main St".to_string(),
                location: GeoPoint { lat: -17.8, lng: 31.0 },
                hourly_rate,
                slot_count: None,
                slots: Some(vec![
                    NewSlot { id: Some("P1".to_string()), coords: None },
                    NewSlot { id: Some("P2".to_string()), coords: None },
                ]),
            })
            .await
            .unwrap()
    }

    async fn reload(&self, lot_id: &str) -> ParkingLot {
        self.lots.get(lot_id).await.unwrap()
    }

    async fn reservations_for_slot(&self, lot_id: &str, slot_id: &str) -> Vec<Reservation> {
        self.store
            .list(
                collections::RESERVATIONS,
                &Filter::all().eq("parkingLotId", lot_id).eq("slotId", slot_id),
            )
            .await
            .unwrap()
    }

    async fn notifications(&self, user_id: &str, kind: NotificationType) -> Vec<Notification> {
        let all: Vec<Notification> = self
            .store
            .list(collections::NOTIFICATIONS, &Filter::all().eq("userId", user_id))
            .await
            .unwrap();
        all.into_iter().filter(|n| n.kind == kind).collect()
    }

    async fn intent(&self, intent_id: &str) -> PaymentIntent {
        self.reconciler.get_intent(None, intent_id).await.unwrap()
    }

    async fn initiate(&self, user_id: &str, lot: &ParkingLot, slot_id: &str, hours: u32) -> PaymentIntent {
        let response = self
            .reconciler
            .initiate(
                user_id,
                &format!("{}@example.com", user_id),
                InitiatePayment {
                    lot_id: lot.id.clone(),
                    slot_id: slot_id.to_string(),
                    hours,
                    payment_method: "ECOCASH_USD".to_string(),
                    ecocash_number: Some("0771234567".to_string()),
                    phone: None,
                    amount: lot.hourly_rate * f64::from(hours),
                },
            )
            .await
            .unwrap();
        assert!(response.success);
        self.intent(&response.intent_id.unwrap()).await
    }
}

fn status_update(intent: &PaymentIntent, status: &str, key: &str) -> Vec<u8> {
    SignedPayload::from_pairs([
        ("reference", intent.reference.clone()),
        ("paynowreference", "4455667".to_string()),
        ("amount", format!("{:.2}", intent.amount)),
        ("status", status.to_string()),
        ("pollurl", intent.poll_url.clone().unwrap_or_default()),
    ])
    .sign(key)
    .encode()
    .into_bytes()
}

// ============================================================================
// Slot Reservation Engine
// ============================================================================

#[tokio::test]
async fn test_claim_prices_and_occupies_slot() {
    let h = harness();
    let lot = h.lot(2.0).await;

    let reservation = h.engine.claim("driver1", &lot.id, "P1", 3).await.unwrap();

    assert_eq!(reservation.amount_paid, 6.0);
    assert_eq!(reservation.status, ReservationStatus::Confirmed);
    assert_eq!(reservation.end_time - reservation.start_time, Duration::hours(3));

    let lot_after = h.reload(&lot.id).await;
    let slot = lot_after.slot("P1").unwrap();
    assert!(slot.is_occupied);
    assert_eq!(slot.reserved_until, Some(reservation.end_time));
    assert!(!lot_after.slot("P2").unwrap().is_occupied);

    let second = h.engine.claim("driver2", &lot.id, "P1", 1).await;
    assert!(matches!(second, Err(ParkingError::SlotUnavailable)));
    assert_eq!(h.notifications("driver1", NotificationType::Reserved).await.len(), 1);
}

#[tokio::test]
async fn test_claim_rejects_unknown_lot_slot_and_bad_hours() {
    let h = harness();
    let lot = h.lot(2.0).await;

    assert!(matches!(h.engine.claim("driver1", "nope", "P1", 1).await, Err(ParkingError::LotNotFound(_))));
    assert!(matches!(h.engine.claim("driver1", &lot.id, "P9", 1).await, Err(ParkingError::SlotNotFound(_))));
    assert!(matches!(h.engine.claim("driver1", &lot.id, "P1", 0).await, Err(ParkingError::Validation(_))));
    assert!(matches!(h.engine.claim("driver1", &lot.id, "P1", 25).await, Err(ParkingError::Validation(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_exactly_one_winner() {
    let h = harness();
    let lot = h.lot(1.5).await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = h.engine.clone();
        let lot_id = lot.id.clone();
        handles.push(tokio::spawn(async move {
            engine.claim(&format!("driver{}", i), &lot_id, "P1", 2).await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(ParkingError::SlotUnavailable) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(h.reservations_for_slot(&lot.id, "P1").await.len(), 1);
}

#[tokio::test]
async fn test_aborted_transaction_leaves_no_trace() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let lot_id = lot.id.clone();

    let result: Result<(), ParkingError> = run_transaction(h.store.as_ref(), |tx| {
        let claim = Claim {
            user_id: "driver1".to_string(),
            lot_id: lot_id.clone(),
            slot_id: "P1".to_string(),
            hours: 2,
            amount_paid: None,
            payment_intent_id: None,
        };
        Box::pin(async move {
            ReservationEngine::stage_claim(tx, &claim, Utc::now()).await?;
            Err(ParkingError::Validation("abort".to_string()))
        })
    })
    .await;

    assert!(result.is_err());
    assert!(!h.reload(&lot.id).await.slot("P1").unwrap().is_occupied);
    assert!(h.reservations_for_slot(&lot.id, "P1").await.is_empty());
}

#[tokio::test]
async fn test_lifecycle_and_illegal_transitions() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let reservation = h.engine.claim("driver1", &lot.id, "P1", 2).await.unwrap();

    // confirmed -> completed is not a legal edge
    assert!(matches!(
        h.engine.leave("driver1", &reservation.id).await,
        Err(ParkingError::InvalidTransition { .. })
    ));
    assert!(matches!(
        h.engine.mark_parked("driver2", &reservation.id).await,
        Err(ParkingError::Forbidden(_))
    ));

    let active = h.engine.mark_parked("driver1", &reservation.id).await.unwrap();
    assert_eq!(active.status, ReservationStatus::Active);
    assert!(active.start_time >= reservation.start_time);
    assert_eq!(h.reload(&lot.id).await.slot("P1").unwrap().reserved_until, Some(active.end_time));
    assert!(matches!(
        h.engine.mark_parked("driver1", &reservation.id).await,
        Err(ParkingError::InvalidTransition { .. })
    ));

    let completed = h.engine.leave("driver1", &reservation.id).await.unwrap();
    assert_eq!(completed.status, ReservationStatus::Completed);
    let slot = h.reload(&lot.id).await.slot("P1").cloned().unwrap();
    assert!(!slot.is_occupied);
    assert_eq!(slot.reserved_until, None);

    // Terminal states accept nothing
    assert!(matches!(
        h.engine.leave("driver1", &reservation.id).await,
        Err(ParkingError::InvalidTransition { .. })
    ));
    assert_eq!(h.engine.expire(&reservation.id, Utc::now() + Duration::days(1)).await.unwrap().map(|e| e.reservation.id), None);
}

#[tokio::test]
async fn test_overdue_reservation_cannot_be_marked_parked() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let mut reservation = h.engine.claim("driver1", &lot.id, "P1", 1).await.unwrap();

    // The sweeper has not caught up yet
    reservation.start_time = Utc::now() - Duration::hours(3);
    reservation.end_time = Utc::now() - Duration::hours(2);
    h.store.write(collections::RESERVATIONS, &reservation.id, &reservation).await.unwrap();

    assert!(matches!(
        h.engine.mark_parked("driver1", &reservation.id).await,
        Err(ParkingError::InvalidTransition { .. })
    ));
    let stored: Reservation = h.store.read(collections::RESERVATIONS, &reservation.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReservationStatus::Confirmed);
    assert_eq!(stored.end_time, reservation.end_time);
}

#[tokio::test]
async fn test_leave_completes_even_when_lot_was_removed() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let reservation = h.engine.claim("driver1", &lot.id, "P1", 2).await.unwrap();
    h.engine.mark_parked("driver1", &reservation.id).await.unwrap();

    h.store.delete(collections::PARKING_LOTS, &lot.id).await.unwrap();

    let completed = h.engine.leave("driver1", &reservation.id).await.unwrap();
    assert_eq!(completed.status, ReservationStatus::Completed);
}

// ============================================================================
// Expiry Sweeper
// ============================================================================

#[tokio::test]
async fn test_double_sweep_expires_and_notifies_once() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let reservation = h.engine.claim("driver1", &lot.id, "P1", 1).await.unwrap();

    let later = Utc::now() + Duration::hours(2);
    let first = h.sweeper.sweep_once(later).await;
    let second = h.sweeper.sweep_once(later).await;

    assert_eq!(first.expired, 1);
    assert_eq!(second.expired, 0);
    assert_eq!(h.notifications("driver1", NotificationType::TimeExpired).await.len(), 1);

    let stored: Reservation = h.store.read(collections::RESERVATIONS, &reservation.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReservationStatus::Expired);
    assert!(!h.reload(&lot.id).await.slot("P1").unwrap().is_occupied);
    // A confirmed reservation that was never used carries no overstay bill
    assert!(h.billing.list_for("driver1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sweep_leaves_running_reservations_alone() {
    let h = harness();
    let lot = h.lot(2.0).await;
    h.engine.claim("driver1", &lot.id, "P1", 3).await.unwrap();

    let report = h.sweeper.sweep_once(Utc::now() + Duration::hours(1)).await;
    assert_eq!(report.expired, 0);
    assert!(h.reload(&lot.id).await.slot("P1").unwrap().is_occupied);
}

#[tokio::test]
async fn test_overstay_bill_blocks_new_claims_until_paid() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let reservation = h.engine.claim("driver1", &lot.id, "P1", 1).await.unwrap();
    let active = h.engine.mark_parked("driver1", &reservation.id).await.unwrap();

    h.sweeper.sweep_once(active.end_time + Duration::minutes(90)).await;

    let bills = h.billing.list_for("driver1").await.unwrap();
    assert_eq!(bills.len(), 1);
    assert_eq!(bills[0].amount, 4.0);
    assert_eq!(bills[0].status, BillStatus::Unpaid);
    assert_eq!(h.notifications("driver1", NotificationType::BillDue).await.len(), 1);

    assert!(matches!(
        h.engine.claim("driver1", &lot.id, "P2", 1).await,
        Err(ParkingError::OutstandingBill)
    ));

    h.billing.pay("driver1", &bills[0].id).await.unwrap();
    h.engine.claim("driver1", &lot.id, "P2", 1).await.unwrap();
}

// ============================================================================
// Payment Intent Reconciler
// ============================================================================

#[tokio::test]
async fn test_duplicate_webhook_creates_one_reservation() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let intent = h.initiate("driver1", &lot, "P1", 3).await;
    assert_eq!(intent.status, PaymentIntentStatus::Pending);
    assert!(intent.poll_url.is_some());

    let body = status_update(&intent, "Paid", USD_KEY);
    let first = h.reconciler.handle_webhook(&body).await.unwrap();
    let second = h.reconciler.handle_webhook(&body).await.unwrap();

    let ApplyOutcome::Confirmed(reservation) = first else {
        panic!("expected confirmation, got {first:?}");
    };
    assert!(matches!(second, ApplyOutcome::AlreadyProcessed));
    assert_eq!(reservation.amount_paid, 6.0);
    assert_eq!(reservation.payment_intent_id.as_deref(), Some(intent.id.as_str()));

    let stored = h.intent(&intent.id).await;
    assert_eq!(stored.status, PaymentIntentStatus::Successful);
    assert_eq!(stored.reservation_id, Some(reservation.id));
    assert_eq!(h.reservations_for_slot(&lot.id, "P1").await.len(), 1);
    assert_eq!(h.notifications("driver1", NotificationType::PaymentConfirmed).await.len(), 1);
    assert_eq!(h.notifications("driver1", NotificationType::Reserved).await.len(), 1);
}

#[tokio::test]
async fn test_tampered_webhook_is_rejected_without_state_change() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let intent = h.initiate("driver1", &lot, "P1", 3).await;

    let signed = SignedPayload::parse(&status_update(&intent, "Cancelled", USD_KEY));
    let tampered = SignedPayload::from_pairs(signed.fields().iter().map(|(k, v)| {
        if k == "status" {
            (k.clone(), "Paid".to_string())
        } else {
            (k.clone(), v.clone())
        }
    }));

    let result = h.reconciler.handle_webhook(tampered.encode().as_bytes()).await;
    assert!(matches!(result, Err(ParkingError::SignatureInvalid)));

    // Signed with the other currency's key
    let wrong_key = h.reconciler.handle_webhook(&status_update(&intent, "Paid", ZWL_KEY)).await;
    assert!(matches!(wrong_key, Err(ParkingError::SignatureInvalid)));

    assert_eq!(h.intent(&intent.id).await.status, PaymentIntentStatus::Pending);
    assert!(!h.reload(&lot.id).await.slot("P1").unwrap().is_occupied);
}

#[tokio::test]
async fn test_webhook_with_unknown_or_malformed_reference() {
    let h = harness();

    let malformed = SignedPayload::from_pairs([("reference", "order-1"), ("status", "Paid")]).sign(USD_KEY);
    assert!(matches!(
        h.reconciler.handle_webhook(malformed.encode().as_bytes()).await,
        Err(ParkingError::Validation(_))
    ));

    let unknown = SignedPayload::from_pairs([("reference", "SP-driver1-lotA-P1-1-1700000000000"), ("status", "Paid")])
        .sign(USD_KEY);
    assert!(matches!(
        h.reconciler.handle_webhook(unknown.encode().as_bytes()).await,
        Err(ParkingError::IntentNotFound(_))
    ));
}

#[tokio::test]
async fn test_paid_webhook_after_slot_taken_flags_refund() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let intent = h.initiate("driver1", &lot, "P1", 2).await;

    // Someone else gets the slot before the payment lands
    h.engine.claim("driver2", &lot.id, "P1", 1).await.unwrap();

    let body = status_update(&intent, "Paid", USD_KEY);
    let result = h.reconciler.handle_webhook(&body).await;
    assert!(matches!(result, Err(ParkingError::PostPaymentSlotConflict { .. })));

    let stored = h.intent(&intent.id).await;
    assert_eq!(stored.status, PaymentIntentStatus::Failed);
    assert!(stored.requires_refund);
    assert_eq!(stored.failure_reason.as_deref(), Some(SLOT_TAKEN_AFTER_PAYMENT));

    let on_slot = h.reservations_for_slot(&lot.id, "P1").await;
    assert_eq!(on_slot.len(), 1);
    assert_eq!(on_slot[0].user_id, "driver2");
    assert_eq!(h.notifications("driver1", NotificationType::PaymentFailed).await.len(), 1);

    // Redelivery is a no-op
    assert!(matches!(h.reconciler.handle_webhook(&body).await, Ok(ApplyOutcome::AlreadyProcessed)));
    assert_eq!(h.reconciler.refunds_due().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_and_pending_statuses() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let intent = h.initiate("driver1", &lot, "P1", 1).await;

    let pending = h.reconciler.handle_webhook(&status_update(&intent, "Sent", USD_KEY)).await.unwrap();
    assert!(matches!(pending, ApplyOutcome::Pending));
    assert_eq!(h.intent(&intent.id).await.status, PaymentIntentStatus::Pending);

    let failed = h.reconciler.handle_webhook(&status_update(&intent, "Cancelled", USD_KEY)).await.unwrap();
    assert!(matches!(failed, ApplyOutcome::Failed(_)));
    assert_eq!(h.intent(&intent.id).await.status, PaymentIntentStatus::Failed);
    assert!(!h.reload(&lot.id).await.slot("P1").unwrap().is_occupied);

    // A further failure status changes nothing
    let again = h.reconciler.handle_webhook(&status_update(&intent, "Cancelled", USD_KEY)).await.unwrap();
    assert!(matches!(again, ApplyOutcome::AlreadyProcessed));

    // Money that lands after all still buys the slot
    let late = h.reconciler.handle_webhook(&status_update(&intent, "Paid", USD_KEY)).await.unwrap();
    assert!(matches!(late, ApplyOutcome::Confirmed(_)));
    let stored = h.intent(&intent.id).await;
    assert_eq!(stored.status, PaymentIntentStatus::Successful);
    assert!(stored.failure_reason.is_none());
    assert_eq!(h.reservations_for_slot(&lot.id, "P1").await.len(), 1);

    let redelivered = h.reconciler.handle_webhook(&status_update(&intent, "Paid", USD_KEY)).await.unwrap();
    assert!(matches!(redelivered, ApplyOutcome::AlreadyProcessed));
    assert_eq!(h.reservations_for_slot(&lot.id, "P1").await.len(), 1);
}

#[tokio::test]
async fn test_webhook_refused_without_integration_key() {
    let h = harness_with_keys(IntegrationKeys::default());
    let lot = h.lot(2.0).await;
    let intent = h.initiate("driver1", &lot, "P1", 1).await;

    let forged = status_update(&intent, "Paid", "");
    assert!(matches!(
        h.reconciler.handle_webhook(&forged).await,
        Err(ParkingError::Configuration(_))
    ));

    assert_eq!(h.intent(&intent.id).await.status, PaymentIntentStatus::Pending);
    assert!(h.reservations_for_slot(&lot.id, "P1").await.is_empty());
    assert!(!h.reload(&lot.id).await.slot("P1").unwrap().is_occupied);
}

#[tokio::test]
async fn test_initiate_validation() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let request = |amount: f64, number: &str| InitiatePayment {
        lot_id: lot.id.clone(),
        slot_id: "P1".to_string(),
        hours: 2,
        payment_method: "ECOCASH".to_string(),
        ecocash_number: Some(number.to_string()),
        phone: None,
        amount,
    };

    assert!(matches!(
        h.reconciler.initiate("driver1", "d@example.com", request(3.0, "0771234567")).await,
        Err(ParkingError::AmountMismatch { .. })
    ));
    assert!(matches!(
        h.reconciler.initiate("driver1", "d@example.com", request(4.0, "0721234567")).await,
        Err(ParkingError::Validation(_))
    ));

    h.engine.claim("driver2", &lot.id, "P1", 1).await.unwrap();
    assert!(matches!(
        h.reconciler.initiate("driver1", "d@example.com", request(4.0, "0771234567")).await,
        Err(ParkingError::SlotUnavailable)
    ));
    assert!(h.gateway.requests().is_empty());
}

#[tokio::test]
async fn test_initiate_rejection_and_gateway_outage_fail_the_intent() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let request = || InitiatePayment {
        lot_id: lot.id.clone(),
        slot_id: "P1".to_string(),
        hours: 1,
        payment_method: "ECOCASH".to_string(),
        ecocash_number: None,
        phone: Some("0781234567".to_string()),
        amount: 2.0,
    };

    h.gateway.reject_with("Insufficient balance");
    let rejected = h.reconciler.initiate("driver1", "d@example.com", request()).await.unwrap();
    assert!(!rejected.success);
    assert_eq!(rejected.message.as_deref(), Some("Insufficient balance"));

    h.gateway.fail_transport(true);
    let outage = h.reconciler.initiate("driver1", "d@example.com", request()).await;
    assert!(matches!(outage, Err(ParkingError::Gateway(_))));

    let intents: Vec<PaymentIntent> = h
        .store
        .list(collections::PAYMENT_INTENTS, &Filter::all().eq("userId", "driver1"))
        .await
        .unwrap();
    assert_eq!(intents.len(), 2);
    assert!(intents.iter().all(|i| i.status == PaymentIntentStatus::Failed));
    assert!(intents.iter().all(|i| i.currency == smartpark_shared::Currency::Zwl));
}

#[tokio::test]
async fn test_poll_confirms_paid_intent() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let intent = h.initiate("driver1", &lot, "P2", 2).await;

    assert!(matches!(
        h.reconciler.poll_intent(Some("driver2"), &intent.id).await,
        Err(ParkingError::Forbidden(_))
    ));

    let (still_pending, outcome) = h.reconciler.poll_intent(Some("driver1"), &intent.id).await.unwrap();
    assert!(matches!(outcome, ApplyOutcome::Pending));
    assert_eq!(still_pending.status, PaymentIntentStatus::Pending);

    h.gateway.set_poll_status("Paid");
    let (paid, outcome) = h.reconciler.poll_intent(Some("driver1"), &intent.id).await.unwrap();
    assert!(matches!(outcome, ApplyOutcome::Confirmed(_)));
    assert_eq!(paid.status, PaymentIntentStatus::Successful);
    assert!(h.reload(&lot.id).await.slot("P2").unwrap().is_occupied);
}

#[tokio::test]
async fn test_stale_pending_intents_are_closed_by_sweeper() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let unpaid = h.initiate("driver1", &lot, "P1", 1).await;
    let other = h.initiate("driver2", &lot, "P2", 1).await;

    // Within the timeout nothing happens
    assert_eq!(h.sweeper.sweep_once(Utc::now()).await.intents_closed, 0);

    // Still pending on the gateway side, so both intents time out
    let report = h.sweeper.sweep_once(Utc::now() + Duration::minutes(31)).await;
    assert_eq!(report.intents_closed, 2);

    let unpaid = h.intent(&unpaid.id).await;
    assert_eq!(unpaid.status, PaymentIntentStatus::Failed);
    assert_eq!(unpaid.failure_reason.as_deref(), Some(TIMED_OUT));
    assert_eq!(h.intent(&other.id).await.status, PaymentIntentStatus::Failed);
}

#[tokio::test]
async fn test_stale_intent_confirmed_when_poll_reports_paid() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let intent = h.initiate("driver1", &lot, "P1", 1).await;

    h.gateway.set_poll_status("Paid");
    let report = h.sweeper.sweep_once(Utc::now() + Duration::minutes(31)).await;

    assert_eq!(report.intents_closed, 1);
    assert_eq!(h.intent(&intent.id).await.status, PaymentIntentStatus::Successful);
}

#[tokio::test]
async fn test_stale_intent_stays_pending_while_gateway_unreachable() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let intent = h.initiate("driver1", &lot, "P1", 1).await;

    h.gateway.fail_transport(true);
    let report = h.sweeper.sweep_once(Utc::now() + Duration::minutes(31)).await;
    assert_eq!(report.intents_closed, 0);
    assert_eq!(h.intent(&intent.id).await.status, PaymentIntentStatus::Pending);

    h.gateway.fail_transport(false);
    let paid = h.reconciler.handle_webhook(&status_update(&intent, "Paid", USD_KEY)).await.unwrap();
    assert!(matches!(paid, ApplyOutcome::Confirmed(_)));
    assert_eq!(h.reservations_for_slot(&lot.id, "P1").await.len(), 1);
}

#[tokio::test]
async fn test_payment_after_timeout_is_reserved_or_refunded() {
    let h = harness();
    let lot = h.lot(2.0).await;
    let on_time = h.initiate("driver1", &lot, "P1", 1).await;
    let too_late = h.initiate("driver2", &lot, "P2", 1).await;

    // Still "Sent" on the handset when the timeout hits
    let report = h.sweeper.sweep_once(Utc::now() + Duration::minutes(31)).await;
    assert_eq!(report.intents_closed, 2);
    assert_eq!(h.intent(&on_time.id).await.failure_reason.as_deref(), Some(TIMED_OUT));

    // Slot still free: the late payment becomes a reservation, found by polling
    h.gateway.set_poll_status("Paid");
    let (intent, outcome) = h.reconciler.poll_intent(Some("driver1"), &on_time.id).await.unwrap();
    assert!(matches!(outcome, ApplyOutcome::Confirmed(_)));
    assert_eq!(intent.status, PaymentIntentStatus::Successful);

    // Slot gone: the late payment is flagged for refund instead of dropped
    h.engine.claim("driver3", &lot.id, "P2", 1).await.unwrap();
    let result = h.reconciler.handle_webhook(&status_update(&too_late, "Paid", USD_KEY)).await;
    assert!(matches!(result, Err(ParkingError::PostPaymentSlotConflict { .. })));

    let flagged = h.intent(&too_late.id).await;
    assert_eq!(flagged.status, PaymentIntentStatus::Failed);
    assert!(flagged.requires_refund);
    assert_eq!(flagged.failure_reason.as_deref(), Some(SLOT_TAKEN_AFTER_PAYMENT));
    let refunds = h.reconciler.refunds_due().await.unwrap();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].id, too_late.id);
}

// ============================================================================
// Lots & seed data
// ============================================================================

#[tokio::test]
async fn test_occupied_slots_block_structural_deletes() {
    let h = harness();
    let lot = h.lot(2.0).await;
    h.engine.claim("driver1", &lot.id, "P1", 1).await.unwrap();

    assert!(matches!(h.lots.remove_slot(&lot.id, "P1").await, Err(ParkingError::SlotOccupied(_))));
    assert!(matches!(h.lots.delete(&lot.id).await, Err(ParkingError::SlotOccupied(_))));

    let with_new_slot = h.lots.add_slot(&lot.id, NewSlot { id: None, coords: None }).await.unwrap();
    assert!(with_new_slot.slot("P3").is_some());
    let trimmed = h.lots.remove_slot(&lot.id, "P2").await.unwrap();
    assert!(trimmed.slot("P2").is_none());
    assert!(trimmed.slot("P1").unwrap().is_occupied);
}

#[tokio::test]
async fn test_slot_ids_must_fit_payment_references() {
    let h = harness();
    let lot = h.lot(2.0).await;

    let dashed = h
        .lots
        .create(NewLot {
            name: "B".to_string(),
            address: "2 Main St".to_string(),
            location: GeoPoint { lat: -17.8, lng: 31.0 },
            hourly_rate: 1.0,
            slot_count: None,
            slots: Some(vec![NewSlot { id: Some("A-1".to_string()), coords: None }]),
        })
        .await;
    assert!(matches!(dashed, Err(ParkingError::Validation(_))));

    let added = h.lots.add_slot(&lot.id, NewSlot { id: Some("B 2".to_string()), coords: None }).await;
    assert!(matches!(added, Err(ParkingError::Validation(_))));
    assert_eq!(h.reload(&lot.id).await.slots.len(), 2);

    let underscored = h.lots.add_slot(&lot.id, NewSlot { id: Some("VIP_1".to_string()), coords: None }).await.unwrap();
    assert!(underscored.slot("VIP_1").is_some());
}

#[tokio::test]
async fn test_seed_runs_once() {
    let h = harness();
    assert_eq!(h.lots.seed_demo_lots().await.unwrap(), 3);
    assert_eq!(h.lots.seed_demo_lots().await.unwrap(), 0);

    let lots = h.lots.list().await.unwrap();
    assert_eq!(lots.len(), 3);
    assert!(lots.iter().all(|l| l.slots.len() == 20 && l.free_count() == 20));
    let eastgate = lots.iter().find(|l| l.name == "Eastgate Shopping Mall").unwrap();
    assert_eq!(eastgate.hourly_rate, 2.0);
}
