use chrono::{DateTime, Utc};
use smartpark_core::{collections, DocumentStore, Filter, ParkingResult};
use smartpark_shared::Reservation;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::engine::ReservationEngine;
use crate::reconciler::PaymentReconciler;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub failed: usize,
    pub intents_closed: usize,
}

/// Periodically expires overdue reservations and closes stale payment intents.
/// Safe to run concurrently with itself.
pub struct ExpirySweeper {
    store: Arc<dyn DocumentStore>,
    engine: Arc<ReservationEngine>,
    reconciler: Arc<PaymentReconciler>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        engine: Arc<ReservationEngine>,
        reconciler: Arc<PaymentReconciler>,
        interval: Duration,
    ) -> Self {
        // tokio's interval panics on zero
        let interval = interval.max(Duration::from_secs(1));
        Self { store, engine, reconciler, interval }
    }

    /// Sweep forever on the configured interval, handing each report to `on_report`
    pub async fn run<F>(self: Arc<Self>, on_report: F)
    where
        F: Fn(&SweepReport) + Send + Sync,
    {
        info!(interval_secs = self.interval.as_secs(), "Expiry sweeper started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            let report = self.sweep_once(Utc::now()).await;
            on_report(&report);
            if report != SweepReport::default() {
                info!(
                    expired = report.expired,
                    failed = report.failed,
                    intents_closed = report.intents_closed,
                    "Sweep finished"
                );
            }
        }
    }

    /// One pass. Each overdue reservation is expired on its own; a failure is
    /// logged and the batch continues.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let overdue = match self.overdue(now).await {
            Ok(overdue) => overdue,
            Err(e) => {
                error!(error = %e, "Failed to query overdue reservations");
                Vec::new()
            }
        };

        for reservation in overdue {
            match self.engine.expire(&reservation.id, now).await {
                Ok(Some(_)) => report.expired += 1,
                Ok(None) => debug!(reservation_id = %reservation.id, "Already handled"),
                Err(e) => {
                    report.failed += 1;
                    error!(reservation_id = %reservation.id, error = %e, "Failed to expire reservation");
                }
            }
        }

        report.intents_closed = self.reconciler.expire_stale_intents(now).await;
        report
    }

    async fn overdue(&self, now: DateTime<Utc>) -> ParkingResult<Vec<Reservation>> {
        let mut overdue = Vec::new();
        for status in ["active", "confirmed"] {
            let reservations: Vec<Reservation> = self
                .store
                .list(collections::RESERVATIONS, &Filter::all().eq("status", status))
                .await?;
            overdue.extend(reservations.into_iter().filter(|r| r.is_overdue(now)));
        }
        Ok(overdue)
    }
}
