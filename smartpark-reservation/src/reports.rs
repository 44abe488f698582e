use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use smartpark_core::{collections, DocumentStore, Filter, ParkingResult};
use smartpark_shared::money::round_cents;
use smartpark_shared::{ParkingLot, Reservation};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    Day,
    Week,
    Month,
}

impl Period {
    /// First day of the bucket containing `date`; weeks start on Monday
    pub fn bucket_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Period::Day => date,
            Period::Week => date - Duration::days(i64::from(date.weekday().num_days_from_monday())),
            Period::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RevenueBucket {
    pub period_start: NaiveDate,
    pub revenue: f64,
    pub reservations: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LotOccupancy {
    pub lot_id: String,
    pub name: String,
    pub occupied: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueReport {
    pub period: Period,
    pub buckets: Vec<RevenueBucket>,
    pub total_revenue: f64,
    pub total_reservations: usize,
    pub occupancy: Vec<LotOccupancy>,
}

/// Sum `amountPaid` per period for reservations starting within `[from, to]`
pub fn summarize(
    reservations: &[Reservation],
    period: Period,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> Vec<RevenueBucket> {
    let mut buckets: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();

    for r in reservations {
        if from.is_some_and(|from| r.start_time < from) || to.is_some_and(|to| r.start_time > to) {
            continue;
        }
        let entry = buckets
            .entry(period.bucket_start(r.start_time.date_naive()))
            .or_insert((0.0, 0));
        entry.0 += r.amount_paid;
        entry.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(period_start, (revenue, reservations))| RevenueBucket {
            period_start,
            revenue: round_cents(revenue),
            reservations,
        })
        .collect()
}

#[derive(Clone)]
pub struct ReportService {
    store: Arc<dyn DocumentStore>,
}

impl ReportService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn revenue(
        &self,
        period: Period,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> ParkingResult<RevenueReport> {
        let reservations: Vec<Reservation> = self.store.list(collections::RESERVATIONS, &Filter::all()).await?;
        let buckets = summarize(&reservations, period, from, to);

        let lots: Vec<ParkingLot> = self.store.list(collections::PARKING_LOTS, &Filter::all()).await?;
        let mut occupancy: Vec<LotOccupancy> = lots
            .iter()
            .map(|lot| LotOccupancy {
                lot_id: lot.id.clone(),
                name: lot.name.clone(),
                occupied: lot.occupied_count(),
                total: lot.slots.len(),
            })
            .collect();
        occupancy.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(RevenueReport {
            period,
            total_revenue: round_cents(buckets.iter().map(|b| b.revenue).sum()),
            total_reservations: buckets.iter().map(|b| b.reservations).sum(),
            buckets,
            occupancy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reservation_at(y: i32, m: u32, d: u32, amount: f64) -> Reservation {
        let start = Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap();
        Reservation::confirmed("u1", "lot", "Eastgate", "P1", 1, amount, start)
    }

    #[test]
    fn test_week_buckets_start_on_monday() {
        // 2024-05-15 is a Wednesday
        let wednesday = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        assert_eq!(Period::Week.bucket_start(wednesday), NaiveDate::from_ymd_opt(2024, 5, 13).unwrap());
        assert_eq!(Period::Month.bucket_start(wednesday), NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(Period::Day.bucket_start(wednesday), wednesday);
    }

    #[test]
    fn test_revenue_grouped_and_filtered() {
        let reservations = vec![
            reservation_at(2024, 5, 13, 2.0),
            reservation_at(2024, 5, 15, 3.5),
            reservation_at(2024, 5, 20, 1.5),
            reservation_at(2024, 4, 30, 10.0),
        ];
        let from = Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap());

        let weekly = summarize(&reservations, Period::Week, from, None);
        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly[0].revenue, 5.5);
        assert_eq!(weekly[0].reservations, 2);
        assert_eq!(weekly[1].revenue, 1.5);

        let monthly = summarize(&reservations, Period::Month, None, None);
        assert_eq!(monthly.iter().map(|b| b.revenue).collect::<Vec<_>>(), vec![10.0, 7.0]);
    }
}
