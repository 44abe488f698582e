//! Amounts are stored as decimal dollars (matching the documents already in the store) and
//! compared in whole cents.

/// Round an amount to two decimal places.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Price of `hours` at `hourly_rate`, rounded to cents.
pub fn price_for(hours: u32, hourly_rate: f64) -> f64 {
    round_cents(f64::from(hours) * hourly_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_rounds_to_cents() {
        assert_eq!(price_for(3, 2.0), 6.0);
        assert_eq!(price_for(3, 1.15), 3.45);
        assert_eq!(to_cents(3.449999), 345);
    }
}
