use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::money;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// A single bay, embedded in its lot's `slots` array
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParkingSlot {
    pub id: String,
    pub is_occupied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_until: Option<DateTime<Utc>>,
}

impl ParkingSlot {
    pub fn new(id: impl Into<String>, coords: Option<GeoPoint>) -> Self {
        Self {
            id: id.into(),
            is_occupied: false,
            coords,
            reserved_until: None,
        }
    }

    pub fn occupy(&mut self, until: DateTime<Utc>) {
        self.is_occupied = true;
        self.reserved_until = Some(until);
    }

    pub fn release(&mut self) {
        self.is_occupied = false;
        self.reserved_until = None;
    }
}

/// A parking lot document. The whole `slots` array is rewritten on every occupancy change,
/// so the lot document is the unit of concurrency for all slot mutations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParkingLot {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub address: String,
    pub location: GeoPoint,
    pub hourly_rate: f64,
    #[serde(default)]
    pub slots: Vec<ParkingSlot>,
}

impl ParkingLot {
    pub fn slot(&self, slot_id: &str) -> Option<&ParkingSlot> {
        self.slots.iter().find(|s| s.id == slot_id)
    }

    pub fn slot_mut(&mut self, slot_id: &str) -> Option<&mut ParkingSlot> {
        self.slots.iter_mut().find(|s| s.id == slot_id)
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_occupied).count()
    }

    pub fn free_count(&self) -> usize {
        self.slots.len() - self.occupied_count()
    }

    /// Server-side price for `hours` in this lot
    pub fn price_for(&self, hours: u32) -> f64 {
        money::price_for(hours, self.hourly_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lot() -> ParkingLot {
        ParkingLot {
            id: "lot-a".to_string(),
            name: "Eastgate".to_string(),
            address: "Robert Mugabe Rd".to_string(),
            location: GeoPoint { lat: -17.83, lng: 31.05 },
            hourly_rate: 2.0,
            slots: vec![ParkingSlot::new("P1", None), ParkingSlot::new("P2", None)],
        }
    }

    #[test]
    fn test_slot_lookup_and_counts() {
        let mut lot = lot();
        lot.slot_mut("P2").unwrap().occupy(Utc::now());

        assert!(lot.slot("P3").is_none());
        assert_eq!(lot.occupied_count(), 1);
        assert_eq!(lot.free_count(), 1);
        assert_eq!(lot.price_for(3), 6.0);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let json = serde_json::to_value(lot()).unwrap();
        assert_eq!(json["hourlyRate"], 2.0);
        assert_eq!(json["slots"][0]["isOccupied"], false);
        assert!(json["slots"][0].get("reservedUntil").is_none());
    }
}
