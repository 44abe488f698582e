use serde::Deserialize;
use smartpark_core::{
    collections, run_transaction, DocumentStore, Filter, ParkingError, ParkingResult, PaymentReference,
};
use smartpark_shared::{GeoPoint, ParkingLot, ParkingSlot};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

const DEMO_SLOTS_PER_LOT: u32 = 20;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSlot {
    pub id: Option<String>,
    pub coords: Option<GeoPoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLot {
    pub name: String,
    pub address: String,
    pub location: GeoPoint,
    pub hourly_rate: f64,
    #[serde(default)]
    pub slot_count: Option<u32>,
    #[serde(default)]
    pub slots: Option<Vec<NewSlot>>,
}

/// Structural fields only; occupancy is owned by the reservation engine
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotUpdate {
    pub name: Option<String>,
    pub address: Option<String>,
    pub location: Option<GeoPoint>,
    pub hourly_rate: Option<f64>,
}

fn validate_rate(rate: f64) -> ParkingResult<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(ParkingError::Validation("hourlyRate must be positive".to_string()));
    }
    Ok(())
}

/// Slot ids travel inside payment references, so they share that alphabet
fn validate_slot_id(id: &str) -> ParkingResult<()> {
    if !PaymentReference::is_valid_id(id) {
        return Err(ParkingError::Validation(format!(
            "slot id {:?} may only contain letters, digits and underscores",
            id
        )));
    }
    Ok(())
}

/// Small deterministic offsets around the lot centre so slots don't stack on a map
fn slot_coords(center: &GeoPoint, index: u32) -> GeoPoint {
    let angle = f64::from(index) * 2.399_963;
    let distance = 0.000_02 * (1.0 + f64::from(index % 5));
    GeoPoint {
        lat: center.lat + distance * angle.cos(),
        lng: center.lng + distance * angle.sin(),
    }
}

fn next_slot_id(lot: &ParkingLot) -> String {
    let highest = lot
        .slots
        .iter()
        .filter_map(|s| s.id.strip_prefix('P').and_then(|n| n.parse::<u32>().ok()))
        .max()
        .unwrap_or(0);
    format!("P{}", highest + 1)
}

/// Lot and slot administration. Every lot write goes through a transaction so it
/// can never clobber a concurrent claim or release.
#[derive(Clone)]
pub struct LotService {
    store: Arc<dyn DocumentStore>,
}

impl LotService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> ParkingResult<Vec<ParkingLot>> {
        let mut lots: Vec<ParkingLot> = self.store.list(collections::PARKING_LOTS, &Filter::all()).await?;
        lots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(lots)
    }

    pub async fn get(&self, lot_id: &str) -> ParkingResult<ParkingLot> {
        self.store
            .read(collections::PARKING_LOTS, lot_id)
            .await?
            .ok_or_else(|| ParkingError::LotNotFound(lot_id.to_string()))
    }

    pub async fn create(&self, new_lot: NewLot) -> ParkingResult<ParkingLot> {
        if new_lot.name.trim().is_empty() {
            return Err(ParkingError::Validation("name is required".to_string()));
        }
        validate_rate(new_lot.hourly_rate)?;

        let slots: Vec<ParkingSlot> = match (&new_lot.slots, new_lot.slot_count) {
            (Some(explicit), _) => explicit
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    let id = s.id.clone().unwrap_or_else(|| format!("P{}", i + 1));
                    ParkingSlot::new(id, s.coords.clone())
                })
                .collect(),
            (None, Some(count)) => (1..=count)
                .map(|i| ParkingSlot::new(format!("P{}", i), Some(slot_coords(&new_lot.location, i))))
                .collect(),
            (None, None) => Vec::new(),
        };
        for slot in &slots {
            validate_slot_id(&slot.id)?;
        }
        let mut seen = std::collections::HashSet::new();
        if !slots.iter().all(|s| seen.insert(s.id.clone())) {
            return Err(ParkingError::Validation("slot ids must be unique".to_string()));
        }

        let lot = ParkingLot {
            id: Uuid::new_v4().simple().to_string(),
            name: new_lot.name,
            address: new_lot.address,
            location: new_lot.location,
            hourly_rate: new_lot.hourly_rate,
            slots,
        };

        let doc = lot.clone();
        run_transaction(self.store.as_ref(), |tx| {
            let doc = doc.clone();
            Box::pin(async move {
                tx.write(collections::PARKING_LOTS, &doc.id, &doc)?;
                Ok::<_, ParkingError>(())
            })
        })
        .await?;

        info!(lot_id = %lot.id, name = %lot.name, slots = lot.slots.len(), "Parking lot created");
        Ok(lot)
    }

    pub async fn update(&self, lot_id: &str, update: LotUpdate) -> ParkingResult<ParkingLot> {
        if let Some(rate) = update.hourly_rate {
            validate_rate(rate)?;
        }
        self.modify(lot_id, move |lot| {
            if let Some(name) = &update.name {
                lot.name = name.clone();
            }
            if let Some(address) = &update.address {
                lot.address = address.clone();
            }
            if let Some(location) = &update.location {
                lot.location = location.clone();
            }
            if let Some(rate) = update.hourly_rate {
                lot.hourly_rate = rate;
            }
            Ok(())
        })
        .await
    }

    /// Rejected while any slot is occupied
    pub async fn delete(&self, lot_id: &str) -> ParkingResult<()> {
        let lot_id = lot_id.to_string();
        run_transaction(self.store.as_ref(), |tx| {
            let lot_id = lot_id.clone();
            Box::pin(async move {
                let lot: ParkingLot = tx
                    .read(collections::PARKING_LOTS, &lot_id)
                    .await?
                    .ok_or_else(|| ParkingError::LotNotFound(lot_id.clone()))?;
                if lot.occupied_count() > 0 {
                    return Err(ParkingError::SlotOccupied(format!(
                        "{} has {} occupied slots",
                        lot.name,
                        lot.occupied_count()
                    )));
                }
                tx.delete(collections::PARKING_LOTS, &lot_id);
                Ok(())
            })
        })
        .await?;

        info!(lot_id = %lot_id, "Parking lot deleted");
        Ok(())
    }

    pub async fn add_slot(&self, lot_id: &str, slot: NewSlot) -> ParkingResult<ParkingLot> {
        self.modify(lot_id, move |lot| {
            let id = slot.id.clone().unwrap_or_else(|| next_slot_id(lot));
            validate_slot_id(&id)?;
            if lot.slot(&id).is_some() {
                return Err(ParkingError::Validation(format!("slot {} already exists", id)));
            }
            let coords = slot
                .coords
                .clone()
                .or_else(|| Some(slot_coords(&lot.location, lot.slots.len() as u32 + 1)));
            lot.slots.push(ParkingSlot::new(id, coords));
            Ok(())
        })
        .await
    }

    /// Rejected while the slot is occupied
    pub async fn remove_slot(&self, lot_id: &str, slot_id: &str) -> ParkingResult<ParkingLot> {
        let slot_id = slot_id.to_string();
        self.modify(lot_id, move |lot| {
            let slot = lot
                .slot(&slot_id)
                .ok_or_else(|| ParkingError::SlotNotFound(slot_id.clone()))?;
            if slot.is_occupied {
                return Err(ParkingError::SlotOccupied(slot_id.clone()));
            }
            lot.slots.retain(|s| s.id != slot_id);
            Ok(())
        })
        .await
    }

    /// Create the three demo lots, unless any lot already exists. Returns how many were created.
    pub async fn seed_demo_lots(&self) -> ParkingResult<usize> {
        if !self.store.query(collections::PARKING_LOTS, &Filter::all()).await?.is_empty() {
            info!("Parking lots already present, seed skipped");
            return Ok(0);
        }

        let demo = [
            ("Avondale Shopping Centre", "Lanark Road, Harare", -17.7968, 31.0335, 1.5),
            ("Eastgate Shopping Mall", "Robert Mugabe Rd, Harare", -17.8317, 31.0539, 2.0),
            ("Sam Levy's Village", "Borrowdale Road, Harare", -17.7788, 31.0858, 2.5),
        ];

        for (name, address, lat, lng, hourly_rate) in demo {
            self.create(NewLot {
                name: name.to_string(),
                address: address.to_string(),
                location: GeoPoint { lat, lng },
                hourly_rate,
                slot_count: Some(DEMO_SLOTS_PER_LOT),
                slots: None,
            })
            .await?;
        }
        Ok(demo.len())
    }

    async fn modify<F>(&self, lot_id: &str, edit: F) -> ParkingResult<ParkingLot>
    where
        F: Fn(&mut ParkingLot) -> ParkingResult<()> + Clone + Send + Sync + 'static,
    {
        let lot_id = lot_id.to_string();
        run_transaction(self.store.as_ref(), |tx| {
            let (lot_id, edit) = (lot_id.clone(), edit.clone());
            Box::pin(async move {
                let mut lot: ParkingLot = tx
                    .read(collections::PARKING_LOTS, &lot_id)
                    .await?
                    .ok_or_else(|| ParkingError::LotNotFound(lot_id.clone()))?;
                edit(&mut lot)?;
                tx.write(collections::PARKING_LOTS, &lot_id, &lot)?;
                Ok(lot)
            })
        })
        .await
    }
}
