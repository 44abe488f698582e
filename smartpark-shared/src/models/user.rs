use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pii::Masked;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub car_plates: Vec<String>,
    #[serde(default)]
    pub default_car_plate: String,
    #[serde(default)]
    pub ecocash_number: Masked<String>,
    #[serde(default)]
    pub favorite_parking_lots: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_viewed_notices: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(uid: impl Into<String>, email: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            email: email.into(),
            username: username.into(),
            car_plates: Vec::new(),
            default_car_plate: String::new(),
            ecocash_number: Masked::default(),
            favorite_parking_lots: Vec::new(),
            last_viewed_notices: None,
        }
    }

    /// Plate shown on reservation notifications
    pub fn display_plate(&self) -> String {
        if !self.default_car_plate.is_empty() {
            self.default_car_plate.clone()
        } else {
            self.car_plates.first().cloned().unwrap_or_else(|| "N/A".to_string())
        }
    }

    /// Add or remove `lot_id` from favourites; returns whether it is now a favourite
    pub fn toggle_favorite(&mut self, lot_id: &str) -> bool {
        if let Some(pos) = self.favorite_parking_lots.iter().position(|id| id == lot_id) {
            self.favorite_parking_lots.remove(pos);
            false
        } else {
            self.favorite_parking_lots.push(lot_id.to_string());
            true
        }
    }
}
