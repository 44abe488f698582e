use chrono::Utc;
use serde::{Deserialize, Serialize};
use smartpark_core::{collections, DocumentStore, Filter, ParkingError, ParkingResult};
use smartpark_shared::{Reservation, User};
use std::sync::Arc;
use tracing::info;

use crate::reconciler::is_ecocash_number;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub username: Option<String>,
    pub car_plates: Option<Vec<String>>,
    pub default_car_plate: Option<String>,
    pub ecocash_number: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: User,
    pub reservations: Vec<Reservation>,
}

/// User profiles. Plain document writes; nothing here touches occupancy.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn DocumentStore>,
}

impl AccountService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Load the caller's profile, creating an empty one on first use
    pub async fn profile(&self, uid: &str, email: &str) -> ParkingResult<User> {
        if let Some(user) = self.store.read::<User>(collections::USERS, uid).await? {
            return Ok(user);
        }
        let username = email.split('@').next().unwrap_or_default().to_string();
        let user = User::new(uid, email, username);
        self.store.write(collections::USERS, uid, &user).await?;
        info!(uid, "User profile created");
        Ok(user)
    }

    pub async fn get(&self, uid: &str) -> ParkingResult<User> {
        self.store
            .read(collections::USERS, uid)
            .await?
            .ok_or_else(|| ParkingError::NotFound(format!("user {}", uid)))
    }

    pub async fn update_profile(&self, uid: &str, email: &str, update: ProfileUpdate) -> ParkingResult<User> {
        let mut user = self.profile(uid, email).await?;
        apply_update(&mut user, update)?;
        self.store.write(collections::USERS, uid, &user).await?;
        Ok(user)
    }

    /// Admin edit of an existing user
    pub async fn admin_update(&self, uid: &str, update: ProfileUpdate) -> ParkingResult<User> {
        let mut user = self.get(uid).await?;
        apply_update(&mut user, update)?;
        self.store.write(collections::USERS, uid, &user).await?;
        info!(uid, "User updated by admin");
        Ok(user)
    }

    /// Returns whether the lot is now a favourite
    pub async fn toggle_favorite(&self, uid: &str, email: &str, lot_id: &str) -> ParkingResult<bool> {
        let mut user = self.profile(uid, email).await?;
        let added = user.toggle_favorite(lot_id);
        self.store.write(collections::USERS, uid, &user).await?;
        Ok(added)
    }

    pub async fn mark_notices_viewed(&self, uid: &str, email: &str) -> ParkingResult<User> {
        let mut user = self.profile(uid, email).await?;
        user.last_viewed_notices = Some(Utc::now());
        self.store.write(collections::USERS, uid, &user).await?;
        Ok(user)
    }

    pub async fn list(&self) -> ParkingResult<Vec<User>> {
        let mut users: Vec<User> = self.store.list(collections::USERS, &Filter::all()).await?;
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    pub async fn detail(&self, uid: &str) -> ParkingResult<UserDetail> {
        let user = self.get(uid).await?;
        let mut reservations: Vec<Reservation> = self
            .store
            .list(collections::RESERVATIONS, &Filter::all().eq("userId", uid))
            .await?;
        reservations.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(UserDetail { user, reservations })
    }
}

fn apply_update(user: &mut User, update: ProfileUpdate) -> ParkingResult<()> {
    if let Some(number) = update.ecocash_number {
        let number = number.trim().to_string();
        if !number.is_empty() && !is_ecocash_number(&number) {
            return Err(ParkingError::Validation("Invalid EcoCash number.".to_string()));
        }
        user.ecocash_number = number.into();
    }
    if let Some(username) = update.username {
        user.username = username;
    }
    if let Some(plates) = update.car_plates {
        user.car_plates = plates
            .into_iter()
            .map(|p| p.trim().to_uppercase())
            .filter(|p| !p.is_empty())
            .collect();
    }
    if let Some(default_plate) = update.default_car_plate {
        let default_plate = default_plate.trim().to_uppercase();
        if !default_plate.is_empty() && !user.car_plates.contains(&default_plate) {
            user.car_plates.push(default_plate.clone());
        }
        user.default_car_plate = default_plate;
    }
    Ok(())
}
