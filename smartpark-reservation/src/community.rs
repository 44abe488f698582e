use chrono::Utc;
use serde::Deserialize;
use smartpark_core::{collections, DocumentStore, Filter, ParkingError, ParkingResult};
use smartpark_shared::{Notice, NotificationData, NotificationType, ParkingLot, Review, User};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::notifier::Notifier;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotice {
    pub title: String,
    pub content: String,
    /// Users who also get a `GENERIC` notification
    #[serde(default)]
    pub notify_user_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReview {
    pub parking_lot_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: String,
}

/// Notices board and lot reviews
#[derive(Clone)]
pub struct CommunityService {
    store: Arc<dyn DocumentStore>,
    notifier: Notifier,
}

impl CommunityService {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Notifier) -> Self {
        Self { store, notifier }
    }

    pub async fn notices(&self) -> ParkingResult<Vec<Notice>> {
        let mut notices: Vec<Notice> = self.store.list(collections::NOTICES, &Filter::all()).await?;
        notices.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(notices)
    }

    pub async fn publish_notice(&self, new_notice: NewNotice) -> ParkingResult<Notice> {
        if new_notice.title.trim().is_empty() || new_notice.content.trim().is_empty() {
            return Err(ParkingError::Validation("title and content are required".to_string()));
        }

        let notice = Notice {
            id: Uuid::new_v4().simple().to_string(),
            title: new_notice.title,
            content: new_notice.content,
            timestamp: Utc::now(),
        };
        self.store.write(collections::NOTICES, &notice.id, &notice).await?;
        info!(notice_id = %notice.id, recipients = new_notice.notify_user_ids.len(), "Notice published");

        for user_id in &new_notice.notify_user_ids {
            self.notifier
                .send(user_id, NotificationType::Generic, format!("{}: {}", notice.title, notice.content), None)
                .await;
        }
        Ok(notice)
    }

    pub async fn delete_notice(&self, notice_id: &str) -> ParkingResult<()> {
        if self.store.get(collections::NOTICES, notice_id).await?.is_none() {
            return Err(ParkingError::NotFound(format!("notice {}", notice_id)));
        }
        self.store.delete(collections::NOTICES, notice_id).await?;
        Ok(())
    }

    pub async fn submit_review(&self, user_id: &str, email: &str, new_review: NewReview) -> ParkingResult<Review> {
        if !(1..=5).contains(&new_review.rating) {
            return Err(ParkingError::Validation("rating must be between 1 and 5".to_string()));
        }
        let lot: ParkingLot = self
            .store
            .read(collections::PARKING_LOTS, &new_review.parking_lot_id)
            .await?
            .ok_or_else(|| ParkingError::LotNotFound(new_review.parking_lot_id.clone()))?;

        let username = match self.store.read::<User>(collections::USERS, user_id).await? {
            Some(user) if !user.username.is_empty() => user.username,
            _ => email.split('@').next().unwrap_or_default().to_string(),
        };

        let review = Review {
            id: Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            username,
            parking_lot_id: new_review.parking_lot_id,
            parking_lot_name: lot.name,
            rating: new_review.rating,
            comment: new_review.comment,
            timestamp: Utc::now(),
            admin_reply: None,
        };
        self.store.write(collections::REVIEWS, &review.id, &review).await?;
        Ok(review)
    }

    pub async fn reviews(&self, lot_id: Option<&str>) -> ParkingResult<Vec<Review>> {
        let filter = match lot_id {
            Some(lot_id) => Filter::all().eq("parkingLotId", lot_id),
            None => Filter::all(),
        };
        let mut reviews: Vec<Review> = self.store.list(collections::REVIEWS, &filter).await?;
        reviews.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(reviews)
    }

    pub async fn reply_to_review(&self, review_id: &str, reply: &str) -> ParkingResult<Review> {
        if reply.trim().is_empty() {
            return Err(ParkingError::Validation("reply is required".to_string()));
        }
        let mut review: Review = self
            .store
            .read(collections::REVIEWS, review_id)
            .await?
            .ok_or_else(|| ParkingError::NotFound(format!("review {}", review_id)))?;

        review.admin_reply = Some(reply.to_string());
        self.store.write(collections::REVIEWS, &review.id, &review).await?;

        self.notifier
            .send(
                &review.user_id,
                NotificationType::ReviewReply,
                format!("An admin replied to your review of {}.", review.parking_lot_name),
                Some(NotificationData {
                    review_id: Some(review.id.clone()),
                    parking_lot_name: Some(review.parking_lot_name.clone()),
                    ..Default::default()
                }),
            )
            .await;
        Ok(review)
    }

    pub async fn delete_review(&self, review_id: &str) -> ParkingResult<()> {
        if self.store.get(collections::REVIEWS, review_id).await?.is_none() {
            return Err(ParkingError::NotFound(format!("review {}", review_id)));
        }
        self.store.delete(collections::REVIEWS, review_id).await?;
        Ok(())
    }
}
