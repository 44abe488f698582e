use serde_json::json;
use smartpark_core::{collections, DocumentStore, Filter, ParkingResult};
use smartpark_shared::{Notification, NotificationData, NotificationType};
use std::sync::Arc;
use tracing::{debug, warn};

/// Writes user notifications. Delivery is best effort: a failed write is logged
/// and never fails the operation that triggered it.
#[derive(Clone)]
pub struct Notifier {
    store: Arc<dyn DocumentStore>,
}

impl Notifier {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn send(
        &self,
        user_id: &str,
        kind: NotificationType,
        message: impl Into<String>,
        data: Option<NotificationData>,
    ) -> Option<Notification> {
        let notification = Notification::new(user_id, kind, message, data);
        match self
            .store
            .write(collections::NOTIFICATIONS, &notification.id, &notification)
            .await
        {
            Ok(()) => {
                debug!(user_id, kind = ?kind, "Notification sent");
                Some(notification)
            }
            Err(e) => {
                warn!(user_id, kind = ?kind, error = %e, "Failed to write notification");
                None
            }
        }
    }

    /// Newest first
    pub async fn list_for(&self, user_id: &str) -> ParkingResult<Vec<Notification>> {
        let mut notifications: Vec<Notification> = self
            .store
            .list(collections::NOTIFICATIONS, &Filter::all().eq("userId", user_id))
            .await?;
        notifications.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(notifications)
    }

    /// Mark the given notifications (or all of them when `ids` is `None`) as read
    pub async fn mark_read(&self, user_id: &str, ids: Option<&[String]>) -> ParkingResult<usize> {
        let unread: Vec<Notification> = self
            .store
            .list(
                collections::NOTIFICATIONS,
                &Filter::all().eq("userId", user_id).eq("isRead", false),
            )
            .await?;

        let mut marked = 0;
        for notification in unread {
            if ids.is_some_and(|ids| !ids.contains(&notification.id)) {
                continue;
            }
            self.store
                .update(collections::NOTIFICATIONS, &notification.id, json!({ "isRead": true }))
                .await?;
            marked += 1;
        }
        Ok(marked)
    }
}
