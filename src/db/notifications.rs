//! Delivery into the host's `notifications` table.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::notify::{Notification, Notifier};

#[async_trait]
impl Notifier for super::Db {
    /// Insert an unread row typed by the kind's level.
    async fn notify(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications (id, user_id, title, message, type, read, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, false, now(), now())",
        )
        .bind(uuid::Uuid::new_v4())
        .bind(notification.user_id.0)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.kind.level())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::NotificationDeliveryFailed(e.to_string()))?;
        Ok(())
    }
}
