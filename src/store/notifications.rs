// =============================================================================
// Notification repository
// =============================================================================

use chrono::Utc;
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::model::{Notification, NotifyLevel, NotifyStatus, NotifyType};
use crate::store::{bad_column, Store};

fn row_to_notification(row: &AnyRow) -> Result<Notification, sqlx::Error> {
    let notify_type: String = row.try_get("notify_type")?;
    let level: String = row.try_get("level")?;
    let status: String = row.try_get("status")?;
    Ok(Notification {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        notify_type: NotifyType::parse(&notify_type)
            .ok_or_else(|| bad_column("notify_type", &notify_type))?,
        level: NotifyLevel::parse(&level).ok_or_else(|| bad_column("level", &level))?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        related_id: row.try_get("related_id")?,
        related_type: row.try_get("related_type")?,
        status: NotifyStatus::parse(&status).ok_or_else(|| bad_column("status", &status))?,
        read_at: row.try_get("read_at")?,
        created_at: row.try_get("created_at")?,
    })
}

const SELECT_NOTIFICATION: &str = r#"
    SELECT id, user_id, notify_type, level, title, content, related_id,
           related_type, status, read_at, created_at
    FROM notifications
"#;

impl Store {
    /// Persist a new notification in `pending` state and return it.
    pub async fn insert_notification(
        &self,
        notification: &Notification,
    ) -> Result<Notification, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO notifications (user_id, notify_type, level, title, content,
                                       related_id, related_type, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(notification.user_id)
        .bind(notification.notify_type.as_str())
        .bind(notification.level.as_str())
        .bind(&notification.title)
        .bind(&notification.content)
        .bind(notification.related_id)
        .bind(&notification.related_type)
        .bind(notification.status.as_str())
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        let mut stored = notification.clone();
        stored.id = result.last_insert_id().unwrap_or_default();
        Ok(stored)
    }

    pub async fn update_notification_status(
        &self,
        id: i64,
        status: NotifyStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE notifications SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// A user's notifications plus platform announcements, newest first.
    pub async fn find_notifications(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{SELECT_NOTIFICATION} WHERE (user_id = ? OR user_id = 0) AND deleted_at IS NULL ORDER BY id DESC LIMIT ? OFFSET ?"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_notification).collect()
    }

    pub async fn find_unread_notifications(
        &self,
        user_id: i64,
    ) -> Result<Vec<Notification>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{SELECT_NOTIFICATION} WHERE user_id = ? AND status <> 'read' AND deleted_at IS NULL ORDER BY id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_notification).collect()
    }

    pub async fn count_unread_notifications(&self, user_id: i64) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM notifications WHERE user_id = ? AND status <> 'read' AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_get("n")
    }

    /// Mark specific notifications read, scoped to their owner.
    pub async fn mark_notifications_read(
        &self,
        ids: &[i64],
        user_id: i64,
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE notifications SET status = 'read', read_at = ? WHERE user_id = ? AND status <> 'read' AND id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(Utc::now().timestamp()).bind(user_id);
        for id in ids {
            query = query.bind(*id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Mark everything read for a user. Idempotent.
    pub async fn mark_all_notifications_read(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE notifications SET status = 'read', read_at = ? WHERE user_id = ? AND status <> 'read'",
        )
        .bind(Utc::now().timestamp())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
