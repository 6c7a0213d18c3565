// =============================================================================
// Notification Service — persist first, then push, then mark sent
// =============================================================================
//
// The hub is optional: a service constructed without one persists
// notifications and skips the push entirely (they stay available for pull).
// Push failures never fail the calling operation.
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::AppResult;
use crate::model::{Notification, NotifyLevel, NotifyStatus, NotifyType};
use crate::notify::hub::NotificationHub;
use crate::store::Store;

#[derive(Clone)]
pub struct NotificationService {
    store: Store,
    hub: Option<Arc<NotificationHub>>,
}

impl NotificationService {
    pub fn new(store: Store, hub: Option<Arc<NotificationHub>>) -> Self {
        Self { store, hub }
    }

    // -------------------------------------------------------------------------
    // Send pipeline
    // -------------------------------------------------------------------------

    /// Persist with state `pending`, push to connected sinks, and flip to
    /// `sent` when at least one sink took the frame.
    pub async fn send(
        &self,
        user_id: i64,
        notify_type: NotifyType,
        level: NotifyLevel,
        title: &str,
        content: &str,
        related_id: i64,
        related_type: &str,
    ) -> AppResult<Notification> {
        let draft = Notification {
            id: 0,
            user_id,
            notify_type,
            level,
            title: title.to_string(),
            content: content.to_string(),
            related_id,
            related_type: related_type.to_string(),
            status: NotifyStatus::Pending,
            read_at: None,
            created_at: Utc::now().timestamp(),
        };
        let mut stored = self.store.insert_notification(&draft).await?;

        if let Some(hub) = &self.hub {
            let delivered = hub.send_to_user(user_id, &stored);
            if delivered > 0 {
                self.store
                    .update_notification_status(stored.id, NotifyStatus::Sent)
                    .await?;
                stored.status = NotifyStatus::Sent;
            }
        }

        info!(
            user_id,
            id = stored.id,
            notify_type = notify_type.as_str(),
            level = level.as_str(),
            status = stored.status.as_str(),
            title,
            "notification recorded"
        );
        Ok(stored)
    }

    /// Risk notification: warning by default, critical for force-close.
    pub async fn send_risk_notification(
        &self,
        user_id: i64,
        order_id: &str,
        message: &str,
        critical: bool,
    ) {
        let (level, title) = if critical {
            (NotifyLevel::Critical, "强制平仓通知")
        } else {
            (NotifyLevel::Warning, "风控预警")
        };
        let content = format!("订单号：{order_id}\n{message}");
        if let Err(e) = self
            .send(user_id, NotifyType::Risk, level, title, &content, 0, "position")
            .await
        {
            warn!(user_id, error = %e, "risk notification failed");
        }
    }

    pub async fn send_trade_notification(
        &self,
        user_id: i64,
        position_id: i64,
        title: &str,
        content: &str,
    ) {
        if let Err(e) = self
            .send(
                user_id,
                NotifyType::Trade,
                NotifyLevel::Info,
                title,
                content,
                position_id,
                "position",
            )
            .await
        {
            warn!(user_id, error = %e, "trade notification failed");
        }
    }

    pub async fn send_fund_notification(&self, user_id: i64, title: &str, content: &str) {
        if let Err(e) = self
            .send(user_id, NotifyType::Fund, NotifyLevel::Info, title, content, 0, "fund")
            .await
        {
            warn!(user_id, error = %e, "fund notification failed");
        }
    }

    /// Platform announcement: owner 0, broadcast to every connected viewer.
    pub async fn send_announcement(&self, title: &str, content: &str) -> AppResult<Notification> {
        self.send(
            0,
            NotifyType::Announce,
            NotifyLevel::Info,
            title,
            content,
            0,
            "",
        )
        .await
    }

    /// One notification per support / super-admin account. An empty admin
    /// set logs and succeeds.
    pub async fn send_system_notification_to_admins(
        &self,
        title: &str,
        content: &str,
        level: NotifyLevel,
    ) -> AppResult<usize> {
        let admins = self.store.find_admins().await?;
        if admins.is_empty() {
            info!(title, "no admin accounts to notify");
            return Ok(0);
        }
        let mut sent = 0;
        for admin in &admins {
            if self
                .send(admin.id, NotifyType::System, level, title, content, 0, "")
                .await
                .is_ok()
            {
                sent += 1;
            }
        }
        Ok(sent)
    }

    // -------------------------------------------------------------------------
    // Pull surface & read state (DB only, the bus is not involved)
    // -------------------------------------------------------------------------

    pub async fn list(&self, user_id: i64, limit: i64, offset: i64) -> AppResult<Vec<Notification>> {
        Ok(self.store.find_notifications(user_id, limit, offset).await?)
    }

    pub async fn unread(&self, user_id: i64) -> AppResult<Vec<Notification>> {
        Ok(self.store.find_unread_notifications(user_id).await?)
    }

    pub async fn unread_count(&self, user_id: i64) -> AppResult<i64> {
        Ok(self.store.count_unread_notifications(user_id).await?)
    }

    pub async fn mark_as_read(&self, user_id: i64, ids: &[i64]) -> AppResult<u64> {
        Ok(self.store.mark_notifications_read(ids, user_id).await?)
    }

    pub async fn mark_all_as_read(&self, user_id: i64) -> AppResult<u64> {
        Ok(self.store.mark_all_notifications_read(user_id).await?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::store::testing::memory_store;

    #[tokio::test]
    async fn offline_send_persists_pending() {
        let store = memory_store().await;
        let hub = Arc::new(NotificationHub::new());
        let svc = NotificationService::new(store.clone(), Some(hub));
        let user = store.create_user("300", Role::Customer).await.unwrap();

        let n = svc
            .send(user.id, NotifyType::Fund, NotifyLevel::Info, "t", "c", 0, "")
            .await
            .unwrap();
        // Nobody connected: the push is skipped and the row stays pending.
        assert_eq!(n.status, NotifyStatus::Pending);
        assert_eq!(svc.unread_count(user.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn online_send_marks_sent_and_delivers() {
        let store = memory_store().await;
        let hub = Arc::new(NotificationHub::new());
        let svc = NotificationService::new(store.clone(), Some(hub.clone()));
        let user = store.create_user("301", Role::Customer).await.unwrap();

        let (_sink, mut rx) = hub.register(user.id);
        let n = svc
            .send(user.id, NotifyType::Risk, NotifyLevel::Warning, "t", "c", 0, "")
            .await
            .unwrap();
        assert_eq!(n.status, NotifyStatus::Sent);
        assert_eq!(rx.recv().await.unwrap().title, "t");
    }

    #[tokio::test]
    async fn hubless_service_persists_only() {
        let store = memory_store().await;
        let svc = NotificationService::new(store.clone(), None);
        let user = store.create_user("302", Role::Customer).await.unwrap();

        let n = svc
            .send(user.id, NotifyType::System, NotifyLevel::Info, "t", "c", 0, "")
            .await
            .unwrap();
        assert_eq!(n.status, NotifyStatus::Pending);
    }

    #[tokio::test]
    async fn announcement_reaches_viewers_of_different_users() {
        let store = memory_store().await;
        let hub = Arc::new(NotificationHub::new());
        let svc = NotificationService::new(store.clone(), Some(hub.clone()));

        let (_a, mut rx_a) = hub.register(10);
        let (_b, mut rx_b) = hub.register(11);

        let n = svc.send_announcement("公告", "内容").await.unwrap();
        assert_eq!(n.user_id, 0);
        assert_eq!(n.notify_type, NotifyType::Announce);
        assert_eq!(rx_a.recv().await.unwrap().title, "公告");
        assert_eq!(rx_b.recv().await.unwrap().title, "公告");
        // Both viewers stay registered.
        assert_eq!(hub.online_user_count(), 2);
    }

    #[tokio::test]
    async fn admin_fanout_covers_each_admin_and_tolerates_none() {
        let store = memory_store().await;
        let svc = NotificationService::new(store.clone(), None);

        // No admins yet: succeeds with zero sent.
        assert_eq!(
            svc.send_system_notification_to_admins("t", "c", NotifyLevel::Warning)
                .await
                .unwrap(),
            0
        );

        store.create_user("310", Role::Customer).await.unwrap();
        let s = store.create_user("311", Role::Support).await.unwrap();
        let a = store.create_user("312", Role::SuperAdmin).await.unwrap();

        let sent = svc
            .send_system_notification_to_admins("t", "c", NotifyLevel::Warning)
            .await
            .unwrap();
        assert_eq!(sent, 2);
        assert_eq!(svc.unread_count(s.id).await.unwrap(), 1);
        assert_eq!(svc.unread_count(a.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mark_all_as_read_is_idempotent() {
        let store = memory_store().await;
        let svc = NotificationService::new(store.clone(), None);
        let user = store.create_user("320", Role::Customer).await.unwrap();

        for i in 0..3 {
            svc.send(
                user.id,
                NotifyType::Fund,
                NotifyLevel::Info,
                &format!("t{i}"),
                "c",
                0,
                "",
            )
            .await
            .unwrap();
        }

        assert_eq!(svc.mark_all_as_read(user.id).await.unwrap(), 3);
        assert_eq!(svc.unread_count(user.id).await.unwrap(), 0);
        // Second call changes nothing.
        assert_eq!(svc.mark_all_as_read(user.id).await.unwrap(), 0);
        assert_eq!(svc.unread_count(user.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn mark_as_read_is_scoped_to_owner() {
        let store = memory_store().await;
        let svc = NotificationService::new(store.clone(), None);
        let alice = store.create_user("330", Role::Customer).await.unwrap();
        let bob = store.create_user("331", Role::Customer).await.unwrap();

        let n = svc
            .send(alice.id, NotifyType::Fund, NotifyLevel::Info, "t", "c", 0, "")
            .await
            .unwrap();

        // Bob cannot read Alice's notification.
        assert_eq!(svc.mark_as_read(bob.id, &[n.id]).await.unwrap(), 0);
        assert_eq!(svc.mark_as_read(alice.id, &[n.id]).await.unwrap(), 1);
        assert_eq!(svc.unread_count(alice.id).await.unwrap(), 0);
    }
}
