// =============================================================================
// Supplement — synchronous position top-up
// =============================================================================
//
// No review step: the submission itself runs the whole move (availability
// check, available -> used, position deposit growth, fund log, record) in
// one transaction inside the Balance Service, then emits the fund
// notification.
// =============================================================================

use tracing::info;

use crate::balance::{BalanceService, BalanceSnapshot};
use crate::error::AppResult;
use crate::model::{Position, SupplementRequest};
use crate::notify::NotificationService;
use crate::store::Store;

#[derive(Clone)]
pub struct SupplementService {
    store: Store,
    balance: BalanceService,
    notifier: NotificationService,
}

impl SupplementService {
    pub fn new(store: Store, balance: BalanceService, notifier: NotificationService) -> Self {
        Self {
            store,
            balance,
            notifier,
        }
    }

    /// Submit and execute a manual supplement for a holding position.
    pub async fn submit(
        &self,
        user_id: i64,
        position_id: i64,
        amount: f64,
    ) -> AppResult<(Position, BalanceSnapshot)> {
        let old_deposit = self
            .store
            .find_position(position_id)
            .await?
            .map(|p| p.deposit)
            .unwrap_or_default();

        let (position, snapshot) = self
            .balance
            .supplement(user_id, position_id, amount, "manual")
            .await?;

        self.notifier
            .send_fund_notification(
                user_id,
                "补定金成功",
                &format!(
                    "订单号：{}\n补充金额：{:.2} 元\n订单定金：{:.2} → {:.2} 元\n定金率：{:.2}%",
                    position.order_id, amount, old_deposit, position.deposit, position.margin_rate
                ),
            )
            .await;

        info!(
            user_id,
            order_id = %position.order_id,
            amount,
            "manual supplement applied"
        );
        Ok((position, snapshot))
    }

    pub async fn list_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<SupplementRequest>> {
        Ok(self.store.find_supplements_by_user(user_id, limit, offset).await?)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::model::{ReviewStatus, Role, Side};
    use crate::store::testing::memory_store;
    use crate::trade::new_position_draft;

    async fn setup() -> (Store, BalanceService, SupplementService, i64, i64) {
        let store = memory_store().await;
        let balance = BalanceService::new(store.clone());
        let notifier = NotificationService::new(store.clone(), None);
        let svc = SupplementService::new(store.clone(), balance.clone(), notifier);

        let user = store.create_user("900", Role::Customer).await.unwrap();
        balance.credit_deposit(user.id, 20000.0, 0, "").await.unwrap();
        let draft = new_position_draft(user.id, Side::Long, 500.0, 100.0, 10000.0);
        let position = balance.open_position(user.id, draft).await.unwrap();
        (store, balance, svc, user.id, position.id)
    }

    #[tokio::test]
    async fn submission_executes_immediately() {
        let (store, _balance, svc, uid, pid) = setup().await;

        let (position, snapshot) = svc.submit(uid, pid, 1500.0).await.unwrap();
        assert_eq!(position.deposit, 11500.0);
        assert_eq!(snapshot.available, 8500.0);
        assert_eq!(snapshot.used, 11500.0);

        // Record written approved; no pending review stage exists.
        let records = store.find_supplements_by_user(uid, 10, 0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ReviewStatus::Approved);
        assert_eq!(records[0].method, "manual");
    }

    #[tokio::test]
    async fn insufficient_available_fails_atomically() {
        let (store, _balance, svc, uid, pid) = setup().await;

        let err = svc.submit(uid, pid, 10000.01).await.unwrap_err();
        assert!(matches!(err, AppError::BalanceUnderflow { .. }));

        let position = store.find_position(pid).await.unwrap().unwrap();
        assert_eq!(position.deposit, 10000.0);
        assert!(store.find_supplements_by_user(uid, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn foreign_position_is_denied() {
        let (store, balance, svc, _uid, pid) = setup().await;
        let other = store.create_user("901", Role::Customer).await.unwrap();
        balance.credit_deposit(other.id, 1000.0, 0, "").await.unwrap();

        let err = svc.submit(other.id, pid, 100.0).await.unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }
}
