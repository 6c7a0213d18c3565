// =============================================================================
// Deposit review — submission, approval, rejection
// =============================================================================
//
// Approval flips the record pending -> approved under the same state-checked
// guard the balance credit runs behind; a credit failure leaves the record
// pending.
// =============================================================================

use tracing::info;

use crate::balance::BalanceService;
use crate::error::{AppError, AppResult};
use crate::model::{DepositRequest, ReviewStatus};
use crate::notify::NotificationService;
use crate::store::Store;

#[derive(Clone)]
pub struct DepositService {
    store: Store,
    balance: BalanceService,
    notifier: NotificationService,
}

impl DepositService {
    pub fn new(store: Store, balance: BalanceService, notifier: NotificationService) -> Self {
        Self {
            store,
            balance,
            notifier,
        }
    }

    pub async fn submit(
        &self,
        user_id: i64,
        amount: f64,
        method: &str,
        voucher_url: &str,
        note: &str,
    ) -> AppResult<DepositRequest> {
        if amount <= 0.0 {
            return Err(AppError::BadInput("amount must be positive".into()));
        }
        let request = self
            .store
            .insert_deposit_request(user_id, amount, method, voucher_url, note)
            .await?;
        info!(user_id, amount, id = request.id, "deposit request submitted");
        Ok(request)
    }

    /// Approve: the state transition and the balance credit share one
    /// transaction, so a credit failure leaves the record pending.
    pub async fn approve(
        &self,
        deposit_id: i64,
        reviewer_id: i64,
        note: &str,
        receipt_voucher_url: &str,
    ) -> AppResult<DepositRequest> {
        let request = self.load(deposit_id).await?;
        if !request.is_pending() {
            return Err(AppError::InvalidState(format!(
                "deposit request is {}, not pending",
                request.status
            )));
        }

        let mut tx = self.store.begin().await?;
        if !self
            .store
            .review_deposit_tx(
                &mut tx,
                deposit_id,
                ReviewStatus::Approved,
                reviewer_id,
                note,
                receipt_voucher_url,
            )
            .await?
        {
            return Err(AppError::InvalidState("deposit request is no longer pending".into()));
        }
        let snapshot = self
            .balance
            .credit_deposit_in(
                &mut tx,
                request.user_id,
                request.amount,
                request.id,
                &format!("充值审核通过: {}", request.method),
            )
            .await?;
        tx.commit().await?;

        self.notifier
            .send_fund_notification(
                request.user_id,
                "充值成功",
                &format!(
                    "您的充值申请已审核通过\n充值金额：{:.2} 元\n当前可用定金：{:.2} 元",
                    request.amount, snapshot.available
                ),
            )
            .await;

        info!(id = deposit_id, reviewer_id, amount = request.amount, "deposit approved");
        self.load(deposit_id).await
    }

    pub async fn reject(
        &self,
        deposit_id: i64,
        reviewer_id: i64,
        note: &str,
    ) -> AppResult<DepositRequest> {
        let request = self.load(deposit_id).await?;
        if !request.is_pending() {
            return Err(AppError::InvalidState(format!(
                "deposit request is {}, not pending",
                request.status
            )));
        }

        let mut tx = self.store.begin().await?;
        if !self
            .store
            .review_deposit_tx(&mut tx, deposit_id, ReviewStatus::Rejected, reviewer_id, note, "")
            .await?
        {
            return Err(AppError::InvalidState("deposit request is no longer pending".into()));
        }
        tx.commit().await?;

        self.notifier
            .send_fund_notification(
                request.user_id,
                "充值驳回",
                &format!("您的充值申请已被驳回\n驳回原因：{note}"),
            )
            .await;

        info!(id = deposit_id, reviewer_id, "deposit rejected");
        self.load(deposit_id).await
    }

    pub async fn list_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<DepositRequest>> {
        Ok(self.store.find_deposits_by_user(user_id, limit, offset).await?)
    }

    pub async fn list_by_status(
        &self,
        status: ReviewStatus,
        limit: i64,
    ) -> AppResult<Vec<DepositRequest>> {
        Ok(self.store.find_deposits_by_status(status, limit).await?)
    }

    async fn load(&self, id: i64) -> AppResult<DepositRequest> {
        self.store
            .find_deposit_request(id)
            .await?
            .ok_or_else(|| AppError::NotFound("deposit request not found".into()))
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

    async fn setup() -> (Store, DepositService, i64) {
        let store = memory_store().await;
        let balance = BalanceService::new(store.clone());
        let notifier = NotificationService::new(store.clone(), None);
        let svc = DepositService::new(store.clone(), balance, notifier);
        let user = store.create_user("700", Role::Customer).await.unwrap();
        (store, svc, user.id)
    }

    #[tokio::test]
    async fn approve_credits_available() {
        let (store, svc, uid) = setup().await;
        let request = svc.submit(uid, 5000.0, "bank", "", "").await.unwrap();
        assert_eq!(request.status, ReviewStatus::Pending);

        let approved = svc.approve(request.id, 1, "ok", "receipt.png").await.unwrap();
        assert_eq!(approved.status, ReviewStatus::Approved);
        assert_eq!(approved.receipt_voucher_url, "receipt.png");

        let user = store.find_user(uid).await.unwrap().unwrap();
        assert_eq!(user.available_deposit, 5000.0);
    }

    #[tokio::test]
    async fn reject_leaves_balance_unchanged() {
        let (store, svc, uid) = setup().await;
        let request = svc.submit(uid, 5000.0, "bank", "", "").await.unwrap();

        let rejected = svc.reject(request.id, 1, "bad voucher").await.unwrap();
        assert_eq!(rejected.status, ReviewStatus::Rejected);

        let user = store.find_user(uid).await.unwrap().unwrap();
        assert_eq!(user.available_deposit, 0.0);
        assert!(store.find_fund_logs_by_user(uid, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn double_review_fails_with_invalid_state() {
        let (_store, svc, uid) = setup().await;
        let request = svc.submit(uid, 100.0, "bank", "", "").await.unwrap();

        svc.approve(request.id, 1, "", "").await.unwrap();
        let err = svc.approve(request.id, 1, "", "").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        let err = svc.reject(request.id, 1, "").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn zero_amount_is_bad_input() {
        let (_store, svc, uid) = setup().await;
        let err = svc.submit(uid, 0.0, "bank", "", "").await.unwrap_err();
        assert!(matches!(err, AppError::BadInput(_)));
    }
}
