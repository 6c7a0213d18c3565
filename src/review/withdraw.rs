// =============================================================================
// Withdrawal review — submission, approval, rejection, mark-paid
// =============================================================================
//
// Availability is validated at submission and re-checked inside the approval
// transaction. An approved withdrawal later transitions to paid when the
// operator uploads the transfer voucher.
// =============================================================================

use tracing::info;

use crate::balance::BalanceService;
use crate::error::{AppError, AppResult};
use crate::model::{ReviewStatus, WithdrawRequest};
use crate::notify::NotificationService;
use crate::store::Store;

#[derive(Clone)]
pub struct WithdrawService {
    store: Store,
    balance: BalanceService,
    notifier: NotificationService,
}

impl WithdrawService {
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
        note: &str,
    ) -> AppResult<WithdrawRequest> {
        if amount <= 0.0 {
            return Err(AppError::BadInput("amount must be positive".into()));
        }

        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".into()))?;
        if user.available_deposit < amount {
            return Err(AppError::BalanceUnderflow {
                available: user.available_deposit,
                required: amount,
            });
        }

        // Fee schedule currently flat zero.
        let request = self
            .store
            .insert_withdraw_request(user_id, amount, 0.0, method, note)
            .await?;
        info!(user_id, amount, id = request.id, "withdraw request submitted");
        Ok(request)
    }

    /// Approve: state transition and balance debit share one transaction;
    /// the availability re-check happens inside the debit.
    pub async fn approve(
        &self,
        withdraw_id: i64,
        reviewer_id: i64,
        note: &str,
    ) -> AppResult<WithdrawRequest> {
        let request = self.load(withdraw_id).await?;
        if !request.is_pending() {
            return Err(AppError::InvalidState(format!(
                "withdraw request is {}, not pending",
                request.status
            )));
        }

        let mut tx = self.store.begin().await?;
        if !self
            .store
            .review_withdraw_tx(&mut tx, withdraw_id, ReviewStatus::Approved, reviewer_id, note)
            .await?
        {
            return Err(AppError::InvalidState("withdraw request is no longer pending".into()));
        }
        self.balance
            .debit_withdraw_in(
                &mut tx,
                request.user_id,
                request.amount,
                request.id,
                &format!("提现: {:.2}元", request.amount),
            )
            .await?;
        tx.commit().await?;

        self.notifier
            .send_fund_notification(
                request.user_id,
                "提现通过",
                &format!(
                    "您的提现申请已通过\n提现金额：{:.2} 元\n预计到账：{:.2} 元",
                    request.amount, request.actual_amount
                ),
            )
            .await;

        info!(id = withdraw_id, reviewer_id, amount = request.amount, "withdraw approved");
        self.load(withdraw_id).await
    }

    pub async fn reject(
        &self,
        withdraw_id: i64,
        reviewer_id: i64,
        note: &str,
    ) -> AppResult<WithdrawRequest> {
        let request = self.load(withdraw_id).await?;
        if !request.is_pending() {
            return Err(AppError::InvalidState(format!(
                "withdraw request is {}, not pending",
                request.status
            )));
        }

        let mut tx = self.store.begin().await?;
        if !self
            .store
            .review_withdraw_tx(&mut tx, withdraw_id, ReviewStatus::Rejected, reviewer_id, note)
            .await?
        {
            return Err(AppError::InvalidState("withdraw request is no longer pending".into()));
        }
        tx.commit().await?;

        self.notifier
            .send_fund_notification(
                request.user_id,
                "提现驳回",
                &format!("您的提现申请已被驳回\n驳回原因：{note}"),
            )
            .await;

        info!(id = withdraw_id, reviewer_id, "withdraw rejected");
        self.load(withdraw_id).await
    }

    /// Approved -> paid, storing the transfer voucher.
    pub async fn mark_paid(&self, withdraw_id: i64, voucher_url: &str) -> AppResult<WithdrawRequest> {
        let request = self.load(withdraw_id).await?;
        if !request.is_approved() {
            return Err(AppError::InvalidState(format!(
                "withdraw request is {}, not approved",
                request.status
            )));
        }

        if !self.store.mark_withdraw_paid(withdraw_id, voucher_url).await? {
            return Err(AppError::InvalidState("withdraw request is no longer approved".into()));
        }

        self.notifier
            .send_fund_notification(
                request.user_id,
                "提现已打款",
                &format!("您的提现已打款\n提现金额：{:.2} 元", request.amount),
            )
            .await;

        info!(id = withdraw_id, "withdraw marked paid");
        self.load(withdraw_id).await
    }

    pub async fn list_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<WithdrawRequest>> {
        Ok(self.store.find_withdraws_by_user(user_id, limit, offset).await?)
    }

    pub async fn list_by_status(
        &self,
        status: ReviewStatus,
        limit: i64,
    ) -> AppResult<Vec<WithdrawRequest>> {
        Ok(self.store.find_withdraws_by_status(status, limit).await?)
    }

    async fn load(&self, id: i64) -> AppResult<WithdrawRequest> {
        self.store
            .find_withdraw_request(id)
            .await?
            .ok_or_else(|| AppError::NotFound("withdraw request not found".into()))
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

    async fn setup(funding: f64) -> (Store, WithdrawService, i64) {
        let store = memory_store().await;
        let balance = BalanceService::new(store.clone());
        let notifier = NotificationService::new(store.clone(), None);
        let svc = WithdrawService::new(store.clone(), balance.clone(), notifier);
        let user = store.create_user("800", Role::Customer).await.unwrap();
        if funding > 0.0 {
            balance.credit_deposit(user.id, funding, 0, "").await.unwrap();
        }
        (store, svc, user.id)
    }

    #[tokio::test]
    async fn full_lifecycle_submit_approve_paid() {
        let (store, svc, uid) = setup(5000.0).await;

        let request = svc.submit(uid, 2000.0, "bank", "").await.unwrap();
        assert_eq!(request.status, ReviewStatus::Pending);
        assert_eq!(request.actual_amount, 2000.0);

        let approved = svc.approve(request.id, 9, "ok").await.unwrap();
        assert_eq!(approved.status, ReviewStatus::Approved);
        let user = store.find_user(uid).await.unwrap().unwrap();
        assert_eq!(user.available_deposit, 3000.0);

        let paid = svc.mark_paid(request.id, "transfer.png").await.unwrap();
        assert_eq!(paid.status, ReviewStatus::Paid);
        assert_eq!(paid.payment_voucher_url, "transfer.png");
    }

    #[tokio::test]
    async fn submit_beyond_available_is_rejected() {
        let (_store, svc, uid) = setup(100.0).await;
        let err = svc.submit(uid, 100.01, "bank", "").await.unwrap_err();
        assert!(matches!(err, AppError::BalanceUnderflow { .. }));
    }

    #[tokio::test]
    async fn approve_failure_keeps_record_pending() {
        let (store, svc, uid) = setup(2000.0).await;
        let request = svc.submit(uid, 2000.0, "bank", "").await.unwrap();

        // Balance drained between submission and review.
        let balance = BalanceService::new(store.clone());
        balance.debit_withdraw(uid, 1500.0, 0, "out of band").await.unwrap();

        let err = svc.approve(request.id, 9, "").await.unwrap_err();
        assert!(matches!(err, AppError::BalanceUnderflow { .. }));

        // Rollback left the record pending and the balance untouched.
        let reloaded = store.find_withdraw_request(request.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, ReviewStatus::Pending);
        let user = store.find_user(uid).await.unwrap().unwrap();
        assert_eq!(user.available_deposit, 500.0);
    }

    #[tokio::test]
    async fn mark_paid_requires_approved_state() {
        let (_store, svc, uid) = setup(5000.0).await;
        let request = svc.submit(uid, 1000.0, "bank", "").await.unwrap();

        let err = svc.mark_paid(request.id, "v").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        svc.reject(request.id, 9, "no").await.unwrap();
        let err = svc.mark_paid(request.id, "v").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }
}
