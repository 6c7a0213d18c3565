// =============================================================================
// Balance Service — transactional mutation of the (available, used) pair
// =============================================================================
//
// Every operation runs under a single database transaction; a rollback leaves
// the balances and the fund-log journal unchanged. Every successful mutation
// writes exactly one FundLog whose before/after snapshots bracket the
// transition. All stored amounts are rounded to two decimals.
//
// The user balance row is the one contended resource in the system; request
// handlers and the risk engine all funnel through these six operations, and
// the database transaction provides isolation.
// =============================================================================

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::model::{round2, FundLog, FundLogType, Position, PositionStatus, User};
use crate::store::Store;

/// Post-transaction balance state returned to callers so clients need not
/// re-query.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BalanceSnapshot {
    pub available: f64,
    pub used: f64,
}

#[derive(Clone)]
pub struct BalanceService {
    store: Store,
}

impl BalanceService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    // -------------------------------------------------------------------------
    // Deposits / withdrawals
    // -------------------------------------------------------------------------

    /// Credit a review-approved deposit: `(U, V) -> (U + a, V)`.
    pub async fn credit_deposit(
        &self,
        user_id: i64,
        amount: f64,
        related_id: i64,
        note: &str,
    ) -> AppResult<BalanceSnapshot> {
        let mut tx = self.store.begin().await?;
        let snapshot = self
            .credit_deposit_in(&mut tx, user_id, amount, related_id, note)
            .await?;
        tx.commit().await?;
        Ok(snapshot)
    }

    /// Credit within a caller-owned transaction, so a review approval and
    /// its balance effect commit or roll back together.
    pub async fn credit_deposit_in(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Any>,
        user_id: i64,
        amount: f64,
        related_id: i64,
        note: &str,
    ) -> AppResult<BalanceSnapshot> {
        if amount <= 0.0 {
            return Err(AppError::BadInput("amount must be positive".into()));
        }

        let user = self.load_user(tx, user_id).await?;
        let available = round2(user.available_deposit + amount);
        self.store
            .update_balances_tx(tx, user_id, available, user.used_deposit)
            .await?;
        self.write_log(
            tx,
            &user,
            FundLogType::Deposit,
            amount,
            available,
            user.used_deposit,
            related_id,
            "deposit",
            note,
        )
        .await?;

        info!(user_id, amount, available, "deposit credited");
        Ok(BalanceSnapshot {
            available,
            used: user.used_deposit,
        })
    }

    /// Debit a review-approved withdrawal: `(U, V) -> (U - a, V)`, requires
    /// `U >= a`.
    pub async fn debit_withdraw(
        &self,
        user_id: i64,
        amount: f64,
        related_id: i64,
        note: &str,
    ) -> AppResult<BalanceSnapshot> {
        let mut tx = self.store.begin().await?;
        let snapshot = self
            .debit_withdraw_in(&mut tx, user_id, amount, related_id, note)
            .await?;
        tx.commit().await?;
        Ok(snapshot)
    }

    /// Debit within a caller-owned transaction.
    pub async fn debit_withdraw_in(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Any>,
        user_id: i64,
        amount: f64,
        related_id: i64,
        note: &str,
    ) -> AppResult<BalanceSnapshot> {
        if amount <= 0.0 {
            return Err(AppError::BadInput("amount must be positive".into()));
        }

        let user = self.load_user(tx, user_id).await?;
        if user.available_deposit < amount {
            return Err(AppError::BalanceUnderflow {
                available: user.available_deposit,
                required: amount,
            });
        }

        let available = round2(user.available_deposit - amount);
        self.store
            .update_balances_tx(tx, user_id, available, user.used_deposit)
            .await?;
        self.write_log(
            tx,
            &user,
            FundLogType::Withdraw,
            -amount,
            available,
            user.used_deposit,
            related_id,
            "withdraw",
            note,
        )
        .await?;

        info!(user_id, amount, available, "withdrawal debited");
        Ok(BalanceSnapshot {
            available,
            used: user.used_deposit,
        })
    }

    // -------------------------------------------------------------------------
    // Position open (freeze)
    // -------------------------------------------------------------------------

    /// Freeze the position deposit: `(U, V) -> (U - d, V + d)` and persist
    /// the new position row. The draft must carry `deposit > 0`.
    pub async fn open_position(&self, user_id: i64, draft: Position) -> AppResult<Position> {
        let deposit = draft.deposit;
        if deposit <= 0.0 {
            return Err(AppError::BadInput("deposit must be positive".into()));
        }

        let mut tx = self.store.begin().await?;
        let user = self.load_user(&mut tx, user_id).await?;

        if user.available_deposit < deposit {
            return Err(AppError::BalanceUnderflow {
                available: user.available_deposit,
                required: deposit,
            });
        }

        let available = round2(user.available_deposit - deposit);
        let used = round2(user.used_deposit + deposit);
        self.store
            .update_balances_tx(&mut tx, user_id, available, used)
            .await?;

        let mut position = draft;
        position.user_id = user_id;
        let id = self.store.insert_position_tx(&mut tx, &position).await?;
        position.id = id;

        self.write_log(
            &mut tx,
            &user,
            FundLogType::OrderFreeze,
            -deposit,
            available,
            used,
            id,
            "position",
            &format!("open position {} deposit {:.2}", position.order_id, deposit),
        )
        .await?;
        tx.commit().await?;

        info!(
            user_id,
            order_id = %position.order_id,
            deposit,
            available,
            used,
            "position opened"
        );
        Ok(position)
    }

    // -------------------------------------------------------------------------
    // Settle / force-close (release + PnL)
    // -------------------------------------------------------------------------

    /// Customer cash settlement at `price`:
    /// `(U, V) -> (U + d + pnl, V - d)`. Fails with BalanceUnderflow when the
    /// resulting available would go negative.
    pub async fn settle_position(
        &self,
        user_id: i64,
        position_id: i64,
        price: f64,
    ) -> AppResult<(Position, BalanceSnapshot)> {
        self.release_position(user_id, position_id, price, PositionStatus::Settled)
            .await
    }

    /// Engine force-close at `price`. Same cash flow as settle; the caller
    /// (risk pass) treats BalanceUnderflow as skip-and-log.
    pub async fn force_close_position(
        &self,
        user_id: i64,
        position_id: i64,
        price: f64,
    ) -> AppResult<(Position, BalanceSnapshot)> {
        self.release_position(user_id, position_id, price, PositionStatus::Closed)
            .await
    }

    async fn release_position(
        &self,
        user_id: i64,
        position_id: i64,
        price: f64,
        terminal: PositionStatus,
    ) -> AppResult<(Position, BalanceSnapshot)> {
        if price <= 0.0 {
            return Err(AppError::BadInput("settle price must be positive".into()));
        }

        let mut tx = self.store.begin().await?;
        let user = self.load_user(&mut tx, user_id).await?;
        let mut position = self
            .store
            .find_position_tx(&mut tx, position_id)
            .await?
            .ok_or_else(|| AppError::NotFound("position not found".into()))?;

        if position.user_id != user_id {
            return Err(AppError::PermissionDenied("position owned by another user".into()));
        }
        if !position.can_settle() {
            return Err(AppError::InvalidState(format!(
                "position is {}, not holding",
                position.status
            )));
        }

        let pnl = round2(position.pnl_at(price));
        let available = round2(user.available_deposit + position.deposit + pnl);
        let used = round2(user.used_deposit - position.deposit);

        if available < 0.0 {
            return Err(AppError::BalanceUnderflow {
                available: user.available_deposit,
                required: -(position.deposit + pnl),
            });
        }

        match terminal {
            PositionStatus::Settled => position.settle(price),
            _ => position.force_close(price),
        }

        // The state-check in the UPDATE resolves concurrent settle /
        // force-close of the same position: exactly one transition wins.
        if !self.store.finalize_position_tx(&mut tx, &position).await? {
            return Err(AppError::InvalidState("position is no longer holding".into()));
        }

        self.store
            .update_balances_tx(&mut tx, user_id, available, used)
            .await?;

        let (log_type, verb) = match terminal {
            PositionStatus::Settled => (FundLogType::Settle, "settle"),
            _ => (FundLogType::ForceClose, "force close"),
        };
        self.write_log(
            &mut tx,
            &user,
            log_type,
            round2(position.deposit + pnl),
            available,
            used,
            position.id,
            "position",
            &format!(
                "{verb} position {} at {:.2}, pnl {:.2}",
                position.order_id, price, pnl
            ),
        )
        .await?;
        tx.commit().await?;

        info!(
            user_id,
            order_id = %position.order_id,
            price,
            pnl,
            available,
            used,
            status = %position.status,
            "position released"
        );
        Ok((position, BalanceSnapshot { available, used }))
    }

    // -------------------------------------------------------------------------
    // Supplement
    // -------------------------------------------------------------------------

    /// Move `amount` from available to used and grow the position deposit:
    /// `(U, V) -> (U - a, V + a)`. Writes the supplement record inside the
    /// same transaction (the synchronous review flavor).
    pub async fn supplement(
        &self,
        user_id: i64,
        position_id: i64,
        amount: f64,
        method: &str,
    ) -> AppResult<(Position, BalanceSnapshot)> {
        if amount <= 0.0 {
            return Err(AppError::BadInput("amount must be positive".into()));
        }

        let mut tx = self.store.begin().await?;
        let user = self.load_user(&mut tx, user_id).await?;
        let mut position = self
            .store
            .find_position_tx(&mut tx, position_id)
            .await?
            .ok_or_else(|| AppError::NotFound("position not found".into()))?;

        if position.user_id != user_id {
            return Err(AppError::PermissionDenied("position owned by another user".into()));
        }
        if position.status != PositionStatus::Holding {
            return Err(AppError::InvalidState(
                "only holding positions accept a supplement".into(),
            ));
        }
        if user.available_deposit < amount {
            return Err(AppError::BalanceUnderflow {
                available: user.available_deposit,
                required: amount,
            });
        }

        let available = round2(user.available_deposit - amount);
        let used = round2(user.used_deposit + amount);

        position.deposit = round2(position.deposit + amount);
        if position.current_price > 0.0 {
            position.update_mark(position.current_price);
        }

        if !self
            .store
            .add_position_deposit_tx(&mut tx, &position)
            .await?
        {
            return Err(AppError::InvalidState("position is no longer holding".into()));
        }
        self.store
            .update_balances_tx(&mut tx, user_id, available, used)
            .await?;
        self.store
            .insert_supplement_request_tx(&mut tx, user_id, position_id, amount, method)
            .await?;
        self.write_log(
            &mut tx,
            &user,
            FundLogType::Supplement,
            -amount,
            available,
            used,
            position.id,
            "position",
            &format!(
                "supplement {:.2} to position {}",
                amount, position.order_id
            ),
        )
        .await?;
        tx.commit().await?;

        info!(
            user_id,
            order_id = %position.order_id,
            amount,
            deposit = position.deposit,
            margin_rate = position.margin_rate,
            "position deposit supplemented"
        );
        Ok((position, BalanceSnapshot { available, used }))
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn load_user(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Any>,
        user_id: i64,
    ) -> AppResult<User> {
        self.store
            .find_user_tx(tx, user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".into()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_log(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Any>,
        user: &User,
        log_type: FundLogType,
        amount: f64,
        available_after: f64,
        used_after: f64,
        related_id: i64,
        related_type: &str,
        note: &str,
    ) -> AppResult<()> {
        let log = FundLog {
            id: 0,
            user_id: user.id,
            log_type,
            amount: round2(amount),
            available_before: user.available_deposit,
            available_after,
            used_before: user.used_deposit,
            used_after,
            related_id,
            related_type: related_type.to_string(),
            note: note.to_string(),
            created_at: Utc::now().timestamp(),
        };
        if let Err(e) = self.store.insert_fund_log_tx(tx, &log).await {
            warn!(user_id = user.id, error = %e, "fund log write failed, rolling back");
            return Err(e.into());
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, Side};
    use crate::store::testing::memory_store;
    use crate::trade::new_position_draft;

    async fn setup() -> (Store, BalanceService, i64) {
        let store = memory_store().await;
        let balance = BalanceService::new(store.clone());
        let user = store.create_user("13900000001", Role::Customer).await.unwrap();
        (store, balance, user.id)
    }

    #[tokio::test]
    async fn credit_then_equal_withdraw_is_identity() {
        let (store, balance, uid) = setup().await;

        balance.credit_deposit(uid, 5000.0, 0, "top up").await.unwrap();
        let snap = balance.debit_withdraw(uid, 5000.0, 0, "out").await.unwrap();
        assert_eq!(snap.available, 0.0);
        assert_eq!(snap.used, 0.0);

        let user = store.find_user(uid).await.unwrap().unwrap();
        assert_eq!(user.available_deposit, 0.0);

        // One log per mutation with matching before/after brackets.
        let logs = store.find_fund_logs_by_user(uid, 10, 0).await.unwrap();
        assert_eq!(logs.len(), 2);
        let withdraw = &logs[0];
        assert_eq!(withdraw.log_type, FundLogType::Withdraw);
        assert_eq!(withdraw.available_before, 5000.0);
        assert_eq!(withdraw.available_after, 0.0);
        let deposit = &logs[1];
        assert_eq!(deposit.log_type, FundLogType::Deposit);
        assert_eq!(deposit.available_before, 0.0);
        assert_eq!(deposit.available_after, 5000.0);
    }

    #[tokio::test]
    async fn withdraw_beyond_available_underflows() {
        let (store, balance, uid) = setup().await;
        balance.credit_deposit(uid, 100.0, 0, "").await.unwrap();

        let err = balance.debit_withdraw(uid, 100.01, 0, "").await.unwrap_err();
        assert!(matches!(err, AppError::BalanceUnderflow { .. }));

        // Rollback left balances and journal untouched.
        let user = store.find_user(uid).await.unwrap().unwrap();
        assert_eq!(user.available_deposit, 100.0);
        assert_eq!(store.find_fund_logs_by_user(uid, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_and_settle_long_full_cycle() {
        let (store, balance, uid) = setup().await;
        balance.credit_deposit(uid, 20000.0, 0, "").await.unwrap();

        let draft = new_position_draft(uid, Side::Long, 500.0, 100.0, 10000.0);
        let position = balance.open_position(uid, draft).await.unwrap();

        let user = store.find_user(uid).await.unwrap().unwrap();
        assert_eq!(user.available_deposit, 10000.0);
        assert_eq!(user.used_deposit, 10000.0);
        // margin against base_deposit = weight * 10 = 1000
        assert_eq!(position.margin_rate, 1000.0);

        let (settled, snap) = balance.settle_position(uid, position.id, 510.0).await.unwrap();
        assert_eq!(settled.status, PositionStatus::Settled);
        assert_eq!(settled.settled_pnl, Some(1000.0));
        assert_eq!(snap.available, 21000.0);
        assert_eq!(snap.used, 0.0);

        // used == sum of holding deposits (now zero).
        assert_eq!(store.sum_holding_deposit(uid).await.unwrap(), 0.0);

        let logs = store
            .find_fund_logs_by_type(uid, FundLogType::Settle)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].amount, 11000.0);
        assert_eq!(logs[0].available_before, 10000.0);
        assert_eq!(logs[0].available_after, 21000.0);
        assert_eq!(logs[0].used_before, 10000.0);
        assert_eq!(logs[0].used_after, 0.0);
    }

    #[tokio::test]
    async fn second_settle_fails_with_invalid_state() {
        let (_store, balance, uid) = setup().await;
        balance.credit_deposit(uid, 20000.0, 0, "").await.unwrap();
        let draft = new_position_draft(uid, Side::Long, 500.0, 100.0, 10000.0);
        let position = balance.open_position(uid, draft).await.unwrap();

        balance.settle_position(uid, position.id, 510.0).await.unwrap();
        let err = balance
            .settle_position(uid, position.id, 510.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn force_close_short_scenario() {
        let (store, balance, uid) = setup().await;
        balance.credit_deposit(uid, 20000.0, 0, "").await.unwrap();
        let draft = new_position_draft(uid, Side::Short, 500.0, 100.0, 10000.0);
        let position = balance.open_position(uid, draft).await.unwrap();

        // Price rises to 599.1: pnl = (500 - 599.1) * 100 = -9910
        let (closed, snap) = balance
            .force_close_position(uid, position.id, 599.1)
            .await
            .unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.settled_pnl, Some(-9910.0));
        assert_eq!(snap.available, 10090.0);
        assert_eq!(snap.used, 0.0);

        let logs = store
            .find_fund_logs_by_type(uid, FundLogType::ForceClose)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].amount, 90.0);
    }

    #[tokio::test]
    async fn release_underflow_rolls_back_everything() {
        let (store, balance, uid) = setup().await;
        balance.credit_deposit(uid, 10000.0, 0, "").await.unwrap();
        let draft = new_position_draft(uid, Side::Short, 500.0, 100.0, 10000.0);
        let position = balance.open_position(uid, draft).await.unwrap();

        // Loss of 10001 exceeds deposit + remaining available.
        let err = balance
            .force_close_position(uid, position.id, 600.01)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BalanceUnderflow { .. }));

        let reloaded = store.find_position(position.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, PositionStatus::Holding);
        let user = store.find_user(uid).await.unwrap().unwrap();
        assert_eq!(user.used_deposit, 10000.0);
    }

    #[tokio::test]
    async fn supplement_moves_available_to_used_and_grows_deposit() {
        let (store, balance, uid) = setup().await;
        balance.credit_deposit(uid, 20000.0, 0, "").await.unwrap();
        let draft = new_position_draft(uid, Side::Long, 500.0, 100.0, 10000.0);
        let position = balance.open_position(uid, draft).await.unwrap();

        let (updated, snap) = balance
            .supplement(uid, position.id, 2500.0, "manual")
            .await
            .unwrap();
        assert_eq!(updated.deposit, 12500.0);
        assert_eq!(snap.available, 7500.0);
        assert_eq!(snap.used, 12500.0);

        // used mirrors the sum of holding deposits.
        assert_eq!(store.sum_holding_deposit(uid).await.unwrap(), 12500.0);

        let logs = store
            .find_fund_logs_by_type(uid, FundLogType::Supplement)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].amount, -2500.0);

        let records = store.find_supplements_by_user(uid, 10, 0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].amount, 2500.0);
    }

    #[tokio::test]
    async fn supplement_rejects_terminal_position() {
        let (_store, balance, uid) = setup().await;
        balance.credit_deposit(uid, 20000.0, 0, "").await.unwrap();
        let draft = new_position_draft(uid, Side::Long, 500.0, 100.0, 10000.0);
        let position = balance.open_position(uid, draft).await.unwrap();
        balance.settle_position(uid, position.id, 500.0).await.unwrap();

        let err = balance
            .supplement(uid, position.id, 100.0, "manual")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }
}
