// =============================================================================
// Risk Service — one full revaluation pass over every holding position
// =============================================================================
//
// Pass order: revalue and persist the mark, partition into force-close /
// high-risk / warning, force-close first, then attempt auto top-ups (a
// successful top-up suppresses that position's warning), then notify owners,
// and finally send one summary to the admin accounts.
//
// Failures on a single position are logged and never stop the pass.
// =============================================================================

use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::balance::BalanceService;
use crate::error::{AppError, AppResult};
use crate::model::{Position, RiskClass, RiskConfig};
use crate::notify::NotificationService;
use crate::risk::auto_supplement::AutoSupplementService;
use crate::store::Store;

/// Result of one classification sweep.
#[derive(Debug)]
pub struct RiskSweep {
    pub total: usize,
    pub force_close: Vec<Position>,
    pub high_risk: Vec<Position>,
    pub warning: Vec<Position>,
    pub price: f64,
    pub checked_at: i64,
}

/// Snapshot served by `GET /risk/statistics`.
#[derive(Debug, Serialize)]
pub struct RiskStatistics {
    pub total_positions: usize,
    pub force_close_count: usize,
    pub high_risk_count: usize,
    pub warning_count: usize,
    pub safe_count: usize,
    pub current_price: f64,
    pub check_time: i64,
}

#[derive(Clone)]
pub struct RiskService {
    store: Store,
    balance: BalanceService,
    notifier: NotificationService,
    auto: AutoSupplementService,
}

impl RiskService {
    pub fn new(store: Store, balance: BalanceService, notifier: NotificationService) -> Self {
        let auto = AutoSupplementService::new(store.clone(), balance.clone(), notifier.clone());
        Self {
            store,
            balance,
            notifier,
            auto,
        }
    }

    // -------------------------------------------------------------------------
    // Sweep
    // -------------------------------------------------------------------------

    /// Revalue every holding position at `price`, persist exactly the three
    /// mark fields, and partition by risk class.
    pub async fn sweep(&self, price: f64, cfg: &RiskConfig) -> AppResult<RiskSweep> {
        let positions = self.store.find_holding_positions().await?;

        let mut sweep = RiskSweep {
            total: positions.len(),
            force_close: Vec::new(),
            high_risk: Vec::new(),
            warning: Vec::new(),
            price,
            checked_at: Utc::now().timestamp(),
        };

        for mut position in positions {
            position.update_mark(price);
            if let Err(e) = self
                .store
                .update_position_mark(
                    position.id,
                    position.current_price,
                    position.pnl_float,
                    position.margin_rate,
                )
                .await
            {
                warn!(order_id = %position.order_id, error = %e, "mark persist failed, skipping position");
                continue;
            }

            match position.classify(cfg) {
                RiskClass::ForceClose => sweep.force_close.push(position),
                RiskClass::HighRisk => sweep.high_risk.push(position),
                RiskClass::Warning => sweep.warning.push(position),
                RiskClass::Safe => {}
            }
        }

        info!(
            price,
            total = sweep.total,
            force_close = sweep.force_close.len(),
            high_risk = sweep.high_risk.len(),
            warning = sweep.warning.len(),
            "risk sweep complete"
        );
        Ok(sweep)
    }

    // -------------------------------------------------------------------------
    // Full pass
    // -------------------------------------------------------------------------

    pub async fn run_check(&self, price: f64) -> AppResult<()> {
        let cfg = self.store.risk_config().await?;
        let sweep = self.sweep(price, &cfg).await?;

        // 1. Force-close, sequentially, in load order. A single failed
        //    position aborts only itself.
        for position in &sweep.force_close {
            match self
                .balance
                .force_close_position(position.user_id, position.id, price)
                .await
            {
                Ok((closed, snapshot)) => {
                    self.notifier
                        .send_risk_notification(
                            closed.user_id,
                            &closed.order_id,
                            &format!(
                                "您的订单已触发强制平仓\n平仓价格：{:.2} 元/克\n最终盈亏：{:.2} 元\n账户可用定金：{:.2} 元",
                                price,
                                closed.settled_pnl.unwrap_or_default(),
                                snapshot.available
                            ),
                            true,
                        )
                        .await;
                }
                Err(AppError::BalanceUnderflow { available, required }) => {
                    warn!(
                        order_id = %position.order_id,
                        available,
                        required,
                        "force-close would underflow available deposit, skipped"
                    );
                }
                Err(e) => {
                    warn!(order_id = %position.order_id, error = %e, "force-close failed");
                }
            }
        }

        // 2. Auto top-up for the remaining at-risk positions; success
        //    suppresses the warning below.
        let mut topped_up: HashSet<i64> = HashSet::new();
        for position in sweep.high_risk.iter().chain(sweep.warning.iter()) {
            if self.auto.check_and_top_up(position.id, &cfg).await {
                topped_up.insert(position.id);
            }
        }

        // 3. Warnings.
        for position in &sweep.high_risk {
            if topped_up.contains(&position.id) {
                continue;
            }
            self.notifier
                .send_risk_notification(
                    position.user_id,
                    &position.order_id,
                    &format!(
                        "定金率：{:.2}%（已进入高风险区间{}%~{}%）\n请及时补充定金或平仓止损",
                        position.margin_rate, cfg.high_risk_min, cfg.high_risk_max
                    ),
                    false,
                )
                .await;
        }
        for position in &sweep.warning {
            if topped_up.contains(&position.id) {
                continue;
            }
            self.notifier
                .send_risk_notification(
                    position.user_id,
                    &position.order_id,
                    &format!(
                        "定金率：{:.2}%（建议补充定金）\n当前价格：{:.2} 元/克\n浮动盈亏：{:.2} 元",
                        position.margin_rate, position.current_price, position.pnl_float
                    ),
                    false,
                )
                .await;
        }

        // 4. One summary for the admins whenever anything was flagged.
        let flagged = sweep.force_close.len() + sweep.high_risk.len() + sweep.warning.len();
        if flagged > 0 {
            let level = if sweep.force_close.len() + sweep.high_risk.len() > 0 {
                crate::model::NotifyLevel::Warning
            } else {
                crate::model::NotifyLevel::Info
            };
            let summary = format!(
                "风控检查完成：强平 {} 单，高风险 {} 单，预警 {} 单",
                sweep.force_close.len(),
                sweep.high_risk.len(),
                sweep.warning.len()
            );
            if let Err(e) = self
                .notifier
                .send_system_notification_to_admins("风控检查预警", &summary, level)
                .await
            {
                warn!(error = %e, "admin risk summary failed");
            }
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    pub async fn statistics(&self, price: f64) -> AppResult<RiskStatistics> {
        let cfg = self.store.risk_config().await?;
        let sweep = self.sweep(price, &cfg).await?;
        let flagged = sweep.force_close.len() + sweep.high_risk.len() + sweep.warning.len();
        Ok(RiskStatistics {
            total_positions: sweep.total,
            force_close_count: sweep.force_close.len(),
            high_risk_count: sweep.high_risk.len(),
            warning_count: sweep.warning.len(),
            safe_count: sweep.total - flagged,
            current_price: price,
            check_time: sweep.checked_at,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FundLogType, NotifyType, PositionStatus, Role, Side};
    use crate::risk::auto_supplement::required_supplement;
    use crate::store::testing::memory_store;
    use crate::trade::new_position_draft;

    struct Harness {
        store: Store,
        balance: BalanceService,
        risk: RiskService,
    }

    async fn harness() -> Harness {
        let store = memory_store().await;
        let balance = BalanceService::new(store.clone());
        let notifier = NotificationService::new(store.clone(), None);
        let risk = RiskService::new(store.clone(), balance.clone(), notifier);
        Harness {
            store,
            balance,
            risk,
        }
    }

    async fn open(h: &Harness, phone: &str, side: Side, deposit: f64, funding: f64) -> (i64, i64) {
        let user = h.store.create_user(phone, Role::Customer).await.unwrap();
        h.balance
            .credit_deposit(user.id, funding, 0, "")
            .await
            .unwrap();
        let draft = new_position_draft(user.id, side, 500.0, 100.0, deposit);
        let position = h.balance.open_position(user.id, draft).await.unwrap();
        (user.id, position.id)
    }

    #[tokio::test]
    async fn sweep_persists_mark_and_partitions() {
        let h = harness().await;
        // margin at price 500: (10000 + 0) / 1000 * 100 = 1000% -> safe
        let (_u1, safe_id) = open(&h, "500", Side::Long, 10000.0, 20000.0).await;
        // short hit hard at 599.1: margin 9% -> force close
        let (_u2, fc_id) = open(&h, "501", Side::Short, 10000.0, 20000.0).await;

        let cfg = h.store.risk_config().await.unwrap();
        let sweep = h.risk.sweep(599.1, &cfg).await.unwrap();
        assert_eq!(sweep.total, 2);
        assert_eq!(sweep.force_close.len(), 1);
        assert_eq!(sweep.force_close[0].id, fc_id);

        // Mark fields were persisted; status untouched by the sweep itself.
        let stored = h.store.find_position(fc_id).await.unwrap().unwrap();
        assert_eq!(stored.current_price, 599.1);
        assert_eq!(stored.pnl_float, -9910.0);
        assert_eq!(stored.margin_rate, 9.0);
        assert_eq!(stored.status, PositionStatus::Holding);

        let safe = h.store.find_position(safe_id).await.unwrap().unwrap();
        assert_eq!(safe.margin_rate, 1991.0); // (10000 + 9910) / 1000 * 100
    }

    #[tokio::test]
    async fn run_check_force_closes_and_notifies() {
        let h = harness().await;
        let admin = h.store.create_user("510", Role::Support).await.unwrap();
        let (uid, pid) = open(&h, "511", Side::Short, 10000.0, 20000.0).await;

        h.risk.run_check(599.1).await.unwrap();

        let closed = h.store.find_position(pid).await.unwrap().unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.settled_pnl, Some(-9910.0));

        let user = h.store.find_user(uid).await.unwrap().unwrap();
        assert_eq!(user.available_deposit, 10090.0);
        assert_eq!(user.used_deposit, 0.0);

        // Owner got the critical risk notification.
        let owner_notes = h.store.find_unread_notifications(uid).await.unwrap();
        assert!(owner_notes
            .iter()
            .any(|n| n.notify_type == NotifyType::Risk && n.title == "强制平仓通知"));

        // Admin got the warning-level summary.
        let admin_notes = h.store.find_unread_notifications(admin.id).await.unwrap();
        assert_eq!(admin_notes.len(), 1);
        assert_eq!(admin_notes[0].title, "风控检查预警");
        assert_eq!(admin_notes[0].level, crate::model::NotifyLevel::Warning);
    }

    #[tokio::test]
    async fn run_check_twice_at_same_price_is_stable() {
        let h = harness().await;
        let (_uid, pid) = open(&h, "520", Side::Long, 10000.0, 20000.0).await;

        h.risk.run_check(495.0).await.unwrap();
        let first = h.store.find_position(pid).await.unwrap().unwrap();
        h.risk.run_check(495.0).await.unwrap();
        let second = h.store.find_position(pid).await.unwrap().unwrap();

        assert_eq!(first.pnl_float, second.pnl_float);
        assert_eq!(first.margin_rate, second.margin_rate);
        assert_eq!(first.status, second.status);
    }

    #[tokio::test]
    async fn safe_margin_never_triggers_auto_supplement() {
        // Price 491 leaves the margin at 910%, far above the trigger, so no
        // supplement log may appear.
        let h = harness().await;
        let (uid, _pid) = open(&h, "530", Side::Long, 10000.0, 15000.0).await;
        h.store.set_auto_supplement(uid, true).await.unwrap();

        h.risk.run_check(491.0).await.unwrap();

        let logs = h
            .store
            .find_fund_logs_by_type(uid, FundLogType::Supplement)
            .await
            .unwrap();
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn low_margin_auto_supplement_tops_up_and_suppresses_warning() {
        let h = harness().await;
        // deposit 400 on 100g: margin at price 500 = 40% -> warning band.
        let (uid, pid) = open(&h, "540", Side::Long, 400.0, 20000.0).await;
        h.store.set_auto_supplement(uid, true).await.unwrap();

        h.risk.run_check(500.0).await.unwrap();

        let logs = h
            .store
            .find_fund_logs_by_type(uid, FundLogType::Supplement)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);

        let position = h.store.find_position(pid).await.unwrap().unwrap();
        assert!(position.deposit > 400.0);

        let notes = h.store.find_unread_notifications(uid).await.unwrap();
        // Success fund notification, and no warning for the topped-up position.
        assert!(notes.iter().any(|n| n.title == "自动补定金成功"));
        assert!(!notes.iter().any(|n| n.title == "风控预警"));
    }

    #[tokio::test]
    async fn one_fen_short_fails_with_insufficient_notice() {
        let h = harness().await;
        let user = h.store.create_user("550", Role::Customer).await.unwrap();
        let uid = user.id;

        // Work out the exact requirement, then fund one fen below it.
        let probe = new_position_draft(uid, Side::Long, 500.0, 100.0, 400.0);
        let required = required_supplement(&probe, 80.0);

        h.balance
            .credit_deposit(uid, 400.0 + required - 0.01, 0, "")
            .await
            .unwrap();
        let draft = new_position_draft(uid, Side::Long, 500.0, 100.0, 400.0);
        h.balance.open_position(uid, draft).await.unwrap();
        h.store.set_auto_supplement(uid, true).await.unwrap();

        h.risk.run_check(500.0).await.unwrap();

        let logs = h
            .store
            .find_fund_logs_by_type(uid, FundLogType::Supplement)
            .await
            .unwrap();
        assert!(logs.is_empty());

        let notes = h.store.find_unread_notifications(uid).await.unwrap();
        assert!(notes
            .iter()
            .any(|n| n.content.contains("自动补定金失败")));
    }

    #[tokio::test]
    async fn statistics_counts_partitions() {
        let h = harness().await;
        let (_u1, _p1) = open(&h, "560", Side::Short, 10000.0, 20000.0).await;
        let (_u2, _p2) = open(&h, "561", Side::Long, 10000.0, 20000.0).await;

        let stats = h.risk.statistics(599.1).await.unwrap();
        assert_eq!(stats.total_positions, 2);
        assert_eq!(stats.force_close_count, 1);
        assert_eq!(stats.safe_count, 1);
        assert_eq!(stats.current_price, 599.1);
    }
}
