// =============================================================================
// Auto top-up — raise a struggling position back towards the target margin
// =============================================================================
//
// Only runs for owners who opted in (`auto_supplement_enabled`, settable by
// support staff). The supplement amount is derived from the order value so
// that the resulting collateral gears the position to roughly the target
// rate; the actual balance move goes through the Balance Service like any
// manual supplement.
// =============================================================================

use tracing::{debug, info, warn};

use crate::balance::BalanceService;
use crate::model::{round2, Position, PositionStatus, RiskConfig};
use crate::notify::NotificationService;
use crate::store::Store;

/// Troy-ounce conversion used for the order-value gearing.
const GRAMS_PER_OUNCE: f64 = 31.1035;

/// Amount needed to lift `position` to approximately `target_rate` percent.
///
/// `order_value = weight_g / 31.1035 * current_price`; with
/// `t = target_rate / 100`, the target collateral is
/// `order_value * t / (1 - t)` and the supplement is the gap to it.
/// Returns 0 when the position already carries enough.
pub fn required_supplement(position: &Position, target_rate: f64) -> f64 {
    let t = target_rate / 100.0;
    if t <= 0.0 || t >= 1.0 || position.current_price <= 0.0 {
        return 0.0;
    }
    let order_value = position.weight_g / GRAMS_PER_OUNCE * position.current_price;
    let target_deposit = order_value * t / (1.0 - t);
    let gap = round2(target_deposit - position.deposit);
    gap.max(0.0)
}

#[derive(Clone)]
pub struct AutoSupplementService {
    store: Store,
    balance: BalanceService,
    notifier: NotificationService,
}

impl AutoSupplementService {
    pub fn new(store: Store, balance: BalanceService, notifier: NotificationService) -> Self {
        Self {
            store,
            balance,
            notifier,
        }
    }

    /// Attempt an automatic top-up for one position. Returns true when a
    /// supplement was applied (the caller then suppresses the warning).
    pub async fn check_and_top_up(&self, position_id: i64, cfg: &RiskConfig) -> bool {
        let position = match self.store.find_position(position_id).await {
            Ok(Some(p)) => p,
            Ok(None) => return false,
            Err(e) => {
                warn!(position_id, error = %e, "auto top-up position load failed");
                return false;
            }
        };
        if position.status != PositionStatus::Holding {
            return false;
        }

        let user = match self.store.find_user(position.user_id).await {
            Ok(Some(u)) => u,
            Ok(None) => return false,
            Err(e) => {
                warn!(position_id, error = %e, "auto top-up owner load failed");
                return false;
            }
        };
        if !user.auto_supplement_enabled {
            return false;
        }

        if position.margin_rate >= cfg.auto_supplement_trigger {
            return false;
        }

        let amount = required_supplement(&position, cfg.auto_supplement_target);
        if amount <= 0.0 {
            return false;
        }

        if user.available_deposit < amount {
            debug!(
                user_id = user.id,
                order_id = %position.order_id,
                required = amount,
                available = user.available_deposit,
                "auto top-up: insufficient available deposit"
            );
            self.notifier
                .send_risk_notification(
                    user.id,
                    &position.order_id,
                    &format!(
                        "自动补定金失败\n需要金额：{:.2} 元\n可用定金：{:.2} 元\n请及时充值以保护订单安全",
                        amount, user.available_deposit
                    ),
                    false,
                )
                .await;
            return false;
        }

        let old_rate = position.margin_rate;
        match self
            .balance
            .supplement(user.id, position.id, amount, "auto")
            .await
        {
            Ok((updated, _snapshot)) => {
                info!(
                    user_id = user.id,
                    order_id = %updated.order_id,
                    amount,
                    old_rate,
                    new_rate = updated.margin_rate,
                    "auto top-up applied"
                );
                self.notifier
                    .send_fund_notification(
                        user.id,
                        "自动补定金成功",
                        &format!(
                            "订单号：{}\n补充金额：{:.2} 元\n定金率：{:.2}% → {:.2}%\n订单风险已降低",
                            updated.order_id, amount, old_rate, updated.margin_rate
                        ),
                    )
                    .await;
                true
            }
            Err(e) => {
                warn!(
                    user_id = user.id,
                    order_id = %position.order_id,
                    error = %e,
                    "auto top-up failed"
                );
                false
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PositionStatus, Side};

    fn position(deposit: f64, current_price: f64) -> Position {
        Position {
            id: 1,
            order_id: "x".into(),
            user_id: 1,
            side: Side::Long,
            locked_price: 500.0,
            current_price,
            weight_g: 100.0,
            deposit,
            pnl_float: 0.0,
            margin_rate: 0.0,
            status: PositionStatus::Holding,
            settled_price: None,
            settled_pnl: None,
            settled_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn gap_to_target_gearing() {
        // order_value = 100 / 31.1035 * 500; target 80% gears to 4x order value
        let p = position(400.0, 500.0);
        let amount = required_supplement(&p, 80.0);
        let expected = round2(100.0 / 31.1035 * 500.0 * 0.8 / 0.2 - 400.0);
        assert_eq!(amount, expected);
        assert!((amount - 6030.14).abs() < 0.01, "got {amount}");
    }

    #[test]
    fn already_funded_position_needs_nothing() {
        let p = position(10000.0, 500.0);
        assert_eq!(required_supplement(&p, 80.0), 0.0);
    }

    #[test]
    fn degenerate_targets_yield_zero() {
        let p = position(400.0, 500.0);
        assert_eq!(required_supplement(&p, 0.0), 0.0);
        assert_eq!(required_supplement(&p, 100.0), 0.0);
        let unpriced = position(400.0, 0.0);
        assert_eq!(required_supplement(&unpriced, 80.0), 0.0);
    }
}
