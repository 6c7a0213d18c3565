// =============================================================================
// Trade Service — position create / query / cash settle
// =============================================================================
//
// Thin domain layer over the Balance Service: validates input, resolves
// ownership, verifies the pay password at settle, and fires the
// after-settlement side effects (commission hook, trade notification).
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info};

use crate::balance::{BalanceService, BalanceSnapshot};
use crate::commission::CommissionService;
use crate::error::{AppError, AppResult};
use crate::model::{Position, PositionStatus, Side};
use crate::notify::NotificationService;
use crate::quote::QuoteHub;
use crate::store::Store;

/// Process-local sequence so two orders in the same second stay unique.
static ORDER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Build an unsaved position draft with a fresh order number and its mark
/// initialised at the locked price.
pub fn new_position_draft(
    user_id: i64,
    side: Side,
    locked_price: f64,
    weight_g: f64,
    deposit: f64,
) -> Position {
    let now = Utc::now();
    let seq = ORDER_SEQ.fetch_add(1, Ordering::Relaxed) % 10_000;
    let order_id = format!("{}{:04}", now.format("%Y%m%d%H%M%S"), seq);

    let mut position = Position {
        id: 0,
        order_id,
        user_id,
        side,
        locked_price,
        current_price: locked_price,
        weight_g,
        deposit,
        pnl_float: 0.0,
        margin_rate: 0.0,
        status: PositionStatus::Holding,
        settled_price: None,
        settled_pnl: None,
        settled_at: None,
        created_at: now.timestamp(),
        updated_at: now.timestamp(),
    };
    position.update_mark(locked_price);
    position
}

#[derive(Clone)]
pub struct TradeService {
    store: Store,
    balance: BalanceService,
    notifier: NotificationService,
    quote_hub: Arc<QuoteHub>,
}

impl TradeService {
    pub fn new(
        store: Store,
        balance: BalanceService,
        notifier: NotificationService,
        quote_hub: Arc<QuoteHub>,
    ) -> Self {
        Self {
            store,
            balance,
            notifier,
            quote_hub,
        }
    }

    // -------------------------------------------------------------------------
    // Create
    // -------------------------------------------------------------------------

    pub async fn create_position(
        &self,
        user_id: i64,
        side: &str,
        locked_price: f64,
        weight_g: f64,
        deposit: f64,
    ) -> AppResult<Position> {
        let side = Side::parse(side)
            .ok_or_else(|| AppError::BadInput(format!("unknown side: {side}")))?;
        if locked_price <= 0.0 {
            return Err(AppError::BadInput("locked price must be positive".into()));
        }
        if weight_g <= 0.0 {
            return Err(AppError::BadInput("weight must be positive".into()));
        }
        if deposit <= 0.0 {
            return Err(AppError::BadInput("deposit must be positive".into()));
        }

        let draft = new_position_draft(user_id, side, locked_price, weight_g, deposit);
        self.balance.open_position(user_id, draft).await
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub async fn list_positions(
        &self,
        user_id: i64,
        status: Option<&str>,
    ) -> AppResult<Vec<Position>> {
        let status = match status {
            Some(s) => Some(
                PositionStatus::parse(s)
                    .ok_or_else(|| AppError::BadInput(format!("unknown status: {s}")))?,
            ),
            None => None,
        };
        Ok(self.store.find_positions_by_user(user_id, status).await?)
    }

    pub async fn position_detail(&self, user_id: i64, order_id: &str) -> AppResult<Position> {
        let position = self
            .store
            .find_position_by_order_id(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound("position not found".into()))?;
        if position.user_id != user_id {
            return Err(AppError::PermissionDenied("position owned by another user".into()));
        }
        Ok(position)
    }

    // -------------------------------------------------------------------------
    // Settle
    // -------------------------------------------------------------------------

    /// Cash-settle a holding position at the current market price.
    ///
    /// Requires the customer's pay password; the settlement itself runs
    /// through the Balance Service and the commission hook fires afterwards
    /// without blocking the response.
    pub async fn settle(
        &self,
        user_id: i64,
        order_id: &str,
        pay_password: &str,
    ) -> AppResult<(Position, BalanceSnapshot)> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("user not found".into()))?;

        let hash = user
            .pay_password_hash
            .as_deref()
            .ok_or_else(|| AppError::BadInput("pay password not set".into()))?;
        let ok = bcrypt::verify(pay_password, hash)
            .map_err(|e| AppError::Internal(format!("pay password verify: {e}")))?;
        if !ok {
            return Err(AppError::PermissionDenied("wrong pay password".into()));
        }

        let position = self.position_detail(user_id, order_id).await?;

        let latest = self.quote_hub.latest_price();
        if !latest.valid {
            return Err(AppError::UpstreamUnavailable(
                "market price unavailable, try again later".into(),
            ));
        }

        let (settled, snapshot) = self
            .balance
            .settle_position(user_id, position.id, latest.price)
            .await?;

        // Commission is computed out of band; its failure never affects the
        // settlement.
        let commission = CommissionService::new(self.store.clone());
        let position_id = settled.id;
        tokio::spawn(async move {
            if let Err(e) = commission.process_settlement(position_id).await {
                error!(position_id, error = %e, "commission processing failed");
            }
        });

        self.notifier
            .send_trade_notification(
                user_id,
                settled.id,
                "订单结算成功",
                &format!(
                    "订单号：{}\n结算价格：{:.2} 元/克\n结算盈亏：{:.2} 元\n账户可用定金：{:.2} 元",
                    settled.order_id,
                    latest.price,
                    settled.settled_pnl.unwrap_or_default(),
                    snapshot.available
                ),
            )
            .await;

        info!(
            user_id,
            order_id = %settled.order_id,
            price = latest.price,
            "position settled by customer"
        );
        Ok((settled, snapshot))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::model::Role;
    use crate::store::testing::memory_store;

    async fn setup() -> (Store, TradeService, Arc<QuoteHub>, i64) {
        let store = memory_store().await;
        let balance = BalanceService::new(store.clone());
        let notifier = NotificationService::new(store.clone(), None);
        let quote_hub = Arc::new(QuoteHub::new());
        let trade = TradeService::new(
            store.clone(),
            balance.clone(),
            notifier,
            quote_hub.clone(),
        );

        let user = store.create_user("13700000001", Role::Customer).await.unwrap();
        let hash = bcrypt::hash("123456", 4).unwrap();
        store.set_pay_password(user.id, &hash).await.unwrap();
        balance.credit_deposit(user.id, 20000.0, 0, "").await.unwrap();
        (store, trade, quote_hub, user.id)
    }

    #[tokio::test]
    async fn create_validates_inputs() {
        let (_store, trade, _hub, uid) = setup().await;

        let err = trade
            .create_position(uid, "sideways", 500.0, 100.0, 10000.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadInput(_)));

        let err = trade
            .create_position(uid, "long", 0.0, 100.0, 10000.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadInput(_)));

        let err = trade
            .create_position(uid, "long", 500.0, -1.0, 10000.0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadInput(_)));
    }

    #[tokio::test]
    async fn settle_at_market_price_returns_post_state() {
        let (_store, trade, hub, uid) = setup().await;
        let position = trade
            .create_position(uid, "long", 500.0, 100.0, 10000.0)
            .await
            .unwrap();

        hub.record_price(510.0);
        let (settled, snapshot) = trade
            .settle(uid, &position.order_id, "123456")
            .await
            .unwrap();
        assert_eq!(settled.status, PositionStatus::Settled);
        assert_eq!(settled.settled_pnl, Some(1000.0));
        assert_eq!(snapshot.available, 21000.0);
        assert_eq!(snapshot.used, 0.0);
    }

    #[tokio::test]
    async fn settle_rejects_wrong_pay_password() {
        let (_store, trade, hub, uid) = setup().await;
        let position = trade
            .create_position(uid, "long", 500.0, 100.0, 10000.0)
            .await
            .unwrap();

        hub.record_price(510.0);
        let err = trade
            .settle(uid, &position.order_id, "654321")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn settle_requires_valid_market_price() {
        let (_store, trade, _hub, uid) = setup().await;
        let position = trade
            .create_position(uid, "long", 500.0, 100.0, 10000.0)
            .await
            .unwrap();

        // No price recorded yet.
        let err = trade
            .settle(uid, &position.order_id, "123456")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn detail_enforces_ownership() {
        let (store, trade, _hub, uid) = setup().await;
        let position = trade
            .create_position(uid, "short", 500.0, 50.0, 5000.0)
            .await
            .unwrap();

        let other = store.create_user("13700000002", Role::Customer).await.unwrap();
        let err = trade
            .position_detail(other.id, &position.order_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let (_store, trade, hub, uid) = setup().await;
        let first = trade
            .create_position(uid, "long", 500.0, 100.0, 10000.0)
            .await
            .unwrap();
        trade
            .create_position(uid, "short", 500.0, 50.0, 5000.0)
            .await
            .unwrap();

        hub.record_price(500.0);
        trade.settle(uid, &first.order_id, "123456").await.unwrap();

        let holding = trade.list_positions(uid, Some("holding")).await.unwrap();
        assert_eq!(holding.len(), 1);
        let settled = trade.list_positions(uid, Some("settled")).await.unwrap();
        assert_eq!(settled.len(), 1);
        let all = trade.list_positions(uid, None).await.unwrap();
        assert_eq!(all.len(), 2);

        let err = trade.list_positions(uid, Some("open")).await.unwrap_err();
        assert!(matches!(err, AppError::BadInput(_)));
    }
}

