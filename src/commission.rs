// =============================================================================
// Commission hook — assigns points to the owning salesperson after settle
// =============================================================================
//
// Fired asynchronously after a successful settlement. Idempotent per
// position (the commission table holds a unique key on position_id), and a
// failure here never affects the settlement that triggered it.
// =============================================================================

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::model::{commission_points, CommissionRecord, PositionStatus};
use crate::store::Store;

#[derive(Clone)]
pub struct CommissionService {
    store: Store,
}

impl CommissionService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Create the commission record for a settled position, exactly once.
    ///
    /// Returns the points granted, or `None` when the hook decides to skip
    /// (no owning salesperson, or already processed).
    pub async fn process_settlement(&self, position_id: i64) -> AppResult<Option<f64>> {
        let position = self
            .store
            .find_position(position_id)
            .await?
            .ok_or_else(|| AppError::NotFound("position not found".into()))?;

        if position.status != PositionStatus::Settled {
            return Err(AppError::InvalidState(
                "commission applies to settled positions only".into(),
            ));
        }

        let customer = self
            .store
            .find_user(position.user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("customer not found".into()))?;

        if customer.sales_id == 0 {
            debug!(order_id = %position.order_id, "customer has no salesperson, skipping commission");
            return Ok(None);
        }

        if self
            .store
            .commission_exists_for_position(position.id)
            .await?
        {
            debug!(order_id = %position.order_id, "commission already recorded, skipping");
            return Ok(None);
        }

        let salesperson = self
            .store
            .find_salesperson(customer.sales_id)
            .await?
            .ok_or_else(|| AppError::NotFound("salesperson not found".into()))?;

        let points = commission_points(position.weight_g, salesperson.commission_rate);
        let record = CommissionRecord {
            id: 0,
            salesperson_id: salesperson.id,
            position_id: position.id,
            customer_id: customer.id,
            weight_g: position.weight_g,
            commission_rate: salesperson.commission_rate,
            points,
            settled_at: position.settled_at.unwrap_or_else(|| Utc::now().timestamp()),
            created_at: Utc::now().timestamp(),
        };

        let mut tx = self.store.begin().await?;
        self.store.insert_commission_tx(&mut tx, &record).await?;
        self.store
            .add_salesperson_points_tx(&mut tx, salesperson.id, points)
            .await?;
        tx.commit().await?;

        info!(
            order_id = %position.order_id,
            salesperson_id = salesperson.id,
            weight_g = position.weight_g,
            points,
            "commission recorded"
        );
        Ok(Some(points))
    }
}

// =============================================================================
// Tests
// =============================================================================
