// =============================================================================
// Position repository
// =============================================================================

use chrono::Utc;
use sqlx::any::AnyRow;
use sqlx::{Any, Row, Transaction};

use crate::model::{Position, PositionStatus, Side};
use crate::store::{bad_column, Store};

fn row_to_position(row: &AnyRow) -> Result<Position, sqlx::Error> {
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;
    Ok(Position {
        id: row.try_get("id")?,
        order_id: row.try_get("order_id")?,
        user_id: row.try_get("user_id")?,
        side: Side::parse(&side).ok_or_else(|| bad_column("side", &side))?,
        locked_price: row.try_get("locked_price")?,
        current_price: row.try_get("current_price")?,
        weight_g: row.try_get("weight_g")?,
        deposit: row.try_get("deposit")?,
        pnl_float: row.try_get("pnl_float")?,
        margin_rate: row.try_get("margin_rate")?,
        status: PositionStatus::parse(&status).ok_or_else(|| bad_column("status", &status))?,
        settled_price: row.try_get("settled_price")?,
        settled_pnl: row.try_get("settled_pnl")?,
        settled_at: row.try_get("settled_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SELECT_POSITION: &str = r#"
    SELECT id, order_id, user_id, side, locked_price, current_price, weight_g,
           deposit, pnl_float, margin_rate, status, settled_price, settled_pnl,
           settled_at, created_at, updated_at
    FROM positions
"#;

impl Store {
    /// Insert a freshly-opened position inside an open transaction and
    /// return its id.
    pub async fn insert_position_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        position: &Position,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO positions (order_id, user_id, side, locked_price, current_price,
                                   weight_g, deposit, pnl_float, margin_rate, status,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&position.order_id)
        .bind(position.user_id)
        .bind(position.side.as_str())
        .bind(position.locked_price)
        .bind(position.current_price)
        .bind(position.weight_g)
        .bind(position.deposit)
        .bind(position.pnl_float)
        .bind(position.margin_rate)
        .bind(position.status.as_str())
        .bind(position.created_at)
        .bind(position.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.last_insert_id().unwrap_or_default())
    }

    pub async fn find_position(&self, id: i64) -> Result<Option<Position>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "{SELECT_POSITION} WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_position).transpose()
    }

    pub async fn find_position_by_order_id(
        &self,
        order_id: &str,
    ) -> Result<Option<Position>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "{SELECT_POSITION} WHERE order_id = ? AND deleted_at IS NULL"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_position).transpose()
    }

    pub async fn find_position_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        id: i64,
    ) -> Result<Option<Position>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "{SELECT_POSITION} WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(row_to_position).transpose()
    }

    /// A user's positions, newest first, optionally filtered by status.
    pub async fn find_positions_by_user(
        &self,
        user_id: i64,
        status: Option<PositionStatus>,
    ) -> Result<Vec<Position>, sqlx::Error> {
        let rows = match status {
            Some(s) => {
                sqlx::query(&format!(
                    "{SELECT_POSITION} WHERE user_id = ? AND status = ? AND deleted_at IS NULL ORDER BY id DESC"
                ))
                .bind(user_id)
                .bind(s.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "{SELECT_POSITION} WHERE user_id = ? AND deleted_at IS NULL ORDER BY id DESC"
                ))
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_position).collect()
    }

    /// Every holding position across all users, in insertion order. The risk
    /// pass walks this list.
    pub async fn find_holding_positions(&self) -> Result<Vec<Position>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{SELECT_POSITION} WHERE status = 'holding' AND deleted_at IS NULL ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_position).collect()
    }

    /// Persist the three mark-to-market fields and nothing else.
    pub async fn update_position_mark(
        &self,
        id: i64,
        current_price: f64,
        pnl_float: f64,
        margin_rate: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE positions
            SET current_price = ?, pnl_float = ?, margin_rate = ?, updated_at = ?
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(current_price)
        .bind(pnl_float)
        .bind(margin_rate)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal transition guarded by the holding state-check: returns false
    /// when another transaction already settled or closed the position.
    pub async fn finalize_position_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        position: &Position,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = ?, settled_price = ?, settled_pnl = ?, settled_at = ?,
                current_price = ?, pnl_float = ?, updated_at = ?
            WHERE id = ? AND status = 'holding' AND deleted_at IS NULL
            "#,
        )
        .bind(position.status.as_str())
        .bind(position.settled_price)
        .bind(position.settled_pnl)
        .bind(position.settled_at)
        .bind(position.current_price)
        .bind(position.pnl_float)
        .bind(Utc::now().timestamp())
        .bind(position.id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Grow a holding position's deposit (supplement) and refresh its mark.
    pub async fn add_position_deposit_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        position: &Position,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET deposit = ?, pnl_float = ?, margin_rate = ?, updated_at = ?
            WHERE id = ? AND status = 'holding' AND deleted_at IS NULL
            "#,
        )
        .bind(position.deposit)
        .bind(position.pnl_float)
        .bind(position.margin_rate)
        .bind(Utc::now().timestamp())
        .bind(position.id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Sum of deposits over a user's holding positions (invariant check and
    /// risk statistics).
    pub async fn sum_holding_deposit(&self, user_id: i64) -> Result<f64, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(deposit), 0.0) AS total FROM positions WHERE user_id = ? AND status = 'holding' AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_get("total")
    }
}
