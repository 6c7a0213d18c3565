// =============================================================================
// Salesperson & commission repository
// =============================================================================

use chrono::Utc;
use sqlx::any::AnyRow;
use sqlx::{Any, Row, Transaction};

use crate::model::{CommissionRecord, Salesperson};
use crate::store::Store;

fn row_to_salesperson(row: &AnyRow) -> Result<Salesperson, sqlx::Error> {
    Ok(Salesperson {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        sales_code: row.try_get("sales_code")?,
        name: row.try_get("name")?,
        commission_rate: row.try_get("commission_rate")?,
        total_points: row.try_get("total_points")?,
        month_points: row.try_get("month_points")?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SELECT_SALESPERSON: &str = r#"
    SELECT id, user_id, sales_code, name, commission_rate, total_points,
           month_points, is_active, created_at, updated_at
    FROM salespersons
"#;

impl Store {
    pub async fn create_salesperson(
        &self,
        user_id: i64,
        sales_code: &str,
        name: &str,
        commission_rate: f64,
    ) -> Result<Salesperson, sqlx::Error> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO salespersons (user_id, sales_code, name, commission_rate,
                                      created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(sales_code)
        .bind(name)
        .bind(commission_rate)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_id().unwrap_or_default();
        self.find_salesperson(id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_salesperson(&self, id: i64) -> Result<Option<Salesperson>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "{SELECT_SALESPERSON} WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_salesperson).transpose()
    }

    /// Idempotency probe: has this position already produced a commission?
    pub async fn commission_exists_for_position(
        &self,
        position_id: i64,
    ) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM commission_records WHERE position_id = ? AND deleted_at IS NULL",
        )
        .bind(position_id)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }

    pub async fn insert_commission_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        record: &CommissionRecord,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO commission_records (salesperson_id, position_id, customer_id,
                                            weight_g, commission_rate, points,
                                            settled_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.salesperson_id)
        .bind(record.position_id)
        .bind(record.customer_id)
        .bind(record.weight_g)
        .bind(record.commission_rate)
        .bind(record.points)
        .bind(record.settled_at)
        .bind(record.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.last_insert_id().unwrap_or_default())
    }

    /// Increment total and month-to-date points inside the commission
    /// transaction.
    pub async fn add_salesperson_points_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        salesperson_id: i64,
        points: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE salespersons
            SET total_points = total_points + ?, month_points = month_points + ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(points)
        .bind(points)
        .bind(Utc::now().timestamp())
        .bind(salesperson_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}
