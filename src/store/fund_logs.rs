// =============================================================================
// Fund-log repository — append-only
// =============================================================================

use sqlx::any::AnyRow;
use sqlx::{Any, Row, Transaction};

use crate::model::{FundLog, FundLogType};
use crate::store::{bad_column, Store};

fn row_to_fund_log(row: &AnyRow) -> Result<FundLog, sqlx::Error> {
    let log_type: String = row.try_get("log_type")?;
    Ok(FundLog {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        log_type: FundLogType::parse(&log_type).ok_or_else(|| bad_column("log_type", &log_type))?,
        amount: row.try_get("amount")?,
        available_before: row.try_get("available_before")?,
        available_after: row.try_get("available_after")?,
        used_before: row.try_get("used_before")?,
        used_after: row.try_get("used_after")?,
        related_id: row.try_get("related_id")?,
        related_type: row.try_get("related_type")?,
        note: row.try_get("note")?,
        created_at: row.try_get("created_at")?,
    })
}

const SELECT_FUND_LOG: &str = r#"
    SELECT id, user_id, log_type, amount, available_before, available_after,
           used_before, used_after, related_id, related_type, note, created_at
    FROM fund_logs
"#;

impl Store {
    pub async fn insert_fund_log_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        log: &FundLog,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO fund_logs (user_id, log_type, amount, available_before,
                                   available_after, used_before, used_after,
                                   related_id, related_type, note, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.user_id)
        .bind(log.log_type.as_str())
        .bind(log.amount)
        .bind(log.available_before)
        .bind(log.available_after)
        .bind(log.used_before)
        .bind(log.used_after)
        .bind(log.related_id)
        .bind(&log.related_type)
        .bind(&log.note)
        .bind(log.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(result.last_insert_id().unwrap_or_default())
    }

    /// A user's journal, newest first.
    pub async fn find_fund_logs_by_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FundLog>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{SELECT_FUND_LOG} WHERE user_id = ? AND deleted_at IS NULL ORDER BY id DESC LIMIT ? OFFSET ?"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_fund_log).collect()
    }

    /// Journal entries of one type for one user, oldest first.
    pub async fn find_fund_logs_by_type(
        &self,
        user_id: i64,
        log_type: FundLogType,
    ) -> Result<Vec<FundLog>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{SELECT_FUND_LOG} WHERE user_id = ? AND log_type = ? AND deleted_at IS NULL ORDER BY id"
        ))
        .bind(user_id)
        .bind(log_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_fund_log).collect()
    }
}
