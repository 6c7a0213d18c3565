// =============================================================================
// Review-record repositories — deposits, withdrawals, supplements
// =============================================================================
//
// Review transitions are guarded in SQL (`... WHERE status = 'pending'`), so
// two concurrent reviews of the same record resolve to exactly one winner.
// =============================================================================

use chrono::Utc;
use sqlx::any::AnyRow;
use sqlx::{Any, Row, Transaction};

use crate::model::{DepositRequest, ReviewStatus, SupplementRequest, WithdrawRequest};
use crate::store::{bad_column, Store};

fn parse_status(value: String) -> Result<ReviewStatus, sqlx::Error> {
    ReviewStatus::parse(&value).ok_or_else(|| bad_column("status", &value))
}

fn row_to_deposit(row: &AnyRow) -> Result<DepositRequest, sqlx::Error> {
    Ok(DepositRequest {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        method: row.try_get("method")?,
        voucher_url: row.try_get("voucher_url")?,
        user_note: row.try_get("user_note")?,
        receipt_voucher_url: row.try_get("receipt_voucher_url")?,
        status: parse_status(row.try_get("status")?)?,
        reviewer_id: row.try_get("reviewer_id")?,
        review_note: row.try_get("review_note")?,
        reviewed_at: row.try_get("reviewed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_withdraw(row: &AnyRow) -> Result<WithdrawRequest, sqlx::Error> {
    Ok(WithdrawRequest {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        fee: row.try_get("fee")?,
        actual_amount: row.try_get("actual_amount")?,
        method: row.try_get("method")?,
        user_note: row.try_get("user_note")?,
        payment_voucher_url: row.try_get("payment_voucher_url")?,
        status: parse_status(row.try_get("status")?)?,
        reviewer_id: row.try_get("reviewer_id")?,
        review_note: row.try_get("review_note")?,
        reviewed_at: row.try_get("reviewed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_supplement(row: &AnyRow) -> Result<SupplementRequest, sqlx::Error> {
    Ok(SupplementRequest {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        position_id: row.try_get("position_id")?,
        amount: row.try_get("amount")?,
        method: row.try_get("method")?,
        status: parse_status(row.try_get("status")?)?,
        created_at: row.try_get("created_at")?,
    })
}

const SELECT_DEPOSIT: &str = r#"
    SELECT id, user_id, amount, method, voucher_url, user_note,
           receipt_voucher_url, status, reviewer_id, review_note, reviewed_at,
           created_at
    FROM deposit_requests
"#;

const SELECT_WITHDRAW: &str = r#"
    SELECT id, user_id, amount, fee, actual_amount, method, user_note,
           payment_voucher_url, status, reviewer_id, review_note, reviewed_at,
           created_at
    FROM withdraw_requests
"#;

const SELECT_SUPPLEMENT: &str = r#"
    SELECT id, user_id, position_id, amount, method, status, created_at
    FROM supplement_requests
"#;

// ---------------------------------------------------------------------------
// Deposits
// ---------------------------------------------------------------------------

impl Store {
    pub async fn insert_deposit_request(
        &self,
        user_id: i64,
        amount: f64,
        method: &str,
        voucher_url: &str,
        user_note: &str,
    ) -> Result<DepositRequest, sqlx::Error> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO deposit_requests (user_id, amount, method, voucher_url,
                                          user_note, status, created_at)
            VALUES (?, ?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(method)
        .bind(voucher_url)
        .bind(user_note)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_id().unwrap_or_default();
        self.find_deposit_request(id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_deposit_request(
        &self,
        id: i64,
    ) -> Result<Option<DepositRequest>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "{SELECT_DEPOSIT} WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_deposit).transpose()
    }

    pub async fn find_deposits_by_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DepositRequest>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{SELECT_DEPOSIT} WHERE user_id = ? AND deleted_at IS NULL ORDER BY id DESC LIMIT ? OFFSET ?"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_deposit).collect()
    }

    pub async fn find_deposits_by_status(
        &self,
        status: ReviewStatus,
        limit: i64,
    ) -> Result<Vec<DepositRequest>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{SELECT_DEPOSIT} WHERE status = ? AND deleted_at IS NULL ORDER BY id LIMIT ?"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_deposit).collect()
    }

    /// Pending -> approved/rejected under an open transaction. Returns false
    /// when the record is no longer pending.
    pub async fn review_deposit_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        id: i64,
        status: ReviewStatus,
        reviewer_id: i64,
        note: &str,
        receipt_voucher_url: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE deposit_requests
            SET status = ?, reviewer_id = ?, review_note = ?,
                receipt_voucher_url = ?, reviewed_at = ?
            WHERE id = ? AND status = 'pending' AND deleted_at IS NULL
            "#,
        )
        .bind(status.as_str())
        .bind(reviewer_id)
        .bind(note)
        .bind(receipt_voucher_url)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

// ---------------------------------------------------------------------------
// Withdrawals
// ---------------------------------------------------------------------------

impl Store {
    pub async fn insert_withdraw_request(
        &self,
        user_id: i64,
        amount: f64,
        fee: f64,
        method: &str,
        user_note: &str,
    ) -> Result<WithdrawRequest, sqlx::Error> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO withdraw_requests (user_id, amount, fee, actual_amount,
                                           method, user_note, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .bind(fee)
        .bind(amount - fee)
        .bind(method)
        .bind(user_note)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_id().unwrap_or_default();
        self.find_withdraw_request(id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_withdraw_request(
        &self,
        id: i64,
    ) -> Result<Option<WithdrawRequest>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "{SELECT_WITHDRAW} WHERE id = ? AND deleted_at IS NULL"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_withdraw).transpose()
    }

    pub async fn find_withdraws_by_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WithdrawRequest>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{SELECT_WITHDRAW} WHERE user_id = ? AND deleted_at IS NULL ORDER BY id DESC LIMIT ? OFFSET ?"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_withdraw).collect()
    }

    pub async fn find_withdraws_by_status(
        &self,
        status: ReviewStatus,
        limit: i64,
    ) -> Result<Vec<WithdrawRequest>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{SELECT_WITHDRAW} WHERE status = ? AND deleted_at IS NULL ORDER BY id LIMIT ?"
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_withdraw).collect()
    }

    pub async fn review_withdraw_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        id: i64,
        status: ReviewStatus,
        reviewer_id: i64,
        note: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE withdraw_requests
            SET status = ?, reviewer_id = ?, review_note = ?, reviewed_at = ?
            WHERE id = ? AND status = 'pending' AND deleted_at IS NULL
            "#,
        )
        .bind(status.as_str())
        .bind(reviewer_id)
        .bind(note)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Approved -> paid, storing the transfer voucher. Returns false when the
    /// record is not in the approved state.
    pub async fn mark_withdraw_paid(
        &self,
        id: i64,
        voucher_url: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE withdraw_requests
            SET status = 'paid', payment_voucher_url = ?
            WHERE id = ? AND status = 'approved' AND deleted_at IS NULL
            "#,
        )
        .bind(voucher_url)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

// ---------------------------------------------------------------------------
// Supplements
// ---------------------------------------------------------------------------

impl Store {
    /// Supplements are synchronous; the record is written already approved,
    /// inside the same transaction as the balance move.
    pub async fn insert_supplement_request_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        user_id: i64,
        position_id: i64,
        amount: f64,
        method: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO supplement_requests (user_id, position_id, amount, method,
                                             status, created_at)
            VALUES (?, ?, ?, ?, 'approved', ?)
            "#,
        )
        .bind(user_id)
        .bind(position_id)
        .bind(amount)
        .bind(method)
        .bind(Utc::now().timestamp())
        .execute(&mut **tx)
        .await?;
        Ok(result.last_insert_id().unwrap_or_default())
    }

    pub async fn find_supplements_by_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SupplementRequest>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{SELECT_SUPPLEMENT} WHERE user_id = ? AND deleted_at IS NULL ORDER BY id DESC LIMIT ? OFFSET ?"
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_supplement).collect()
    }
}
