// =============================================================================
// User repository
// =============================================================================

use chrono::Utc;
use sqlx::any::AnyRow;
use sqlx::{Any, Row, Transaction};

use crate::model::{Role, User, UserStatus};
use crate::store::{bad_column, Store};

fn row_to_user(row: &AnyRow) -> Result<User, sqlx::Error> {
    let role: String = row.try_get("role")?;
    let status: String = row.try_get("status")?;
    Ok(User {
        id: row.try_get("id")?,
        phone: row.try_get("phone")?,
        role: Role::parse(&role).ok_or_else(|| bad_column("role", &role))?,
        status: UserStatus::parse(&status).ok_or_else(|| bad_column("status", &status))?,
        sales_id: row.try_get("sales_id")?,
        available_deposit: row.try_get("available_deposit")?,
        used_deposit: row.try_get("used_deposit")?,
        pay_password_hash: row.try_get("pay_password_hash")?,
        auto_supplement_enabled: row.try_get::<i64, _>("auto_supplement_enabled")? != 0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SELECT_USER: &str = r#"
    SELECT id, phone, role, status, sales_id, available_deposit, used_deposit,
           pay_password_hash, auto_supplement_enabled, created_at, updated_at
    FROM users
"#;

impl Store {
    pub async fn create_user(&self, phone: &str, role: Role) -> Result<User, sqlx::Error> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO users (phone, role, status, created_at, updated_at)
            VALUES (?, ?, 'active', ?, ?)
            "#,
        )
        .bind(phone)
        .bind(role.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_id().unwrap_or_default();
        self.find_user(id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn find_user(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(&format!("{SELECT_USER} WHERE id = ? AND deleted_at IS NULL"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    pub async fn find_user_by_phone(&self, phone: &str) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "{SELECT_USER} WHERE phone = ? AND deleted_at IS NULL"
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    /// Load a user inside an open transaction.
    pub async fn find_user_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        id: i64,
    ) -> Result<Option<User>, sqlx::Error> {
        let row = sqlx::query(&format!("{SELECT_USER} WHERE id = ? AND deleted_at IS NULL"))
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    /// Write both balance columns inside an open transaction.
    pub async fn update_balances_tx(
        &self,
        tx: &mut Transaction<'static, Any>,
        user_id: i64,
        available: f64,
        used: f64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET available_deposit = ?, used_deposit = ?, updated_at = ? WHERE id = ?",
        )
        .bind(available)
        .bind(used)
        .bind(Utc::now().timestamp())
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// All support / super-admin accounts.
    pub async fn find_admins(&self) -> Result<Vec<User>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "{SELECT_USER} WHERE role IN ('support', 'super_admin') AND deleted_at IS NULL"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_user).collect()
    }

    /// Flip the auto top-up flag (support / super-admin operation).
    pub async fn set_auto_supplement(
        &self,
        user_id: i64,
        enabled: bool,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET auto_supplement_enabled = ?, updated_at = ? WHERE id = ?")
            .bind(if enabled { 1i64 } else { 0i64 })
            .bind(Utc::now().timestamp())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_pay_password(&self, user_id: i64, hash: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET pay_password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(hash)
            .bind(Utc::now().timestamp())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
