// =============================================================================
// Store — typed persistence over sqlx (sqlite | mysql via the Any driver)
// =============================================================================
//
// The store is the single source of truth; in-memory caches (latest price,
// viewer presence) are rebuildable. Schema is created by idempotent DDL at
// startup. Timestamps are unix seconds (i64); money is f64 rounded to two
// decimals at the mutation points; flags are stored as INTEGER 0/1 so that
// both backends decode them identically.
//
// Repository methods live in the sibling modules as `impl Store` blocks,
// one file per aggregate.
// =============================================================================

use anyhow::{Context, Result};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tracing::info;

use crate::config::DatabaseKind;

mod fund_logs;
mod notifications;
mod positions;
mod reviews;
mod sales;
mod sysconfig;
mod users;

/// Shared handle over the connection pool. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: AnyPool,
    kind: DatabaseKind,
}

impl Store {
    /// Connect to `url` and run the schema migration.
    pub async fn connect(url: &str, kind: DatabaseKind) -> Result<Self> {
        sqlx::any::install_default_drivers();

        // SQLite file paths may live in a directory that does not exist yet.
        if let Some(path_part) = url.strip_prefix("sqlite://") {
            let path = std::path::Path::new(path_part.split('?').next().unwrap_or(path_part));
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .context("failed to create database directory")?;
                }
            }
        }

        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .with_context(|| format!("failed to connect to database at {url}"))?;

        info!(url = %url, kind = ?kind, "connected to database");

        let store = Self { pool, kind };
        store.migrate().await.context("schema migration failed")?;
        Ok(store)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Any>, sqlx::Error> {
        self.pool.begin().await
    }

    // -------------------------------------------------------------------------
    // Schema
    // -------------------------------------------------------------------------

    async fn migrate(&self) -> Result<()> {
        // The auto-increment id spelling is the one dialect difference the
        // schema needs.
        let id_col = match self.kind {
            DatabaseKind::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            DatabaseKind::Mysql => "BIGINT PRIMARY KEY AUTO_INCREMENT",
        };

        let tables = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS users (
                    id {id_col},
                    phone VARCHAR(20) NOT NULL UNIQUE,
                    role VARCHAR(20) NOT NULL,
                    status VARCHAR(20) NOT NULL DEFAULT 'pending',
                    sales_id BIGINT NOT NULL DEFAULT 0,
                    available_deposit DOUBLE NOT NULL DEFAULT 0,
                    used_deposit DOUBLE NOT NULL DEFAULT 0,
                    pay_password_hash VARCHAR(255),
                    auto_supplement_enabled INTEGER NOT NULL DEFAULT 0,
                    created_at BIGINT NOT NULL,
                    updated_at BIGINT NOT NULL,
                    deleted_at BIGINT
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS positions (
                    id {id_col},
                    order_id VARCHAR(50) NOT NULL UNIQUE,
                    user_id BIGINT NOT NULL,
                    side VARCHAR(10) NOT NULL,
                    locked_price DOUBLE NOT NULL,
                    current_price DOUBLE NOT NULL DEFAULT 0,
                    weight_g DOUBLE NOT NULL,
                    deposit DOUBLE NOT NULL,
                    pnl_float DOUBLE NOT NULL DEFAULT 0,
                    margin_rate DOUBLE NOT NULL DEFAULT 0,
                    status VARCHAR(20) NOT NULL DEFAULT 'holding',
                    settled_price DOUBLE,
                    settled_pnl DOUBLE,
                    settled_at BIGINT,
                    created_at BIGINT NOT NULL,
                    updated_at BIGINT NOT NULL,
                    deleted_at BIGINT
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS fund_logs (
                    id {id_col},
                    user_id BIGINT NOT NULL,
                    log_type VARCHAR(20) NOT NULL,
                    amount DOUBLE NOT NULL,
                    available_before DOUBLE NOT NULL,
                    available_after DOUBLE NOT NULL,
                    used_before DOUBLE NOT NULL,
                    used_after DOUBLE NOT NULL,
                    related_id BIGINT NOT NULL DEFAULT 0,
                    related_type VARCHAR(50) NOT NULL DEFAULT '',
                    note VARCHAR(500) NOT NULL DEFAULT '',
                    created_at BIGINT NOT NULL,
                    deleted_at BIGINT
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS notifications (
                    id {id_col},
                    user_id BIGINT NOT NULL,
                    notify_type VARCHAR(20) NOT NULL,
                    level VARCHAR(20) NOT NULL DEFAULT 'info',
                    title VARCHAR(200) NOT NULL,
                    content TEXT NOT NULL,
                    related_id BIGINT NOT NULL DEFAULT 0,
                    related_type VARCHAR(50) NOT NULL DEFAULT '',
                    status VARCHAR(20) NOT NULL DEFAULT 'pending',
                    read_at BIGINT,
                    created_at BIGINT NOT NULL,
                    deleted_at BIGINT
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS deposit_requests (
                    id {id_col},
                    user_id BIGINT NOT NULL,
                    amount DOUBLE NOT NULL,
                    method VARCHAR(50) NOT NULL DEFAULT '',
                    voucher_url VARCHAR(500) NOT NULL DEFAULT '',
                    user_note VARCHAR(500) NOT NULL DEFAULT '',
                    receipt_voucher_url VARCHAR(500) NOT NULL DEFAULT '',
                    status VARCHAR(20) NOT NULL DEFAULT 'pending',
                    reviewer_id BIGINT NOT NULL DEFAULT 0,
                    review_note VARCHAR(500) NOT NULL DEFAULT '',
                    reviewed_at BIGINT,
                    created_at BIGINT NOT NULL,
                    deleted_at BIGINT
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS withdraw_requests (
                    id {id_col},
                    user_id BIGINT NOT NULL,
                    amount DOUBLE NOT NULL,
                    fee DOUBLE NOT NULL DEFAULT 0,
                    actual_amount DOUBLE NOT NULL,
                    method VARCHAR(50) NOT NULL DEFAULT '',
                    user_note VARCHAR(500) NOT NULL DEFAULT '',
                    payment_voucher_url VARCHAR(500) NOT NULL DEFAULT '',
                    status VARCHAR(20) NOT NULL DEFAULT 'pending',
                    reviewer_id BIGINT NOT NULL DEFAULT 0,
                    review_note VARCHAR(500) NOT NULL DEFAULT '',
                    reviewed_at BIGINT,
                    created_at BIGINT NOT NULL,
                    deleted_at BIGINT
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS supplement_requests (
                    id {id_col},
                    user_id BIGINT NOT NULL,
                    position_id BIGINT NOT NULL,
                    amount DOUBLE NOT NULL,
                    method VARCHAR(50) NOT NULL DEFAULT 'manual',
                    status VARCHAR(20) NOT NULL DEFAULT 'approved',
                    created_at BIGINT NOT NULL,
                    deleted_at BIGINT
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS salespersons (
                    id {id_col},
                    user_id BIGINT NOT NULL UNIQUE,
                    sales_code VARCHAR(20) NOT NULL UNIQUE,
                    name VARCHAR(50) NOT NULL,
                    commission_rate DOUBLE NOT NULL DEFAULT 0.0001,
                    total_points DOUBLE NOT NULL DEFAULT 0,
                    month_points DOUBLE NOT NULL DEFAULT 0,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at BIGINT NOT NULL,
                    updated_at BIGINT NOT NULL,
                    deleted_at BIGINT
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS commission_records (
                    id {id_col},
                    salesperson_id BIGINT NOT NULL,
                    position_id BIGINT NOT NULL UNIQUE,
                    customer_id BIGINT NOT NULL,
                    weight_g DOUBLE NOT NULL,
                    commission_rate DOUBLE NOT NULL,
                    points DOUBLE NOT NULL,
                    settled_at BIGINT NOT NULL,
                    created_at BIGINT NOT NULL,
                    deleted_at BIGINT
                )
                "#
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS risk_configs (
                    id {id_col},
                    force_close_rate DOUBLE NOT NULL DEFAULT 20,
                    high_risk_min DOUBLE NOT NULL DEFAULT 20,
                    high_risk_max DOUBLE NOT NULL DEFAULT 25,
                    warning_rate DOUBLE NOT NULL DEFAULT 50,
                    price_update_interval_s BIGINT NOT NULL DEFAULT 15,
                    auto_supplement_trigger DOUBLE NOT NULL DEFAULT 50,
                    auto_supplement_target DOUBLE NOT NULL DEFAULT 80,
                    updated_at BIGINT NOT NULL,
                    deleted_at BIGINT
                )
                "#
            ),
        ];

        for ddl in &tables {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        info!("schema migration complete");
        Ok(())
    }
}

/// Decode failure for a textual enum column.
pub(crate) fn bad_column(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unrecognised value: {value}").into(),
    }
}

// =============================================================================
// Test support
// =============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// In-memory SQLite store for service tests. A single connection keeps
    /// the whole test on one database instance.
    pub async fn memory_store() -> Store {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");

        let store = Store {
            pool,
            kind: DatabaseKind::Sqlite,
        };
        store.migrate().await.expect("migrate");
        store
    }
}
