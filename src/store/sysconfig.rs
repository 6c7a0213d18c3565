// =============================================================================
// Risk-config repository — singleton row, seeded with defaults when absent
// =============================================================================

use chrono::Utc;
use sqlx::any::AnyRow;
use sqlx::Row;

use crate::model::RiskConfig;
use crate::store::Store;

fn row_to_risk_config(row: &AnyRow) -> Result<RiskConfig, sqlx::Error> {
    Ok(RiskConfig {
        force_close_rate: row.try_get("force_close_rate")?,
        high_risk_min: row.try_get("high_risk_min")?,
        high_risk_max: row.try_get("high_risk_max")?,
        warning_rate: row.try_get("warning_rate")?,
        price_update_interval_s: row.try_get("price_update_interval_s")?,
        auto_supplement_trigger: row.try_get("auto_supplement_trigger")?,
        auto_supplement_target: row.try_get("auto_supplement_target")?,
    })
}

impl Store {
    /// The active risk configuration. The scheduler reads this every tick,
    /// so admin changes take effect on the next pass.
    pub async fn risk_config(&self) -> Result<RiskConfig, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT force_close_rate, high_risk_min, high_risk_max, warning_rate,
                   price_update_interval_s, auto_supplement_trigger,
                   auto_supplement_target
            FROM risk_configs ORDER BY id LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_risk_config(&row),
            None => {
                let defaults = RiskConfig::default();
                self.save_risk_config(&defaults).await?;
                Ok(defaults)
            }
        }
    }

    pub async fn save_risk_config(&self, cfg: &RiskConfig) -> Result<(), sqlx::Error> {
        let now = Utc::now().timestamp();
        let updated = sqlx::query(
            r#"
            UPDATE risk_configs
            SET force_close_rate = ?, high_risk_min = ?, high_risk_max = ?,
                warning_rate = ?, price_update_interval_s = ?,
                auto_supplement_trigger = ?, auto_supplement_target = ?,
                updated_at = ?
            "#,
        )
        .bind(cfg.force_close_rate)
        .bind(cfg.high_risk_min)
        .bind(cfg.high_risk_max)
        .bind(cfg.warning_rate)
        .bind(cfg.price_update_interval_s)
        .bind(cfg.auto_supplement_trigger)
        .bind(cfg.auto_supplement_target)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            sqlx::query(
                r#"
                INSERT INTO risk_configs (force_close_rate, high_risk_min,
                                          high_risk_max, warning_rate,
                                          price_update_interval_s,
                                          auto_supplement_trigger,
                                          auto_supplement_target, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(cfg.force_close_rate)
            .bind(cfg.high_risk_min)
            .bind(cfg.high_risk_max)
            .bind(cfg.warning_rate)
            .bind(cfg.price_update_interval_s)
            .bind(cfg.auto_supplement_trigger)
            .bind(cfg.auto_supplement_target)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::model::RiskConfig;
    use crate::store::testing::memory_store;

    #[tokio::test]
    async fn missing_row_seeds_defaults() {
        let store = memory_store().await;
        let cfg = store.risk_config().await.unwrap();
        assert_eq!(cfg, RiskConfig::default());
        // Second read hits the seeded row.
        assert_eq!(store.risk_config().await.unwrap(), cfg);
    }

    #[tokio::test]
    async fn save_overwrites_singleton() {
        let store = memory_store().await;
        let mut cfg = store.risk_config().await.unwrap();
        cfg.warning_rate = 60.0;
        cfg.price_update_interval_s = 30;
        store.save_risk_config(&cfg).await.unwrap();

        let loaded = store.risk_config().await.unwrap();
        assert_eq!(loaded.warning_rate, 60.0);
        assert_eq!(loaded.price_update_interval_s, 30);
    }
}
