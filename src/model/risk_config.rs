// =============================================================================
// RiskConfig — singleton tuning table read by the risk pass every tick
// =============================================================================

use serde::{Deserialize, Serialize};

/// Risk thresholds and scheduler tuning. Persisted as a single row; changes
/// take effect on the next tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Force-close at or below this margin rate (percent).
    pub force_close_rate: f64,
    /// High-risk band, strictly open: (min, max).
    pub high_risk_min: f64,
    pub high_risk_max: f64,
    /// Warn at or below this margin rate.
    pub warning_rate: f64,
    /// Risk pass interval in seconds.
    pub price_update_interval_s: i64,
    /// Attempt auto top-up below this margin rate (percent).
    pub auto_supplement_trigger: f64,
    /// Top-up aims to restore roughly this margin rate (percent).
    pub auto_supplement_target: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            force_close_rate: 20.0,
            high_risk_min: 20.0,
            high_risk_max: 25.0,
            warning_rate: 50.0,
            price_update_interval_s: 15,
            auto_supplement_trigger: 50.0,
            auto_supplement_target: 80.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_published_thresholds() {
        let cfg = RiskConfig::default();
        assert_eq!(cfg.force_close_rate, 20.0);
        assert_eq!(cfg.high_risk_min, 20.0);
        assert_eq!(cfg.high_risk_max, 25.0);
        assert_eq!(cfg.warning_rate, 50.0);
        assert_eq!(cfg.price_update_interval_s, 15);
        assert_eq!(cfg.auto_supplement_trigger, 50.0);
        assert_eq!(cfg.auto_supplement_target, 80.0);
    }
}
