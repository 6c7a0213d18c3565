// =============================================================================
// Position — locked-price contract with live mark-to-market and risk class
// =============================================================================
//
// Life-cycle:
//   Holding -> Settled (customer cash settle)
//   Holding -> Closed  (risk engine force-close)
//
// Both terminal states record the settlement price, the realised PnL, and the
// settlement timestamp exactly once.
//
// The pricing functions are pure: the risk pass calls them with the latest
// reference price and persists the three derived fields.
// =============================================================================

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::model::risk_config::RiskConfig;
use crate::model::round2;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Direction of a locked-price position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "long" => Some(Self::Long),
            "short" => Some(Self::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Holding,
    Settled,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Holding => "holding",
            Self::Settled => "settled",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "holding" => Some(Self::Holding),
            "settled" => Some(Self::Settled),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification of a holding position against the configured
/// margin-rate thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    ForceClose,
    HighRisk,
    Warning,
    Safe,
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A single locked-price position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    /// Human-facing order number (unique).
    pub order_id: String,
    pub user_id: i64,
    pub side: Side,
    /// Price fixed at open (yuan per gram). Immutable.
    pub locked_price: f64,
    /// Latest reference price seen by the risk pass.
    pub current_price: f64,
    /// Contract weight in grams. Immutable.
    pub weight_g: f64,
    /// Collateral attached to this position. Grows via supplement.
    pub deposit: f64,
    pub pnl_float: f64,
    /// Margin rate in percent, derived by the risk pass.
    pub margin_rate: f64,
    pub status: PositionStatus,
    pub settled_price: Option<f64>,
    pub settled_pnl: Option<f64>,
    /// Unix seconds of the terminal transition.
    pub settled_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Position {
    // -------------------------------------------------------------------------
    // Pricing (pure)
    // -------------------------------------------------------------------------

    /// Floating PnL at `price`.
    ///
    /// Long: `(price - locked) * weight`. Short: `(locked - price) * weight`.
    pub fn pnl_at(&self, price: f64) -> f64 {
        match self.side {
            Side::Long => (price - self.locked_price) * self.weight_g,
            Side::Short => (self.locked_price - price) * self.weight_g,
        }
    }

    /// Margin rate in percent at `price`.
    ///
    /// The denominator is the weight-proportional base deposit of
    /// 10 yuan/gram, NOT market value. The published risk thresholds are
    /// calibrated against this exact formula; do not re-derive it.
    pub fn margin_rate_at(&self, price: f64) -> f64 {
        let base_deposit = self.weight_g * 10.0;
        if base_deposit <= 0.0 {
            return 0.0;
        }
        (self.deposit + self.pnl_at(price)) / base_deposit * 100.0
    }

    /// Refresh `current_price`, `pnl_float`, and `margin_rate` in place.
    pub fn update_mark(&mut self, price: f64) {
        self.current_price = price;
        self.pnl_float = round2(self.pnl_at(price));
        self.margin_rate = round2(self.margin_rate_at(price));
    }

    // -------------------------------------------------------------------------
    // Classification
    // -------------------------------------------------------------------------

    /// Classify a holding position against the configured thresholds.
    ///
    /// Tie-breaks: a rate exactly at `force_close_rate` force-closes; the
    /// high-risk band is strictly open on both ends; `warning_rate` is
    /// inclusive. Non-holding positions are always `Safe`.
    pub fn classify(&self, cfg: &RiskConfig) -> RiskClass {
        if self.status != PositionStatus::Holding {
            return RiskClass::Safe;
        }
        if self.margin_rate <= cfg.force_close_rate {
            RiskClass::ForceClose
        } else if self.margin_rate > cfg.high_risk_min && self.margin_rate < cfg.high_risk_max {
            RiskClass::HighRisk
        } else if self.margin_rate <= cfg.warning_rate {
            RiskClass::Warning
        } else {
            RiskClass::Safe
        }
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    pub fn can_settle(&self) -> bool {
        self.status == PositionStatus::Holding
    }

    /// Record a customer cash settlement at `price`.
    pub fn settle(&mut self, price: f64) {
        self.finalize(price, PositionStatus::Settled);
    }

    /// Record an engine force-close at `price`.
    pub fn force_close(&mut self, price: f64) {
        self.finalize(price, PositionStatus::Closed);
    }

    fn finalize(&mut self, price: f64, status: PositionStatus) {
        let pnl = round2(self.pnl_at(price));
        self.settled_price = Some(price);
        self.settled_pnl = Some(pnl);
        self.settled_at = Some(Utc::now().timestamp());
        self.current_price = price;
        self.pnl_float = pnl;
        self.status = status;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn holding(side: Side, locked: f64, weight: f64, deposit: f64) -> Position {
        Position {
            id: 1,
            order_id: "202511010930000001".into(),
            user_id: 7,
            side,
            locked_price: locked,
            current_price: locked,
            weight_g: weight,
            deposit,
            pnl_float: 0.0,
            margin_rate: 0.0,
            status: PositionStatus::Holding,
            settled_price: None,
            settled_pnl: None,
            settled_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn pnl_long_rises_with_price() {
        let p = holding(Side::Long, 500.0, 100.0, 10000.0);
        assert_eq!(p.pnl_at(510.0), 1000.0);
        assert_eq!(p.pnl_at(490.0), -1000.0);
    }

    #[test]
    fn pnl_short_falls_with_price() {
        let p = holding(Side::Short, 500.0, 100.0, 10000.0);
        assert_eq!(p.pnl_at(490.0), 1000.0);
        assert_eq!(p.pnl_at(599.1), -9910.0);
    }

    #[test]
    fn margin_rate_uses_base_deposit_not_market_value() {
        // base_deposit = 100g * 10 = 1000; rate = (10000 + 0) / 1000 * 100
        let p = holding(Side::Long, 500.0, 100.0, 10000.0);
        assert_eq!(p.margin_rate_at(500.0), 1000.0);
    }

    #[test]
    fn margin_rate_zero_weight_is_zero() {
        let p = holding(Side::Long, 500.0, 0.0, 10000.0);
        assert_eq!(p.margin_rate_at(500.0), 0.0);
    }

    #[test]
    fn classify_boundaries() {
        let cfg = RiskConfig::default();
        let mut p = holding(Side::Long, 500.0, 100.0, 10000.0);

        p.margin_rate = 20.0;
        assert_eq!(p.classify(&cfg), RiskClass::ForceClose);

        p.margin_rate = 20.01;
        assert_eq!(p.classify(&cfg), RiskClass::HighRisk);

        p.margin_rate = 24.99;
        assert_eq!(p.classify(&cfg), RiskClass::HighRisk);

        // 25.0 falls out of the open high-risk band into the warning range.
        p.margin_rate = 25.0;
        assert_eq!(p.classify(&cfg), RiskClass::Warning);

        p.margin_rate = 50.0;
        assert_eq!(p.classify(&cfg), RiskClass::Warning);

        p.margin_rate = 50.01;
        assert_eq!(p.classify(&cfg), RiskClass::Safe);
    }

    #[test]
    fn classify_ignores_terminal_positions() {
        let cfg = RiskConfig::default();
        let mut p = holding(Side::Long, 500.0, 100.0, 10000.0);
        p.margin_rate = 5.0;
        p.status = PositionStatus::Settled;
        assert_eq!(p.classify(&cfg), RiskClass::Safe);
    }

    #[test]
    fn update_mark_sets_all_three_fields() {
        let mut p = holding(Side::Short, 500.0, 100.0, 10000.0);
        p.update_mark(599.1);
        assert_eq!(p.current_price, 599.1);
        assert_eq!(p.pnl_float, -9910.0);
        assert_eq!(p.margin_rate, 9.0);
    }

    #[test]
    fn settle_records_terminal_fields_once() {
        let mut p = holding(Side::Long, 500.0, 100.0, 10000.0);
        p.settle(510.0);
        assert_eq!(p.status, PositionStatus::Settled);
        assert_eq!(p.settled_price, Some(510.0));
        assert_eq!(p.settled_pnl, Some(1000.0));
        assert!(p.settled_at.is_some());
    }

    #[test]
    fn force_close_marks_closed() {
        let mut p = holding(Side::Short, 500.0, 100.0, 10000.0);
        p.update_mark(599.1);
        p.force_close(599.1);
        assert_eq!(p.status, PositionStatus::Closed);
        assert_eq!(p.settled_pnl, Some(-9910.0));
    }
}
