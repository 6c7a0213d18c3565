// =============================================================================
// FundLog — append-only journal of every balance change
// =============================================================================
//
// Every successful balance mutation writes exactly one entry whose
// before/after snapshots bracket the transition. The journal is the audit
// trail used for reconciliation; rows are never updated.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Journal entry category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundLogType {
    Deposit,
    Withdraw,
    OrderFreeze,
    OrderRelease,
    Settle,
    ForceClose,
    Supplement,
}

impl FundLogType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::OrderFreeze => "order_freeze",
            Self::OrderRelease => "order_release",
            Self::Settle => "settle",
            Self::ForceClose => "force_close",
            Self::Supplement => "supplement",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(Self::Deposit),
            "withdraw" => Some(Self::Withdraw),
            "order_freeze" => Some(Self::OrderFreeze),
            "order_release" => Some(Self::OrderRelease),
            "settle" => Some(Self::Settle),
            "force_close" => Some(Self::ForceClose),
            "supplement" => Some(Self::Supplement),
            _ => None,
        }
    }
}

/// One balance transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundLog {
    pub id: i64,
    pub user_id: i64,
    pub log_type: FundLogType,
    /// Signed change to available deposit (positive = credit).
    pub amount: f64,
    pub available_before: f64,
    pub available_after: f64,
    pub used_before: f64,
    pub used_after: f64,
    /// Related entity id (position, deposit request, ...), 0 = none.
    pub related_id: i64,
    pub related_type: String,
    pub note: String,
    pub created_at: i64,
}

impl FundLog {
    pub fn is_income(&self) -> bool {
        self.amount > 0.0
    }

    /// Total balance after the transition.
    pub fn total_after(&self) -> f64 {
        self.available_after + self.used_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_roundtrip() {
        for s in [
            "deposit",
            "withdraw",
            "order_freeze",
            "order_release",
            "settle",
            "force_close",
            "supplement",
        ] {
            assert_eq!(FundLogType::parse(s).unwrap().as_str(), s);
        }
        assert!(FundLogType::parse("refund").is_none());
    }
}
