// =============================================================================
// Domain model — entities shared by the store, services, and API layers
// =============================================================================

pub mod fund_log;
pub mod notification;
pub mod position;
pub mod review;
pub mod risk_config;
pub mod sales;
pub mod user;

pub use fund_log::{FundLog, FundLogType};
pub use notification::{Notification, NotifyLevel, NotifyStatus, NotifyType};
pub use position::{Position, PositionStatus, RiskClass, Side};
pub use review::{
    DepositRequest, ReviewStatus, SupplementRequest, WithdrawRequest,
};
pub use risk_config::RiskConfig;
pub use sales::{commission_points, CommissionRecord, Salesperson};
pub use user::{Role, User, UserStatus};

/// Round a money amount to two decimals (fen precision).
///
/// Applied at every mutation point so that stored balances never accumulate
/// float noise beyond the cent.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round2_truncates_to_fen() {
        assert_eq!(round2(10.0 / 3.0), 3.33);
        assert_eq!(round2(0.1 + 0.2), 0.3);
        assert_eq!(round2(-99.999), -100.0);
        assert_eq!(round2(100.0), 100.0);
    }
}
