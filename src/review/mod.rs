// =============================================================================
// Review workflow — deposit / withdrawal / supplement funding requests
// =============================================================================

mod deposit;
mod supplement;
mod withdraw;

pub use deposit::DepositService;
pub use supplement::SupplementService;
pub use withdraw::WithdrawService;
