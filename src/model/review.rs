// =============================================================================
// Review records — deposit / withdrawal / supplement funding requests
// =============================================================================
//
// Deposits and withdrawals go through a pending -> approved | rejected
// review; an approved withdrawal is later marked paid with the transfer
// voucher. Supplements are synchronous: the submission itself executes the
// balance move, so the record is written already approved.
// =============================================================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Paid => "paid",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer top-up request awaiting admin review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    /// Payment channel the customer claims to have used.
    pub method: String,
    pub voucher_url: String,
    pub user_note: String,
    /// Receipt uploaded by the reviewing admin.
    pub receipt_voucher_url: String,
    pub status: ReviewStatus,
    pub reviewer_id: i64,
    pub review_note: String,
    pub reviewed_at: Option<i64>,
    pub created_at: i64,
}

impl DepositRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ReviewStatus::Pending
    }
}

/// Customer withdrawal request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub fee: f64,
    /// Amount actually transferred (`amount - fee`).
    pub actual_amount: f64,
    pub method: String,
    pub user_note: String,
    /// Transfer voucher stored at mark-paid time.
    pub payment_voucher_url: String,
    pub status: ReviewStatus,
    pub reviewer_id: i64,
    pub review_note: String,
    pub reviewed_at: Option<i64>,
    pub created_at: i64,
}

impl WithdrawRequest {
    pub fn is_pending(&self) -> bool {
        self.status == ReviewStatus::Pending
    }

    pub fn is_approved(&self) -> bool {
        self.status == ReviewStatus::Approved
    }
}

/// Position deposit top-up. Executed synchronously at submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplementRequest {
    pub id: i64,
    pub user_id: i64,
    pub position_id: i64,
    pub amount: f64,
    /// "auto" when issued by the risk engine, "manual" otherwise.
    pub method: String,
    pub status: ReviewStatus,
    pub created_at: i64,
}
