// =============================================================================
// Salesperson & CommissionRecord — settlement-time commission bookkeeping
// =============================================================================

use serde::{Deserialize, Serialize};

/// A salesperson owning a book of customers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Salesperson {
    pub id: i64,
    /// Linked platform account.
    pub user_id: i64,
    pub sales_code: String,
    pub name: String,
    /// Points earned per settled gram.
    pub commission_rate: f64,
    pub total_points: f64,
    pub month_points: f64,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Salesperson {
    pub fn add_points(&mut self, points: f64) {
        self.total_points += points;
        self.month_points += points;
    }
}

/// One commission entry, unique per settled position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: i64,
    pub salesperson_id: i64,
    /// Settled position; unique key for idempotency.
    pub position_id: i64,
    pub customer_id: i64,
    pub weight_g: f64,
    /// Rate snapshot at settlement time.
    pub commission_rate: f64,
    pub points: f64,
    pub settled_at: i64,
    pub created_at: i64,
}

/// `points = weight_g * rate`.
pub fn commission_points(weight_g: f64, rate: f64) -> f64 {
    weight_g * rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_are_weight_times_rate() {
        assert_eq!(commission_points(100.0, 0.5), 50.0);
        assert_eq!(commission_points(0.0, 0.5), 0.0);
    }

    #[test]
    fn add_points_tracks_total_and_month() {
        let mut s = Salesperson {
            id: 1,
            user_id: 2,
            sales_code: "S001".into(),
            name: "test".into(),
            commission_rate: 0.1,
            total_points: 5.0,
            month_points: 1.0,
            is_active: true,
            created_at: 0,
            updated_at: 0,
        };
        s.add_points(2.5);
        assert_eq!(s.total_points, 7.5);
        assert_eq!(s.month_points, 3.5);
    }
}
