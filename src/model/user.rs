// =============================================================================
// User — account with the (available, used) deposit pair
// =============================================================================

use serde::{Deserialize, Serialize};

/// Platform role. Support and super-admin staff receive the risk summary
/// fan-out and may review funding requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Sales,
    Support,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Sales => "sales",
            Self::Support => "support",
            Self::SuperAdmin => "super_admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(Self::Customer),
            "sales" => Some(Self::Sales),
            "support" => Some(Self::Support),
            "super_admin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Support | Self::SuperAdmin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Pending,
    Active,
    Disabled,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// A platform account.
///
/// Invariant: `available_deposit >= 0` and `used_deposit >= 0` at every
/// observable state; `used_deposit` equals the sum of deposits over the
/// user's holding positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Unique login identifier.
    pub phone: String,
    pub role: Role,
    pub status: UserStatus,
    /// Owning salesperson, 0 = none.
    pub sales_id: i64,
    pub available_deposit: f64,
    pub used_deposit: f64,
    /// Distinct from the login credential; set separately, verified at settle.
    #[serde(skip_serializing)]
    pub pay_password_hash: Option<String>,
    pub auto_supplement_enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    pub fn has_pay_password(&self) -> bool {
        self.pay_password_hash.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_roundtrip_and_admin_check() {
        for s in ["customer", "sales", "support", "super_admin"] {
            assert_eq!(Role::parse(s).unwrap().as_str(), s);
        }
        assert!(Role::Support.is_admin());
        assert!(Role::SuperAdmin.is_admin());
        assert!(!Role::Customer.is_admin());
        assert!(!Role::Sales.is_admin());
        assert!(Role::parse("root").is_none());
    }

    #[test]
    fn status_roundtrip() {
        for s in ["pending", "active", "disabled"] {
            assert_eq!(UserStatus::parse(s).unwrap().as_str(), s);
        }
    }
}
