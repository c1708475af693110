use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tenantgate_core::AppError;

/// Membership role inside a tenant.
///
/// Variants are declared in ascending precedence so the derived ordering
/// matches `Owner > Admin > Manager > Staff`. Precedence only picks a default
/// role; it never grants capabilities once a template applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    /// Regular employee.
    Staff,
    /// Store or team manager.
    Manager,
    /// Tenant administrator.
    Admin,
    /// Tenant owner, always unrestricted.
    Owner,
}

impl Role {
    /// Returns a stable storage value for this role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staff => "staff",
            Self::Manager => "manager",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }

    /// Returns all roles in descending precedence.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[Role] = &[Role::Owner, Role::Admin, Role::Manager, Role::Staff];

        ALL
    }

    /// Parses a storage or legacy label into a role.
    pub fn parse(value: &str) -> Result<Self, AppError> {
        Self::from_str(value)
    }

    /// Picks the highest-precedence role among candidates.
    #[must_use]
    pub fn highest(roles: impl IntoIterator<Item = Self>) -> Option<Self> {
        roles.into_iter().max()
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(Self::Owner),
            "admin" | "administrator" => Ok(Self::Admin),
            "manager" | "gerant" => Ok(Self::Manager),
            "staff" | "employee" | "cashier" => Ok(Self::Staff),
            other => Err(AppError::Validation(format!("unknown role value '{other}'"))),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_str(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_owned()
    }
}

impl Display for Role {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}
