use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenantgate_core::{AppError, TenantId, UserId};
use uuid::Uuid;

use crate::permission_set::PermissionSet;
use crate::role::Role;

/// Unique identifier for a permission template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(Uuid);

impl TemplateId {
    /// Creates a new random template identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a template identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TemplateId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TemplateId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl FromStr for TemplateId {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(value.trim())
            .map(Self)
            .map_err(|error| AppError::Validation(format!("invalid template id '{value}': {error}")))
    }
}

/// Named, reusable permission set scoped to one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionTemplate {
    /// Stable template identifier.
    pub id: TemplateId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Display name, unique by convention only.
    pub name: String,
    /// Optional free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Display-only role hint shown next to the template name.
    #[serde(default)]
    pub base_role_label: Option<Role>,
    /// Granted capabilities.
    #[serde(default)]
    pub permissions: PermissionSet,
    /// User that created the template.
    pub created_by: UserId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
}

impl PermissionTemplate {
    /// Returns the stored label, or the heuristic suggestion when none is set.
    #[must_use]
    pub fn display_role(&self) -> Role {
        self.base_role_label
            .unwrap_or_else(|| self.permissions.suggested_base_role())
    }
}
