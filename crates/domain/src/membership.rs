use serde::{Deserialize, Serialize};
use tenantgate_core::{TenantId, UserId};

use crate::role::Role;
use crate::template::TemplateId;

/// Link between one user and one tenant.
///
/// `assigned_template_id` may dangle after the template is deleted; readers
/// treat a dangling reference as "no permissions".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    /// Member user.
    pub user_id: UserId,
    /// Tenant the membership belongs to.
    pub tenant_id: TenantId,
    /// Role inside the tenant.
    pub role: Role,
    /// Template currently assigned to the member, if any.
    #[serde(default)]
    pub assigned_template_id: Option<TemplateId>,
}

impl Membership {
    /// Returns whether the member owns the tenant.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.role == Role::Owner
    }
}
