use serde::Serialize;
use tenantgate_domain::{PermissionSet, Role, TemplateId};

/// Where an effective permission set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PermissionSource {
    /// Tenant owner; templates are never consulted.
    Owner,
    /// Assigned template.
    Template(TemplateId),
    /// Static table for the member's role, used only when configured.
    RoleDefault(Role),
    /// No template assigned.
    Unassigned,
    /// Assigned template no longer exists.
    DanglingTemplate(TemplateId),
    /// Assignment or template could not be fetched.
    Unavailable,
}

/// Capabilities of one session together with their origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePermissions {
    permissions: PermissionSet,
    source: PermissionSource,
}

impl EffectivePermissions {
    pub(crate) fn owner() -> Self {
        Self {
            permissions: PermissionSet::universal(),
            source: PermissionSource::Owner,
        }
    }

    pub(crate) fn granted(permissions: PermissionSet, source: PermissionSource) -> Self {
        Self {
            permissions,
            source,
        }
    }

    pub(crate) fn denied(source: PermissionSource) -> Self {
        Self {
            permissions: PermissionSet::empty(),
            source,
        }
    }

    /// Returns the underlying set.
    #[must_use]
    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    /// Returns where the set came from.
    #[must_use]
    pub fn source(&self) -> PermissionSource {
        self.source
    }

    /// Returns whether the resource may be viewed.
    #[must_use]
    pub fn can_access(&self, resource: &str) -> bool {
        self.permissions.allows_view(resource)
    }

    /// Returns whether records may be created in the resource.
    #[must_use]
    pub fn can_create(&self, resource: &str) -> bool {
        self.permissions.allows_create(resource)
    }

    /// Returns whether the resource may be modified.
    #[must_use]
    pub fn can_edit(&self, resource: &str) -> bool {
        self.permissions.allows_edit(resource)
    }

    /// Returns whether records may be deleted from the resource.
    #[must_use]
    pub fn can_delete(&self, resource: &str) -> bool {
        self.permissions.allows_delete(resource)
    }

    /// Returns whether employees (of the given role) may be administered.
    #[must_use]
    pub fn can_manage_employees(&self, target_role: Option<Role>) -> bool {
        self.permissions.allows_manage_employees(target_role)
    }

    /// Returns whether templates may be created, edited, and assigned.
    #[must_use]
    pub fn can_manage_templates(&self) -> bool {
        self.source == PermissionSource::Owner || self.permissions.allows_edit("permissions")
    }
}
