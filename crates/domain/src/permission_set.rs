use serde::{Deserialize, Serialize};

use crate::grant::GrantSet;
use crate::resource::ResourceId;
use crate::role::Role;

/// Capability lists carried by a permission template.
///
/// Fields missing from a stored document decode as empty. `can_create` stays
/// `None` for templates written before create rights were tracked separately;
/// those fall back to the edit list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    /// Resources the bearer may open.
    #[serde(default)]
    pub can_view: GrantSet<ResourceId>,
    /// Resources the bearer may create records in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_create: Option<GrantSet<ResourceId>>,
    /// Resources the bearer may modify.
    #[serde(default)]
    pub can_edit: GrantSet<ResourceId>,
    /// Resources the bearer may delete records from.
    #[serde(default)]
    pub can_delete: GrantSet<ResourceId>,
    /// Roles the bearer may administer.
    #[serde(default)]
    pub can_manage_employees: GrantSet<Role>,
}

impl PermissionSet {
    /// Returns the set granting everything.
    #[must_use]
    pub fn universal() -> Self {
        Self {
            can_view: GrantSet::All,
            can_create: Some(GrantSet::All),
            can_edit: GrantSet::All,
            can_delete: GrantSet::All,
            can_manage_employees: GrantSet::All,
        }
    }

    /// Returns the set granting nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            can_view: GrantSet::none(),
            can_create: Some(GrantSet::none()),
            can_edit: GrantSet::none(),
            can_delete: GrantSet::none(),
            can_manage_employees: GrantSet::none(),
        }
    }

    /// Returns whether the resource may be viewed.
    #[must_use]
    pub fn allows_view(&self, resource: &str) -> bool {
        self.can_view.contains(&ResourceId::new(resource))
    }

    /// Returns whether records may be created in the resource.
    #[must_use]
    pub fn allows_create(&self, resource: &str) -> bool {
        let resource = ResourceId::new(resource);
        match &self.can_create {
            Some(can_create) => can_create.contains(&resource),
            None => self.can_edit.contains(&resource),
        }
    }

    /// Returns whether the resource may be modified.
    #[must_use]
    pub fn allows_edit(&self, resource: &str) -> bool {
        self.can_edit.contains(&ResourceId::new(resource))
    }

    /// Returns whether records may be deleted from the resource.
    #[must_use]
    pub fn allows_delete(&self, resource: &str) -> bool {
        self.can_delete.contains(&ResourceId::new(resource))
    }

    /// Returns whether employees may be administered.
    ///
    /// With a target role, checks that role; without one, checks that any
    /// role at all is manageable.
    #[must_use]
    pub fn allows_manage_employees(&self, target_role: Option<Role>) -> bool {
        match target_role {
            Some(role) => self.can_manage_employees.contains(&role),
            None => !self.can_manage_employees.is_empty(),
        }
    }

    /// Returns whether no capability is granted at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.can_view.is_empty()
            && self.can_create.as_ref().is_none_or(GrantSet::is_empty)
            && self.can_edit.is_empty()
            && self.can_delete.is_empty()
            && self.can_manage_employees.is_empty()
    }

    /// Returns the static per-role table used before templates existed.
    #[must_use]
    pub fn role_default(role: Role) -> Self {
        match role {
            Role::Owner => Self::universal(),
            Role::Admin => Self {
                can_view: GrantSet::All,
                can_create: Some(GrantSet::All),
                can_edit: GrantSet::All,
                can_delete: GrantSet::All,
                can_manage_employees: [Role::Manager, Role::Staff].into_iter().collect(),
            },
            Role::Manager => Self {
                can_view: GrantSet::from_values([
                    "dashboard",
                    "sales",
                    "customers",
                    "products_stocks",
                    "suppliers",
                    "purchases",
                    "expenses",
                    "reports",
                ]),
                can_create: Some(GrantSet::from_values([
                    "sales",
                    "customers",
                    "products_stocks",
                    "purchases",
                    "expenses",
                ])),
                can_edit: GrantSet::from_values([
                    "sales",
                    "customers",
                    "products_stocks",
                    "purchases",
                    "expenses",
                ]),
                can_delete: GrantSet::from_values(["sales"]),
                can_manage_employees: [Role::Staff].into_iter().collect(),
            },
            Role::Staff => Self {
                can_view: GrantSet::from_values(["dashboard", "sales", "customers", "products_stocks"]),
                can_create: Some(GrantSet::from_values(["sales", "customers"])),
                can_edit: GrantSet::from_values(["sales"]),
                can_delete: GrantSet::none(),
                can_manage_employees: GrantSet::none(),
            },
        }
    }

    /// Suggests a display label for a template carrying these permissions.
    ///
    /// Purely cosmetic: access decisions never read the result.
    #[must_use]
    pub fn suggested_base_role(&self) -> Role {
        let grants_any = |resource: &str| {
            let resource = ResourceId::new(resource);
            self.can_view.contains(&resource) || self.can_edit.contains(&resource)
        };

        if grants_any("settings") || grants_any("hr") {
            return Role::Admin;
        }

        let editable = self.can_edit.explicit_len().unwrap_or(usize::MAX);
        if grants_any("finance") || editable >= 5 {
            return Role::Manager;
        }

        Role::Staff
    }
}
