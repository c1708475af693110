use std::sync::Arc;

use tenantgate_core::{AppError, AppResult, NonEmptyString, TenantId, UserId};
use tenantgate_domain::{GrantSet, PermissionSet, PermissionTemplate, ResourceId, Role, TemplateId};
use tracing::info;

use crate::invalidation_bus::{InvalidationBus, PermissionEvent};
use crate::permission_ports::{Clock, TemplateDocumentStore};


/// Input payload for creating a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTemplateInput {
    /// Display name; must not be blank.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Display-only role hint; derived from the permissions when absent.
    pub base_role_label: Option<Role>,
    /// Granted capabilities.
    pub permissions: PermissionSet,
}

/// Per-field replacement of a stored permission set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionsPatch {
    /// Replaces `canView`.
    pub can_view: Option<GrantSet<ResourceId>>,
    /// Replaces `canCreate`; `Some(None)` reverts to the edit fallback.
    pub can_create: Option<Option<GrantSet<ResourceId>>>,
    /// Replaces `canEdit`.
    pub can_edit: Option<GrantSet<ResourceId>>,
    /// Replaces `canDelete`.
    pub can_delete: Option<GrantSet<ResourceId>>,
    /// Replaces `canManageEmployees`.
    pub can_manage_employees: Option<GrantSet<Role>>,
}

impl PermissionsPatch {
    fn apply(self, permissions: &mut PermissionSet) {
        if let Some(can_view) = self.can_view {
            permissions.can_view = can_view;
        }
        if let Some(can_create) = self.can_create {
            permissions.can_create = can_create;
        }
        if let Some(can_edit) = self.can_edit {
            permissions.can_edit = can_edit;
        }
        if let Some(can_delete) = self.can_delete {
            permissions.can_delete = can_delete;
        }
        if let Some(can_manage_employees) = self.can_manage_employees {
            permissions.can_manage_employees = can_manage_employees;
        }
    }
}

/// Partial update of a template. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplatePatch {
    /// New display name.
    pub name: Option<String>,
    /// New description; `Some(None)` clears it.
    pub description: Option<Option<String>>,
    /// New role hint; `Some(None)` clears it.
    pub base_role_label: Option<Option<Role>>,
    /// Permission fields to replace.
    pub permissions: Option<PermissionsPatch>,
}

/// Tenant-scoped CRUD over permission templates.
///
/// Callers are trusted: checking that the actor may manage templates is the
/// job of whoever invokes the service.
#[derive(Clone)]
pub struct PermissionTemplateService {
    documents: Arc<dyn TemplateDocumentStore>,
    bus: Arc<InvalidationBus>,
    clock: Arc<dyn Clock>,
}

impl PermissionTemplateService {
    /// Creates a new template service.
    #[must_use]
    pub fn new(
        documents: Arc<dyn TemplateDocumentStore>,
        bus: Arc<InvalidationBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            documents,
            bus,
            clock,
        }
    }

    /// Creates and persists a template.
    pub async fn create(
        &self,
        tenant_id: TenantId,
        created_by: &UserId,
        input: CreateTemplateInput,
    ) -> AppResult<PermissionTemplate> {
        let name = template_name(input.name)?;
        let now = self.clock.now();
        let base_role_label = input
            .base_role_label
            .unwrap_or_else(|| input.permissions.suggested_base_role());

        let template = PermissionTemplate {
            id: TemplateId::new(),
            tenant_id,
            name,
            description: normalize_description(input.description),
            base_role_label: Some(base_role_label),
            permissions: input.permissions,
            created_by: created_by.clone(),
            created_at: now,
            updated_at: now,
        };

        self.documents.insert_template(template.clone()).await?;

        info!(
            tenant_id = %tenant_id,
            template_id = %template.id,
            user_id = %created_by,
            "permission template created"
        );
        Ok(template)
    }

    /// Applies a patch and announces the change.
    pub async fn update(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
        patch: TemplatePatch,
    ) -> AppResult<PermissionTemplate> {
        let mut template = self
            .documents
            .find_template(tenant_id, template_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "permission template '{template_id}' does not exist in tenant '{tenant_id}'"
                ))
            })?;

        if let Some(name) = patch.name {
            template.name = template_name(name)?;
        }
        if let Some(description) = patch.description {
            template.description = normalize_description(description);
        }

        let permissions_changed = patch.permissions.is_some();
        if let Some(permissions) = patch.permissions {
            permissions.apply(&mut template.permissions);
        }

        match patch.base_role_label {
            Some(label) => template.base_role_label = label,
            None if permissions_changed => {
                template.base_role_label = Some(template.permissions.suggested_base_role());
            }
            None => {}
        }

        template.updated_at = self.clock.now();
        self.documents.replace_template(template.clone()).await?;
        self.bus
            .publish(PermissionEvent::template_updated(tenant_id, template_id));

        info!(
            tenant_id = %tenant_id,
            template_id = %template_id,
            "permission template updated"
        );
        Ok(template)
    }

    /// Deletes a template and announces the change.
    ///
    /// Memberships still pointing at the id are left alone and resolve to no
    /// permissions. Deleting a missing template succeeds.
    pub async fn delete(&self, tenant_id: TenantId, template_id: TemplateId) -> AppResult<()> {
        let removed = self
            .documents
            .delete_template(tenant_id, template_id)
            .await?;
        self.bus
            .publish(PermissionEvent::template_updated(tenant_id, template_id));

        info!(
            tenant_id = %tenant_id,
            template_id = %template_id,
            removed,
            "permission template deleted"
        );
        Ok(())
    }

    /// Finds one template in tenant scope.
    pub async fn get_by_id(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> AppResult<Option<PermissionTemplate>> {
        self.documents.find_template(tenant_id, template_id).await
    }

    /// Lists the tenant's templates ordered by name.
    pub async fn list_by_tenant(&self, tenant_id: TenantId) -> AppResult<Vec<PermissionTemplate>> {
        let mut templates = self.documents.list_templates(tenant_id).await?;
        templates.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(templates)
    }
}

fn template_name(value: String) -> AppResult<String> {
    NonEmptyString::new(value)
        .map(String::from)
        .map_err(|_| AppError::Validation("template name must not be empty".to_owned()))
}

fn normalize_description(value: Option<String>) -> Option<String> {
    value
        .map(|description| description.trim().to_owned())
        .filter(|description| !description.is_empty())
}
