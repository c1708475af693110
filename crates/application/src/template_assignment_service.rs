use std::sync::Arc;

use tenantgate_core::{AppError, AppResult, TenantId, UserId};
use tenantgate_domain::{Membership, TemplateId};
use tracing::info;

use crate::permission_ports::MembershipRepository;

/// Points memberships at permission templates.
///
/// The template id is not checked against the document store; a dangling
/// assignment simply resolves to no permissions. The assigning session must
/// invalidate its own cache entry afterwards because live subscriptions track
/// template ids, not assignments.
#[derive(Clone)]
pub struct TemplateAssignmentService {
    memberships: Arc<dyn MembershipRepository>,
}

impl TemplateAssignmentService {
    /// Creates a new assignment service.
    #[must_use]
    pub fn new(memberships: Arc<dyn MembershipRepository>) -> Self {
        Self { memberships }
    }

    /// Replaces or clears the membership's template.
    pub async fn assign(
        &self,
        tenant_id: TenantId,
        user_id: &UserId,
        template_id: Option<TemplateId>,
    ) -> AppResult<Membership> {
        let Some(mut membership) = self
            .memberships
            .find_membership(tenant_id, user_id)
            .await?
        else {
            return Err(membership_not_found(tenant_id, user_id));
        };

        if !self
            .memberships
            .set_assigned_template(tenant_id, user_id, template_id)
            .await?
        {
            return Err(membership_not_found(tenant_id, user_id));
        }

        membership.assigned_template_id = template_id;
        match template_id {
            Some(template_id) => info!(
                tenant_id = %tenant_id,
                user_id = %user_id,
                template_id = %template_id,
                "permission template assigned"
            ),
            None => info!(
                tenant_id = %tenant_id,
                user_id = %user_id,
                "permission template unassigned"
            ),
        }

        Ok(membership)
    }
}

fn membership_not_found(tenant_id: TenantId, user_id: &UserId) -> AppError {
    AppError::MembershipNotFound {
        tenant_id,
        user_id: user_id.clone(),
    }
}
