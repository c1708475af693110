use async_trait::async_trait;
use tenantgate_core::{AppResult, TenantId, UserId};
use tenantgate_domain::{Membership, TemplateId};

/// Port for the tenant-membership collaborator.
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// Finds the membership linking a user to a tenant.
    async fn find_membership(
        &self,
        tenant_id: TenantId,
        user_id: &UserId,
    ) -> AppResult<Option<Membership>>;

    /// Lists every membership of a user across tenants.
    async fn list_memberships_for_user(&self, user_id: &UserId) -> AppResult<Vec<Membership>>;

    /// Replaces the assigned template of a membership.
    ///
    /// Returns `false` when no membership exists for the pair.
    async fn set_assigned_template(
        &self,
        tenant_id: TenantId,
        user_id: &UserId,
        template_id: Option<TemplateId>,
    ) -> AppResult<bool>;
}
