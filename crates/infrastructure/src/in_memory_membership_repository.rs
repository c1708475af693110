use std::collections::HashMap;

use async_trait::async_trait;
use tenantgate_application::MembershipRepository;
use tenantgate_core::{AppResult, TenantId, UserId};
use tenantgate_domain::{Membership, TemplateId};
use tokio::sync::RwLock;

/// In-memory membership records.
#[derive(Default)]
pub struct InMemoryMembershipRepository {
    memberships: RwLock<HashMap<(TenantId, UserId), Membership>>,
}

impl InMemoryMembershipRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a membership.
    pub async fn save_membership(&self, membership: Membership) {
        self.memberships.write().await.insert(
            (membership.tenant_id, membership.user_id.clone()),
            membership,
        );
    }
}

#[async_trait]
impl MembershipRepository for InMemoryMembershipRepository {
    async fn find_membership(
        &self,
        tenant_id: TenantId,
        user_id: &UserId,
    ) -> AppResult<Option<Membership>> {
        Ok(self
            .memberships
            .read()
            .await
            .get(&(tenant_id, user_id.clone()))
            .cloned())
    }

    async fn list_memberships_for_user(&self, user_id: &UserId) -> AppResult<Vec<Membership>> {
        let mut memberships: Vec<Membership> = self
            .memberships
            .read()
            .await
            .values()
            .filter(|membership| &membership.user_id == user_id)
            .cloned()
            .collect();
        memberships.sort_by_key(|membership| membership.tenant_id);
        Ok(memberships)
    }

    async fn set_assigned_template(
        &self,
        tenant_id: TenantId,
        user_id: &UserId,
        template_id: Option<TemplateId>,
    ) -> AppResult<bool> {
        let mut memberships = self.memberships.write().await;
        let Some(membership) = memberships.get_mut(&(tenant_id, user_id.clone())) else {
            return Ok(false);
        };

        membership.assigned_template_id = template_id;
        Ok(true)
    }
}
