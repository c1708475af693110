use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use tenantgate_application::MembershipRepository;
use tenantgate_core::{AppError, AppResult, TenantId, UserId};
use tenantgate_domain::{Membership, Role, TemplateId};
use uuid::Uuid;


/// PostgreSQL-backed tenant membership repository.
#[derive(Clone)]
pub struct PostgresMembershipRepository {
    pool: PgPool,
}

impl PostgresMembershipRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Inserts a membership or updates its role and assignment.
    pub async fn save_membership(&self, membership: &Membership) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_memberships (tenant_id, user_id, role, assigned_template_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, user_id)
            DO UPDATE SET role = EXCLUDED.role,
                          assigned_template_id = EXCLUDED.assigned_template_id
            "#,
        )
        .bind(membership.tenant_id.as_uuid())
        .bind(membership.user_id.as_str())
        .bind(membership.role.as_str())
        .bind(membership.assigned_template_id.map(|template_id| template_id.as_uuid()))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to save tenant membership: {error}"))
        })?;

        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct MembershipRow {
    tenant_id: Uuid,
    user_id: String,
    role: String,
    assigned_template_id: Option<Uuid>,
}

impl MembershipRow {
    fn into_membership(self) -> AppResult<Membership> {
        let role = Role::parse(self.role.as_str()).map_err(|error| {
            AppError::Internal(format!(
                "failed to decode role of membership '{}' in tenant '{}': {error}",
                self.user_id, self.tenant_id
            ))
        })?;

        Ok(Membership {
            user_id: UserId::new(self.user_id)?,
            tenant_id: TenantId::from_uuid(self.tenant_id),
            role,
            assigned_template_id: self.assigned_template_id.map(TemplateId::from_uuid),
        })
    }
}

#[async_trait]
impl MembershipRepository for PostgresMembershipRepository {
    async fn find_membership(
        &self,
        tenant_id: TenantId,
        user_id: &UserId,
    ) -> AppResult<Option<Membership>> {
        let row = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT tenant_id, user_id, role, assigned_template_id
            FROM tenant_memberships
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to load tenant membership: {error}"))
        })?;

        row.map(MembershipRow::into_membership).transpose()
    }

    async fn list_memberships_for_user(&self, user_id: &UserId) -> AppResult<Vec<Membership>> {
        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT tenant_id, user_id, role, assigned_template_id
            FROM tenant_memberships
            WHERE user_id = $1
            ORDER BY tenant_id
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to list tenant memberships: {error}"))
        })?;

        rows.into_iter()
            .map(MembershipRow::into_membership)
            .collect()
    }

    async fn set_assigned_template(
        &self,
        tenant_id: TenantId,
        user_id: &UserId,
        template_id: Option<TemplateId>,
    ) -> AppResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE tenant_memberships
            SET assigned_template_id = $3
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(user_id.as_str())
        .bind(template_id.map(|template_id| template_id.as_uuid()))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to assign permission template: {error}"))
        })?;

        Ok(updated.rows_affected() > 0)
    }
}
