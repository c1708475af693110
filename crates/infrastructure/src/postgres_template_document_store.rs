use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgListener;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tenantgate_application::{TemplateDocumentStore, TemplateSubscription};
use tenantgate_core::{AppError, AppResult, TenantId, UserId};
use tenantgate_domain::{PermissionSet, PermissionTemplate, Role, TemplateId};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;


/// Notification channel carrying `<tenant>:<template>` payloads.
pub const TEMPLATE_CHANGES_CHANNEL: &str = "permission_template_changes";

/// PostgreSQL-backed template documents.
///
/// Every write announces itself with `pg_notify` in the same transaction;
/// each subscription holds its own `LISTEN` connection.
#[derive(Clone)]
pub struct PostgresTemplateDocumentStore {
    pool: PgPool,
}

impl PostgresTemplateDocumentStore {
    /// Creates a store with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct TemplateRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    description: Option<String>,
    base_role_label: Option<String>,
    permissions: serde_json::Value,
    created_by: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TemplateRow {
    fn into_template(self) -> AppResult<PermissionTemplate> {
        let permissions: PermissionSet = serde_json::from_value(self.permissions).map_err(|error| {
            AppError::Internal(format!(
                "failed to decode permissions of template '{}': {error}",
                self.id
            ))
        })?;
        let base_role_label = self
            .base_role_label
            .as_deref()
            .map(Role::parse)
            .transpose()
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to decode base role label of template '{}': {error}",
                    self.id
                ))
            })?;

        Ok(PermissionTemplate {
            id: TemplateId::from_uuid(self.id),
            tenant_id: TenantId::from_uuid(self.tenant_id),
            name: self.name,
            description: self.description,
            base_role_label,
            permissions,
            created_by: UserId::new(self.created_by)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl TemplateDocumentStore for PostgresTemplateDocumentStore {
    async fn find_template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> AppResult<Option<PermissionTemplate>> {
        fetch_template(&self.pool, tenant_id, template_id).await
    }

    async fn list_templates(&self, tenant_id: TenantId) -> AppResult<Vec<PermissionTemplate>> {
        let rows = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT id, tenant_id, name, description, base_role_label, permissions,
                   created_by, created_at, updated_at
            FROM permission_templates
            WHERE tenant_id = $1
            ORDER BY name, id
            "#,
        )
        .bind(tenant_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to list permission templates: {error}"))
        })?;

        rows.into_iter().map(TemplateRow::into_template).collect()
    }

    async fn insert_template(&self, template: PermissionTemplate) -> AppResult<()> {
        let permissions = encode_permissions(&template)?;
        let mut transaction = begin(&self.pool).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO permission_templates (
                id, tenant_id, name, description, base_role_label, permissions,
                created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(template.id.as_uuid())
        .bind(template.tenant_id.as_uuid())
        .bind(template.name.as_str())
        .bind(template.description.as_deref())
        .bind(template.base_role_label.map(|role| role.as_str()))
        .bind(permissions)
        .bind(template.created_by.as_str())
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to insert permission template: {error}"))
        })?;

        if inserted.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "permission template '{}' already exists",
                template.id
            )));
        }

        notify_change(&mut transaction, template.tenant_id, template.id).await?;
        commit(transaction).await
    }

    async fn replace_template(&self, template: PermissionTemplate) -> AppResult<()> {
        let permissions = encode_permissions(&template)?;
        let mut transaction = begin(&self.pool).await?;

        let updated = sqlx::query(
            r#"
            UPDATE permission_templates
            SET name = $3,
                description = $4,
                base_role_label = $5,
                permissions = $6,
                updated_at = $7
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(template.tenant_id.as_uuid())
        .bind(template.id.as_uuid())
        .bind(template.name.as_str())
        .bind(template.description.as_deref())
        .bind(template.base_role_label.map(|role| role.as_str()))
        .bind(permissions)
        .bind(template.updated_at)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to update permission template: {error}"))
        })?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "permission template '{}' does not exist in tenant '{}'",
                template.id, template.tenant_id
            )));
        }

        notify_change(&mut transaction, template.tenant_id, template.id).await?;
        commit(transaction).await
    }

    async fn delete_template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> AppResult<bool> {
        let mut transaction = begin(&self.pool).await?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM permission_templates
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(template_id.as_uuid())
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to delete permission template: {error}"))
        })?;

        let removed = deleted.rows_affected() > 0;
        if removed {
            notify_change(&mut transaction, tenant_id, template_id).await?;
        }
        commit(transaction).await?;

        Ok(removed)
    }

    async fn subscribe_template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> AppResult<TemplateSubscription> {
        let mut listener = PgListener::connect_with(&self.pool).await.map_err(|error| {
            AppError::StoreUnavailable(format!("failed to open template listener: {error}"))
        })?;
        listener
            .listen(TEMPLATE_CHANGES_CHANNEL)
            .await
            .map_err(|error| {
                AppError::StoreUnavailable(format!(
                    "failed to listen on '{TEMPLATE_CHANGES_CHANNEL}': {error}"
                ))
            })?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(forward_notifications(
            listener,
            self.pool.clone(),
            tenant_id,
            template_id,
            sender,
        ));

        Ok(TemplateSubscription::new(receiver, move || task.abort()))
    }
}

async fn fetch_template(
    pool: &PgPool,
    tenant_id: TenantId,
    template_id: TemplateId,
) -> AppResult<Option<PermissionTemplate>> {
    let row = sqlx::query_as::<_, TemplateRow>(
        r#"
        SELECT id, tenant_id, name, description, base_role_label, permissions,
               created_by, created_at, updated_at
        FROM permission_templates
        WHERE tenant_id = $1 AND id = $2
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(template_id.as_uuid())
    .fetch_optional(pool)
    .await
    .map_err(|error| {
        AppError::StoreUnavailable(format!(
            "failed to load permission template '{template_id}': {error}"
        ))
    })?;

    row.map(TemplateRow::into_template).transpose()
}

async fn forward_notifications(
    mut listener: PgListener,
    pool: PgPool,
    tenant_id: TenantId,
    template_id: TemplateId,
    sender: mpsc::UnboundedSender<Option<PermissionTemplate>>,
) {
    loop {
        let notification = tokio::select! {
            () = sender.closed() => break,
            notification = listener.recv() => notification,
        };

        let notification = match notification {
            Ok(notification) => notification,
            Err(error) => {
                warn!(
                    tenant_id = %tenant_id,
                    template_id = %template_id,
                    error = %error,
                    "template listener failed, ending live feed"
                );
                break;
            }
        };

        if parse_change_payload(notification.payload()) != Some((tenant_id, template_id)) {
            continue;
        }

        match fetch_template(&pool, tenant_id, template_id).await {
            Ok(change) => {
                if sender.send(change).is_err() {
                    break;
                }
            }
            Err(error) => warn!(
                tenant_id = %tenant_id,
                template_id = %template_id,
                error = %error,
                "failed to reload notified template"
            ),
        }
    }

    debug!(tenant_id = %tenant_id, template_id = %template_id, "template listener stopped");
}

async fn begin(pool: &PgPool) -> AppResult<Transaction<'static, Postgres>> {
    pool.begin()
        .await
        .map_err(|error| AppError::StoreUnavailable(format!("failed to begin transaction: {error}")))
}

async fn commit(transaction: Transaction<'static, Postgres>) -> AppResult<()> {
    transaction
        .commit()
        .await
        .map_err(|error| AppError::StoreUnavailable(format!("failed to commit transaction: {error}")))
}

async fn notify_change(
    transaction: &mut Transaction<'static, Postgres>,
    tenant_id: TenantId,
    template_id: TemplateId,
) -> AppResult<()> {
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(TEMPLATE_CHANGES_CHANNEL)
        .bind(change_payload(tenant_id, template_id))
        .execute(&mut **transaction)
        .await
        .map_err(|error| {
            AppError::StoreUnavailable(format!("failed to publish template change: {error}"))
        })?;

    Ok(())
}

fn encode_permissions(template: &PermissionTemplate) -> AppResult<serde_json::Value> {
    serde_json::to_value(&template.permissions).map_err(|error| {
        AppError::Internal(format!(
            "failed to encode permissions of template '{}': {error}",
            template.id
        ))
    })
}

fn change_payload(tenant_id: TenantId, template_id: TemplateId) -> String {
    format!("{tenant_id}:{template_id}")
}

fn parse_change_payload(payload: &str) -> Option<(TenantId, TemplateId)> {
    let (tenant_id, template_id) = payload.split_once(':')?;
    let tenant_id = Uuid::parse_str(tenant_id).ok()?;
    let template_id = Uuid::parse_str(template_id).ok()?;
    Some((
        TenantId::from_uuid(tenant_id),
        TemplateId::from_uuid(template_id),
    ))
}
