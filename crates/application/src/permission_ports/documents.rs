use async_trait::async_trait;
use tenantgate_core::{AppResult, TenantId};
use tenantgate_domain::{PermissionTemplate, TemplateId};
use tokio::sync::mpsc;

type CancelHook = Box<dyn FnOnce() + Send>;

/// Live feed of one template document.
///
/// Each item is the current document, or `None` once it was deleted. Dropping
/// the subscription (or calling [`TemplateSubscription::cancel`]) runs the
/// adapter's cancellation hook exactly once.
pub struct TemplateSubscription {
    updates: mpsc::UnboundedReceiver<Option<PermissionTemplate>>,
    on_cancel: Option<CancelHook>,
}

impl TemplateSubscription {
    /// Creates a subscription with a cancellation hook.
    #[must_use]
    pub fn new(
        updates: mpsc::UnboundedReceiver<Option<PermissionTemplate>>,
        on_cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            updates,
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Creates a subscription whose producer needs no teardown.
    #[must_use]
    pub fn detached(updates: mpsc::UnboundedReceiver<Option<PermissionTemplate>>) -> Self {
        Self {
            updates,
            on_cancel: None,
        }
    }

    /// Waits for the next change; `None` means the feed has ended.
    pub async fn next_change(&mut self) -> Option<Option<PermissionTemplate>> {
        self.updates.recv().await
    }

    /// Closes the feed.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for TemplateSubscription {
    fn drop(&mut self) {
        self.updates.close();
        if let Some(on_cancel) = self.on_cancel.take() {
            on_cancel();
        }
    }
}

/// Port for the document store holding permission templates.
#[async_trait]
pub trait TemplateDocumentStore: Send + Sync {
    /// Finds one template in tenant scope.
    async fn find_template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> AppResult<Option<PermissionTemplate>>;

    /// Lists every template of a tenant.
    async fn list_templates(&self, tenant_id: TenantId) -> AppResult<Vec<PermissionTemplate>>;

    /// Inserts a new template document.
    async fn insert_template(&self, template: PermissionTemplate) -> AppResult<()>;

    /// Replaces an existing template document.
    async fn replace_template(&self, template: PermissionTemplate) -> AppResult<()>;

    /// Deletes a template; returns whether a document was removed.
    async fn delete_template(&self, tenant_id: TenantId, template_id: TemplateId)
    -> AppResult<bool>;

    /// Opens a push feed for one template document.
    async fn subscribe_template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> AppResult<TemplateSubscription>;
}
