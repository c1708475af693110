use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tenantgate_application::{TemplateDocumentStore, TemplateSubscription};
use tenantgate_core::{AppError, AppResult, TenantId};
use tenantgate_domain::{PermissionTemplate, TemplateId};
use tokio::sync::{RwLock, mpsc};

struct Subscriber {
    id: u64,
    tenant_id: TenantId,
    template_id: TemplateId,
    sender: mpsc::UnboundedSender<Option<PermissionTemplate>>,
}

type Subscribers = Arc<Mutex<Vec<Subscriber>>>;

/// In-memory template documents with push feeds.
#[derive(Default)]
pub struct InMemoryTemplateDocumentStore {
    templates: RwLock<HashMap<TemplateId, PermissionTemplate>>,
    subscribers: Subscribers,
    next_subscriber_id: AtomicU64,
}

impl InMemoryTemplateDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of open push feeds.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn notify(&self, tenant_id: TenantId, template_id: TemplateId, change: Option<PermissionTemplate>) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|subscriber| {
            if subscriber.tenant_id != tenant_id || subscriber.template_id != template_id {
                return true;
            }
            subscriber.sender.send(change.clone()).is_ok()
        });
    }
}

#[async_trait]
impl TemplateDocumentStore for InMemoryTemplateDocumentStore {
    async fn find_template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> AppResult<Option<PermissionTemplate>> {
        Ok(self
            .templates
            .read()
            .await
            .get(&template_id)
            .filter(|template| template.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_templates(&self, tenant_id: TenantId) -> AppResult<Vec<PermissionTemplate>> {
        let mut templates: Vec<PermissionTemplate> = self
            .templates
            .read()
            .await
            .values()
            .filter(|template| template.tenant_id == tenant_id)
            .cloned()
            .collect();
        templates.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(templates)
    }

    async fn insert_template(&self, template: PermissionTemplate) -> AppResult<()> {
        let mut templates = self.templates.write().await;
        if templates.contains_key(&template.id) {
            return Err(AppError::Conflict(format!(
                "permission template '{}' already exists",
                template.id
            )));
        }
        templates.insert(template.id, template);
        Ok(())
    }

    async fn replace_template(&self, template: PermissionTemplate) -> AppResult<()> {
        {
            let mut templates = self.templates.write().await;
            match templates.get_mut(&template.id) {
                Some(stored) if stored.tenant_id == template.tenant_id => {
                    *stored = template.clone();
                }
                _ => {
                    return Err(AppError::NotFound(format!(
                        "permission template '{}' does not exist in tenant '{}'",
                        template.id, template.tenant_id
                    )));
                }
            }
        }

        self.notify(template.tenant_id, template.id, Some(template));
        Ok(())
    }

    async fn delete_template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> AppResult<bool> {
        let removed = {
            let mut templates = self.templates.write().await;
            let owned = templates
                .get(&template_id)
                .is_some_and(|template| template.tenant_id == tenant_id);
            if owned {
                templates.remove(&template_id);
            }
            owned
        };

        if removed {
            self.notify(tenant_id, template_id, None);
        }
        Ok(removed)
    }

    async fn subscribe_template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> AppResult<TemplateSubscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                tenant_id,
                template_id,
                sender,
            });

        let subscribers = self.subscribers.clone();
        Ok(TemplateSubscription::new(receiver, move || {
            subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|subscriber| subscriber.id != id);
        }))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tenantgate_application::TemplateDocumentStore;
    use tenantgate_core::{AppError, TenantId, UserId};
    use tenantgate_domain::{PermissionSet, PermissionTemplate, TemplateId};

    use super::InMemoryTemplateDocumentStore;

    fn template(tenant_id: TenantId, name: &str) -> PermissionTemplate {
        let now = Utc::now();
        let Ok(created_by) = UserId::new("owner") else {
            panic!("valid user id");
        };
        PermissionTemplate {
            id: TemplateId::new(),
            tenant_id,
            name: name.to_owned(),
            description: None,
            base_role_label: None,
            permissions: PermissionSet::empty(),
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn find_is_tenant_scoped() {
        let store = InMemoryTemplateDocumentStore::new();
        let tenant_id = TenantId::new();
        let stored = template(tenant_id, "Sales");
        assert!(store.insert_template(stored.clone()).await.is_ok());

        assert_eq!(
            store.find_template(tenant_id, stored.id).await.ok().flatten(),
            Some(stored.clone())
        );
        assert_eq!(
            store
                .find_template(TenantId::new(), stored.id)
                .await
                .ok()
                .flatten(),
            None
        );
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = InMemoryTemplateDocumentStore::new();
        let stored = template(TenantId::new(), "Sales");
        assert!(store.insert_template(stored.clone()).await.is_ok());

        let result = store.insert_template(stored).await;

        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn replace_and_delete_push_to_subscribers() {
        let store = InMemoryTemplateDocumentStore::new();
        let tenant_id = TenantId::new();
        let mut stored = template(tenant_id, "Sales");
        assert!(store.insert_template(stored.clone()).await.is_ok());
        let Ok(mut subscription) = store.subscribe_template(tenant_id, stored.id).await else {
            panic!("subscribe should succeed");
        };

        stored.name = "Sales floor".to_owned();
        assert!(store.replace_template(stored.clone()).await.is_ok());
        assert!(matches!(store.delete_template(tenant_id, stored.id).await, Ok(true)));

        assert_eq!(subscription.next_change().await, Some(Some(stored)));
        assert_eq!(subscription.next_change().await, Some(None));
    }

    #[tokio::test]
    async fn replace_of_missing_template_is_not_found() {
        let store = InMemoryTemplateDocumentStore::new();

        let result = store.replace_template(template(TenantId::new(), "Ghost")).await;

        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn cancelled_subscription_is_removed() {
        let store = InMemoryTemplateDocumentStore::new();
        let tenant_id = TenantId::new();
        let Ok(subscription) = store.subscribe_template(tenant_id, TemplateId::new()).await else {
            panic!("subscribe should succeed");
        };
        assert_eq!(store.subscriber_count(), 1);

        subscription.cancel();

        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn list_orders_by_name() {
        let store = InMemoryTemplateDocumentStore::new();
        let tenant_id = TenantId::new();
        for name in ["Stock", "Accounting"] {
            assert!(store.insert_template(template(tenant_id, name)).await.is_ok());
        }
        assert!(store.insert_template(template(TenantId::new(), "Other")).await.is_ok());

        let names: Vec<String> = store
            .list_templates(tenant_id)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|template| template.name)
            .collect();

        assert_eq!(names, vec!["Accounting", "Stock"]);
    }
}
