use std::sync::Weak;

use tenantgate_domain::{PermissionTemplate, TemplateId};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::permission_ports::TemplateSubscription;

use super::{CacheInner, CacheKey, PermissionCache};

/// Running push feed attached to one cache key.
pub(super) struct LiveSubscription {
    pub(super) template_id: TemplateId,
    task: JoinHandle<()>,
}

impl LiveSubscription {
    pub(super) fn spawn(
        cache: Weak<CacheInner>,
        key: CacheKey,
        template_id: TemplateId,
        subscription: TemplateSubscription,
    ) -> Self {
        let task = tokio::spawn(drain_subscription(cache, key, template_id, subscription));
        Self { template_id, task }
    }

    pub(super) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drain_subscription(
    cache: Weak<CacheInner>,
    key: CacheKey,
    template_id: TemplateId,
    mut subscription: TemplateSubscription,
) {
    debug!(
        user_id = %key.user_id,
        tenant_id = %key.tenant_id,
        template_id = %template_id,
        "live template subscription opened"
    );

    while let Some(change) = subscription.next_change().await {
        let Some(inner) = cache.upgrade() else {
            break;
        };
        PermissionCache { inner }
            .apply_push(&key, template_id, change)
            .await;
    }

    debug!(
        user_id = %key.user_id,
        tenant_id = %key.tenant_id,
        template_id = %template_id,
        "live template subscription ended"
    );
}

/// Keeps pushed documents only when they belong to the subscribed template.
pub(super) fn accept_push(
    key: &CacheKey,
    template_id: TemplateId,
    change: Option<PermissionTemplate>,
) -> Option<PermissionTemplate> {
    change.filter(|template| template.id == template_id && template.tenant_id == key.tenant_id)
}
