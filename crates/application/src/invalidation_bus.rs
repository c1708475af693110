use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tenantgate_core::TenantId;
use tenantgate_domain::TemplateId;
use tracing::debug;

/// Event broadcast to every resolver in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PermissionEvent {
    /// A template was edited, pushed, or deleted.
    #[serde(rename_all = "camelCase")]
    TemplateUpdated {
        /// Tenant owning the template.
        tenant_id: TenantId,
        /// Changed template; `None` addresses every template of the tenant.
        template_id: Option<TemplateId>,
    },
}

impl PermissionEvent {
    /// Builds an event for one template.
    #[must_use]
    pub fn template_updated(tenant_id: TenantId, template_id: TemplateId) -> Self {
        Self::TemplateUpdated {
            tenant_id,
            template_id: Some(template_id),
        }
    }

    /// Returns whether a consumer tracking the template must re-resolve.
    #[must_use]
    pub fn affects(&self, tenant_id: TenantId, tracked_template: Option<TemplateId>) -> bool {
        match self {
            Self::TemplateUpdated {
                tenant_id: event_tenant,
                template_id,
            } => {
                *event_tenant == tenant_id
                    && template_id.is_none_or(|template_id| tracked_template == Some(template_id))
            }
        }
    }
}

/// Handle returned by [`InvalidationBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&PermissionEvent) + Send + Sync>;

/// Process-local, synchronous publish/subscribe channel.
///
/// The bus never removes listeners on its own; whoever subscribes must call
/// [`InvalidationBus::unsubscribe`].
#[derive(Default)]
pub struct InvalidationBus {
    next_id: AtomicU64,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
}

impl InvalidationBus {
    /// Creates a bus without listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn subscribe(&self, listener: impl Fn(&PermissionEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Deregisters a listener; returns whether it was registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    /// Delivers the event to every current listener before returning.
    ///
    /// Returns the number of listeners called.
    pub fn publish(&self, event: PermissionEvent) -> usize {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in &listeners {
            listener(&event);
        }

        debug!(?event, delivered = listeners.len(), "published permission event");
        listeners.len()
    }

    /// Returns the number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
