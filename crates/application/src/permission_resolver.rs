//! Per-session permission answers backed by the shared cache.
//!
//! A resolver is opened for one (user, tenant) session. It listens on the
//! [`InvalidationBus`] and, once a matching event arrives, refreshes through
//! the cache on the next check. Every failure path answers with the empty
//! set.

mod effective;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tenantgate_core::{TenantId, UserId};
use tenantgate_domain::{Membership, PermissionSet, Role, TemplateId};
use tracing::debug;

pub use effective::{EffectivePermissions, PermissionSource};

use crate::config::{NoTemplatePolicy, ResolverPolicy};
use crate::invalidation_bus::{InvalidationBus, ListenerId};
use crate::permission_cache::{CachedTemplate, PermissionCache};

/// Identity of the session a resolver answers for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Signed-in user.
    pub user_id: UserId,
    /// Active tenant.
    pub tenant_id: TenantId,
    /// Ownership flag carried by the session itself.
    pub is_owner: bool,
    /// Membership already loaded by the session, if any.
    pub membership: Option<Membership>,
}

impl SessionContext {
    /// Returns whether the session belongs to the tenant owner.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.is_owner || self.membership.as_ref().is_some_and(Membership::is_owner)
    }

    fn role(&self) -> Option<Role> {
        self.membership.as_ref().map(|membership| membership.role)
    }
}

struct ResolverState {
    alive: AtomicBool,
    stale: AtomicBool,
    tracked_template: Mutex<Option<TemplateId>>,
}

impl ResolverState {
    fn tracked_template(&self) -> Option<TemplateId> {
        *self
            .tracked_template
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, template_id: Option<TemplateId>) {
        *self
            .tracked_template
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = template_id;
    }
}

/// Answers permission checks for one session.
pub struct PermissionResolver {
    session: SessionContext,
    cache: PermissionCache,
    bus: Arc<InvalidationBus>,
    policy: ResolverPolicy,
    state: Arc<ResolverState>,
    listener: Mutex<Option<ListenerId>>,
    resolved: Mutex<Option<EffectivePermissions>>,
}

impl PermissionResolver {
    /// Opens a resolver and registers its invalidation listener.
    #[must_use]
    pub fn open(
        session: SessionContext,
        cache: PermissionCache,
        bus: Arc<InvalidationBus>,
        policy: ResolverPolicy,
    ) -> Self {
        let state = Arc::new(ResolverState {
            alive: AtomicBool::new(true),
            stale: AtomicBool::new(false),
            tracked_template: Mutex::new(
                session
                    .membership
                    .as_ref()
                    .and_then(|membership| membership.assigned_template_id),
            ),
        });

        let listener = if session.is_owner() {
            None
        } else {
            cache.acquire(&session.user_id, session.tenant_id);
            if let Some(membership) = &session.membership {
                cache.remember_memberships(std::slice::from_ref(membership));
            }

            let tenant_id = session.tenant_id;
            let listener_state = state.clone();
            Some(bus.subscribe(move |event| {
                if event.affects(tenant_id, listener_state.tracked_template()) {
                    listener_state.stale.store(true, Ordering::SeqCst);
                }
            }))
        };

        debug!(
            user_id = %session.user_id,
            tenant_id = %session.tenant_id,
            owner = session.is_owner(),
            "permission resolver opened"
        );

        Self {
            session,
            cache,
            bus,
            policy,
            state,
            listener: Mutex::new(listener),
            resolved: Mutex::new(None),
        }
    }

    /// Returns the session this resolver answers for.
    #[must_use]
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Returns the last resolved set without loading.
    #[must_use]
    pub fn effective_permissions(&self) -> Option<EffectivePermissions> {
        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns whether the resolver was marked stale by an invalidation.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.state.stale.load(Ordering::SeqCst)
    }

    /// Returns whether [`PermissionResolver::close`] has not run yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.alive.load(Ordering::SeqCst)
    }

    /// Resolves the session's effective permissions.
    pub async fn resolve(&self) -> EffectivePermissions {
        if !self.is_open() {
            return EffectivePermissions::denied(PermissionSource::Unavailable);
        }

        if self.session.is_owner() {
            return self.remember(EffectivePermissions::owner());
        }

        let user_id = &self.session.user_id;
        let tenant_id = self.session.tenant_id;
        let cached = if self.state.stale.swap(false, Ordering::SeqCst) {
            debug!(user_id = %user_id, tenant_id = %tenant_id, "re-resolving after invalidation");
            let refreshed = self.cache.refresh(user_id, tenant_id).await;
            if refreshed.is_none() {
                // Retry the refresh next time instead of serving the old entry.
                self.state.stale.store(true, Ordering::SeqCst);
            }
            refreshed
        } else {
            self.cache.get_or_load(user_id, tenant_id).await
        };

        if !self.is_open() {
            // The load may have reopened a live subscription after close.
            self.cache.release_if_unused(user_id, tenant_id);
            debug!(user_id = %user_id, tenant_id = %tenant_id, "discarding late permission result");
            return EffectivePermissions::denied(PermissionSource::Unavailable);
        }

        let effective = self.from_cached(cached);
        self.remember(effective)
    }

    /// Returns whether the resource may be viewed.
    pub async fn can_access(&self, resource: &str) -> bool {
        self.resolve().await.can_access(resource)
    }

    /// Returns whether records may be created in the resource.
    pub async fn can_create(&self, resource: &str) -> bool {
        self.resolve().await.can_create(resource)
    }

    /// Returns whether the resource may be modified.
    pub async fn can_edit(&self, resource: &str) -> bool {
        self.resolve().await.can_edit(resource)
    }

    /// Returns whether records may be deleted from the resource.
    pub async fn can_delete(&self, resource: &str) -> bool {
        self.resolve().await.can_delete(resource)
    }

    /// Returns whether employees (of the given role) may be administered.
    pub async fn can_manage_employees(&self, target_role: Option<Role>) -> bool {
        self.resolve().await.can_manage_employees(target_role)
    }

    /// Returns whether permission templates may be managed.
    pub async fn can_manage_templates(&self) -> bool {
        self.resolve().await.can_manage_templates()
    }

    /// Tears the resolver down. Idempotent.
    ///
    /// Loads still in flight finish but their result is dropped.
    pub fn close(&self) {
        if !self.state.alive.swap(false, Ordering::SeqCst) {
            return;
        }

        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(listener) = listener {
            self.bus.unsubscribe(listener);
            self.cache
                .release(&self.session.user_id, self.session.tenant_id);
        }

        self.resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        debug!(
            user_id = %self.session.user_id,
            tenant_id = %self.session.tenant_id,
            "permission resolver closed"
        );
    }

    fn from_cached(&self, cached: Option<CachedTemplate>) -> EffectivePermissions {
        let Some(cached) = cached else {
            self.state.track(None);
            return EffectivePermissions::denied(PermissionSource::Unavailable);
        };
        self.state.track(cached.template_id);

        match (cached.template_id, cached.template) {
            (Some(template_id), Some(template)) => EffectivePermissions::granted(
                template.permissions,
                PermissionSource::Template(template_id),
            ),
            (Some(template_id), None) => {
                EffectivePermissions::denied(PermissionSource::DanglingTemplate(template_id))
            }
            (None, _) => self.unassigned(),
        }
    }

    fn unassigned(&self) -> EffectivePermissions {
        match (self.policy.no_template, self.session.role()) {
            (NoTemplatePolicy::RoleDefaults, Some(role)) => EffectivePermissions::granted(
                PermissionSet::role_default(role),
                PermissionSource::RoleDefault(role),
            ),
            _ => EffectivePermissions::denied(PermissionSource::Unassigned),
        }
    }

    fn remember(&self, effective: EffectivePermissions) -> EffectivePermissions {
        let mut resolved = self
            .resolved
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.is_open() {
            *resolved = Some(effective.clone());
        }
        effective
    }
}

impl Drop for PermissionResolver {
    fn drop(&mut self) {
        self.close();
    }
}
