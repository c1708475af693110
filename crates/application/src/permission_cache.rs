//! Durable, TTL-based cache of the template resolved per (user, tenant).
//!
//! Entries live in an injected [`CacheStore`] so several processes can share
//! them. Each process additionally keeps one live document subscription per
//! cached key; pushes overwrite the entry immediately, independent of the TTL,
//! and are announced on the [`InvalidationBus`].
//!
//! Store and collaborator failures never escape: reads degrade to a miss and
//! loads that cannot complete return `None`, which resolvers treat as "no
//! permissions".

mod entry;
mod live;


use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use tenantgate_core::{AppResult, TenantId, UserId};
use tenantgate_domain::{Membership, PermissionTemplate, TemplateId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

pub use entry::{CacheEntry, CachedTemplate};

use crate::config::PermissionCacheConfig;
use crate::invalidation_bus::{InvalidationBus, PermissionEvent};
use crate::permission_ports::{CacheStore, Clock, MembershipRepository, TemplateDocumentStore};

use entry::CacheKey;
use live::{LiveSubscription, accept_push};

/// Collaborators required by [`PermissionCache`].
#[derive(Clone)]
pub struct PermissionCacheDependencies {
    /// Durable key-value store.
    pub store: Arc<dyn CacheStore>,
    /// Template documents and their push feeds.
    pub documents: Arc<dyn TemplateDocumentStore>,
    /// Membership lookups for assigned template ids.
    pub memberships: Arc<dyn MembershipRepository>,
    /// Process-wide invalidation channel.
    pub bus: Arc<InvalidationBus>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// Per-process handle to the shared permission cache.
#[derive(Clone)]
pub struct PermissionCache {
    inner: Arc<CacheInner>,
}

pub(crate) struct CacheInner {
    dependencies: PermissionCacheDependencies,
    config: PermissionCacheConfig,
    hints: Mutex<HashMap<CacheKey, MembershipHint>>,
    loading: AsyncMutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
    live: Mutex<HashMap<CacheKey, LiveSubscription>>,
    consumers: Mutex<HashMap<CacheKey, usize>>,
}

/// Assignment seen by a caller, honored once and only within the TTL.
#[derive(Clone, Copy)]
struct MembershipHint {
    template_id: Option<TemplateId>,
    remembered_at: DateTime<Utc>,
}

impl PermissionCache {
    /// Creates a cache over the given collaborators.
    #[must_use]
    pub fn new(dependencies: PermissionCacheDependencies, config: PermissionCacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                dependencies,
                config,
                hints: Mutex::new(HashMap::new()),
                loading: AsyncMutex::new(HashMap::new()),
                live: Mutex::new(HashMap::new()),
                consumers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &PermissionCacheConfig {
        &self.inner.config
    }

    /// Reads a fresh entry without loading anything.
    ///
    /// Any stored entry, fresh or stale, gets its live subscription ensured.
    /// Stale and unreadable entries are reported as a miss.
    pub async fn get(&self, user_id: &UserId, tenant_id: TenantId) -> Option<CachedTemplate> {
        let key = CacheKey::new(user_id, tenant_id);
        let entry = self.read_entry(&key).await?;

        if let Some(template_id) = entry.template_id {
            self.ensure_live_subscription(&key, template_id).await;
        }

        if entry.is_expired(self.inner.config.ttl, self.now()) {
            debug!(user_id = %user_id, tenant_id = %tenant_id, "permission cache entry expired");
            return None;
        }

        debug!(user_id = %user_id, tenant_id = %tenant_id, "permission cache hit");
        Some(entry.to_cached())
    }

    /// Returns the cached template, loading it on a miss.
    ///
    /// Concurrent calls for the same key share one load. `None` means the
    /// assignment or the template could not be fetched.
    pub async fn get_or_load(
        &self,
        user_id: &UserId,
        tenant_id: TenantId,
    ) -> Option<CachedTemplate> {
        if let Some(hit) = self.get(user_id, tenant_id).await {
            return Some(hit);
        }

        let key = CacheKey::new(user_id, tenant_id);
        let permit = self.acquire_loading_guard(&key).await;

        let loaded = match self.get(user_id, tenant_id).await {
            Some(hit) => Some(hit),
            None => self.load(&key, true).await,
        };

        self.finish_loading(&key, permit).await;
        loaded
    }

    /// Writes an entry directly, as a load would.
    pub async fn set(
        &self,
        user_id: &UserId,
        tenant_id: TenantId,
        template: Option<PermissionTemplate>,
        template_id: Option<TemplateId>,
    ) {
        let key = CacheKey::new(user_id, tenant_id);
        let entry = CacheEntry::loaded(template_id, template, self.now());
        self.write_entry(&key, &entry).await;

        match template_id {
            Some(template_id) => self.ensure_live_subscription(&key, template_id).await,
            None => self.release_live_subscription(&key),
        }
    }

    /// Drops the entry, its hint, and its live subscription.
    ///
    /// Waits for an in-flight load of the key so its result cannot outlive
    /// the invalidation.
    pub async fn invalidate(&self, user_id: &UserId, tenant_id: TenantId) {
        let key = CacheKey::new(user_id, tenant_id);
        let permit = self.acquire_loading_guard(&key).await;
        self.forget_hint(&key);
        self.release_live_subscription(&key);

        let storage_key = key.storage_key(&self.inner.config.namespace);
        if let Err(error) = self.inner.dependencies.store.delete(&storage_key).await {
            warn!(
                user_id = %user_id,
                tenant_id = %tenant_id,
                error = %error,
                "failed to delete permission cache entry"
            );
        }

        self.finish_loading(&key, permit).await;
        debug!(user_id = %user_id, tenant_id = %tenant_id, "permission cache entry invalidated");
    }

    /// Reloads the entry regardless of its age.
    ///
    /// The membership is re-read from the collaborator so assignment changes
    /// are picked up.
    pub async fn refresh(&self, user_id: &UserId, tenant_id: TenantId) -> Option<CachedTemplate> {
        let key = CacheKey::new(user_id, tenant_id);
        let permit = self.acquire_loading_guard(&key).await;
        self.forget_hint(&key);
        let loaded = self.load(&key, false).await;
        self.finish_loading(&key, permit).await;
        loaded
    }

    /// Seeds assignment hints from memberships the caller already holds.
    ///
    /// A hint replaces the membership lookup of the next load for its key and
    /// is then dropped. Hints older than the TTL are ignored.
    pub fn remember_memberships(&self, memberships: &[Membership]) {
        let remembered_at = self.now();
        let mut hints = self.inner.hints.lock().unwrap_or_else(PoisonError::into_inner);
        for membership in memberships {
            hints.insert(
                CacheKey::new(&membership.user_id, membership.tenant_id),
                MembershipHint {
                    template_id: membership.assigned_template_id,
                    remembered_at,
                },
            );
        }
    }

    /// Fetches every membership of the user and keeps them as hints.
    pub async fn remember_memberships_for_user(
        &self,
        user_id: &UserId,
    ) -> AppResult<Vec<Membership>> {
        let memberships = self
            .inner
            .dependencies
            .memberships
            .list_memberships_for_user(user_id)
            .await?;
        self.remember_memberships(&memberships);
        Ok(memberships)
    }

    /// Registers one more consumer of a key.
    ///
    /// The live subscription and hint of a key outlive every consumer but the
    /// last; see [`PermissionCache::release`].
    pub fn acquire(&self, user_id: &UserId, tenant_id: TenantId) {
        *self
            .inner
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(CacheKey::new(user_id, tenant_id))
            .or_default() += 1;
    }

    /// Drops one consumer of a key.
    ///
    /// When no consumer remains, this process's live subscription and hint
    /// for the key are torn down. The durable entry stays for other sessions.
    pub fn release(&self, user_id: &UserId, tenant_id: TenantId) {
        let key = CacheKey::new(user_id, tenant_id);
        let remaining = {
            let mut consumers = self
                .inner
                .consumers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let remaining = consumers
                .get(&key)
                .map_or(0, |count| count.saturating_sub(1));
            if remaining == 0 {
                consumers.remove(&key);
            } else {
                consumers.insert(key.clone(), remaining);
            }
            remaining
        };

        if remaining == 0 {
            self.forget_hint(&key);
            self.release_live_subscription(&key);
        }
    }

    /// Closes the live subscription of a key nobody consumes any more.
    pub(crate) fn release_if_unused(&self, user_id: &UserId, tenant_id: TenantId) {
        let key = CacheKey::new(user_id, tenant_id);
        let in_use = self
            .inner
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key);
        if !in_use {
            self.release_live_subscription(&key);
        }
    }

    /// Returns how many consumers hold the key.
    #[must_use]
    pub fn consumer_count(&self, user_id: &UserId, tenant_id: TenantId) -> usize {
        self.inner
            .consumers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&CacheKey::new(user_id, tenant_id))
            .copied()
            .unwrap_or(0)
    }

    /// Deletes every entry under the namespace and returns how many were removed.
    pub async fn clear_all(&self) -> AppResult<usize> {
        let store = &self.inner.dependencies.store;
        let keys = store.scan_prefix(&self.inner.config.key_prefix()).await?;
        for key in &keys {
            store.delete(key).await?;
        }

        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.inner
            .hints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        debug!(removed = keys.len(), "permission cache cleared");
        Ok(keys.len())
    }

    /// Returns the raw stored entry, ignoring the TTL.
    pub async fn entry(&self, user_id: &UserId, tenant_id: TenantId) -> Option<CacheEntry> {
        self.read_entry(&CacheKey::new(user_id, tenant_id)).await
    }

    /// Returns the template id a live subscription is attached for.
    #[must_use]
    pub fn live_subscription(&self, user_id: &UserId, tenant_id: TenantId) -> Option<TemplateId> {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&CacheKey::new(user_id, tenant_id))
            .filter(|subscription| subscription.is_running())
            .map(|subscription| subscription.template_id)
    }

    async fn acquire_loading_guard(&self, key: &CacheKey) -> OwnedMutexGuard<()> {
        let guard = self
            .inner
            .loading
            .lock()
            .await
            .entry(key.clone())
            .or_default()
            .clone();

        match guard.clone().try_lock_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(
                    user_id = %key.user_id,
                    tenant_id = %key.tenant_id,
                    "permission load already in flight, awaiting it"
                );
                guard.lock_owned().await
            }
        }
    }

    async fn finish_loading(&self, key: &CacheKey, permit: OwnedMutexGuard<()>) {
        drop(permit);
        let mut loading = self.inner.loading.lock().await;
        if loading
            .get(key)
            .is_some_and(|guard| Arc::strong_count(guard) == 1)
        {
            loading.remove(key);
        }
    }

    async fn load(&self, key: &CacheKey, use_hint: bool) -> Option<CachedTemplate> {
        let template_id = match self.assigned_template_id(key, use_hint).await {
            Ok(template_id) => template_id,
            Err(error) => {
                warn!(
                    user_id = %key.user_id,
                    tenant_id = %key.tenant_id,
                    error = %error,
                    "failed to load membership for permission cache"
                );
                return None;
            }
        };

        let Some(template_id) = template_id else {
            let entry = CacheEntry::loaded(None, None, self.now());
            self.write_entry(key, &entry).await;
            self.release_live_subscription(key);
            debug!(
                user_id = %key.user_id,
                tenant_id = %key.tenant_id,
                "cached known-empty permission entry"
            );
            return Some(entry.to_cached());
        };

        // Attach the feed first so edits racing with the read are still pushed.
        self.ensure_live_subscription(key, template_id).await;

        let template = match self
            .inner
            .dependencies
            .documents
            .find_template(key.tenant_id, template_id)
            .await
        {
            Ok(template) => template.filter(|template| template.tenant_id == key.tenant_id),
            Err(error) => {
                warn!(
                    user_id = %key.user_id,
                    tenant_id = %key.tenant_id,
                    template_id = %template_id,
                    error = %error,
                    "failed to load permission template"
                );
                return None;
            }
        };

        if template.is_none() {
            debug!(
                tenant_id = %key.tenant_id,
                template_id = %template_id,
                "assigned permission template does not exist"
            );
        }

        let entry = CacheEntry::loaded(Some(template_id), template, self.now());
        self.write_entry(key, &entry).await;
        Some(entry.to_cached())
    }

    async fn assigned_template_id(
        &self,
        key: &CacheKey,
        use_hint: bool,
    ) -> AppResult<Option<TemplateId>> {
        let hint = self
            .inner
            .hints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Some(hint) = hint.filter(|_| use_hint) {
            let ttl = TimeDelta::from_std(self.inner.config.ttl).unwrap_or(TimeDelta::MAX);
            if self.now().signed_duration_since(hint.remembered_at) <= ttl {
                return Ok(hint.template_id);
            }
            debug!(
                user_id = %key.user_id,
                tenant_id = %key.tenant_id,
                "membership hint outlived the ttl, looking the membership up"
            );
        }

        let membership = self
            .inner
            .dependencies
            .memberships
            .find_membership(key.tenant_id, &key.user_id)
            .await?;

        Ok(membership.and_then(|membership| membership.assigned_template_id))
    }

    async fn ensure_live_subscription(&self, key: &CacheKey, template_id: TemplateId) {
        if self.has_running_subscription(key, template_id) {
            return;
        }

        let subscription = match self
            .inner
            .dependencies
            .documents
            .subscribe_template(key.tenant_id, template_id)
            .await
        {
            Ok(subscription) => subscription,
            Err(error) => {
                warn!(
                    tenant_id = %key.tenant_id,
                    template_id = %template_id,
                    error = %error,
                    "failed to open live template subscription"
                );
                return;
            }
        };

        let mut live = self
            .inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if live
            .get(key)
            .is_some_and(|existing| existing.template_id == template_id && existing.is_running())
        {
            return;
        }

        live.insert(
            key.clone(),
            LiveSubscription::spawn(
                Arc::downgrade(&self.inner),
                key.clone(),
                template_id,
                subscription,
            ),
        );
    }

    fn has_running_subscription(&self, key: &CacheKey, template_id: TemplateId) -> bool {
        self.inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|existing| existing.template_id == template_id && existing.is_running())
    }

    fn release_live_subscription(&self, key: &CacheKey) {
        let removed = self
            .inner
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        drop(removed);
    }

    fn forget_hint(&self, key: &CacheKey) {
        self.inner
            .hints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Applies a pushed document once any in-flight load of the key is done.
    pub(crate) async fn apply_push(
        &self,
        key: &CacheKey,
        template_id: TemplateId,
        change: Option<PermissionTemplate>,
    ) {
        let permit = self.acquire_loading_guard(key).await;
        self.write_push(key, template_id, change).await;
        self.finish_loading(key, permit).await;
    }

    async fn write_push(
        &self,
        key: &CacheKey,
        template_id: TemplateId,
        change: Option<PermissionTemplate>,
    ) {
        let previous = self.read_entry(key).await;
        if previous
            .as_ref()
            .is_some_and(|entry| entry.template_id != Some(template_id))
        {
            debug!(
                tenant_id = %key.tenant_id,
                template_id = %template_id,
                "ignoring push for a template no longer assigned"
            );
            return;
        }

        let now = self.now();
        let template = accept_push(key, template_id, change);
        let entry = CacheEntry {
            template_updated_at: Some(
                template
                    .as_ref()
                    .map(|template| template.updated_at)
                    .unwrap_or(now),
            ),
            template_snapshot: template,
            template_id: Some(template_id),
            cached_at: previous.map(|entry| entry.cached_at).unwrap_or(now),
        };
        self.write_entry(key, &entry).await;

        debug!(
            user_id = %key.user_id,
            tenant_id = %key.tenant_id,
            template_id = %template_id,
            deleted = entry.template_snapshot.is_none(),
            "applied live template push"
        );

        self.inner
            .dependencies
            .bus
            .publish(PermissionEvent::template_updated(key.tenant_id, template_id));
    }

    async fn read_entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        let storage_key = key.storage_key(&self.inner.config.namespace);
        let raw = match self.inner.dependencies.store.get(&storage_key).await {
            Ok(raw) => raw?,
            Err(error) => {
                warn!(
                    key = %storage_key,
                    error = %error,
                    "permission cache read failed, treating as miss"
                );
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => Some(entry),
            Err(error) => {
                warn!(
                    key = %storage_key,
                    error = %error,
                    "undecodable permission cache entry, treating as miss"
                );
                None
            }
        }
    }

    async fn write_entry(&self, key: &CacheKey, entry: &CacheEntry) {
        let storage_key = key.storage_key(&self.inner.config.namespace);
        let encoded = match serde_json::to_string(entry) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(key = %storage_key, error = %error, "failed to encode permission cache entry");
                return;
            }
        };

        if let Err(error) = self.inner.dependencies.store.set(&storage_key, encoded).await {
            warn!(
                key = %storage_key,
                error = %error,
                "permission cache write failed"
            );
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.dependencies.clock.now()
    }
}
