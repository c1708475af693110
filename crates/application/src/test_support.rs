//! Hand-written fakes for application tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tenantgate_core::{AppError, AppResult, TenantId, UserId};
use tenantgate_domain::{GrantSet, Membership, PermissionSet, PermissionTemplate, Role, TemplateId};
use tokio::sync::{Mutex, mpsc};

use crate::config::PermissionCacheConfig;
use crate::invalidation_bus::InvalidationBus;
use crate::permission_cache::{PermissionCache, PermissionCacheDependencies};
use crate::permission_ports::{
    CacheStore, Clock, MembershipRepository, TemplateDocumentStore, TemplateSubscription,
};

pub(crate) fn user(value: &str) -> UserId {
    match UserId::new(value) {
        Ok(user_id) => user_id,
        Err(error) => panic!("invalid test user id '{value}': {error}"),
    }
}

pub(crate) fn view_permissions(resources: &[&str]) -> PermissionSet {
    PermissionSet {
        can_view: GrantSet::from_values(resources),
        ..PermissionSet::empty()
    }
}

pub(crate) fn template(
    tenant_id: TenantId,
    name: &str,
    permissions: PermissionSet,
    now: DateTime<Utc>,
) -> PermissionTemplate {
    PermissionTemplate {
        id: TemplateId::new(),
        tenant_id,
        name: name.to_owned(),
        description: None,
        base_role_label: None,
        permissions,
        created_by: user("owner"),
        created_at: now,
        updated_at: now,
    }
}

pub(crate) fn membership(
    tenant_id: TenantId,
    user_id: &UserId,
    role: Role,
    assigned_template_id: Option<TemplateId>,
) -> Membership {
    Membership {
        user_id: user_id.clone(),
        tenant_id,
        role,
        assigned_template_id,
    }
}

/// Lets spawned live-subscription tasks run.
pub(crate) async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

pub(crate) struct ManualClock {
    now: SyncMutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            now: SyncMutex::new(Utc::now()),
        }
    }

    pub(crate) fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += TimeDelta::from_std(duration).unwrap_or(TimeDelta::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Default)]
pub(crate) struct FakeCacheStore {
    pub(crate) values: Mutex<BTreeMap<String, String>>,
    pub(crate) fail_reads: AtomicBool,
    pub(crate) fail_writes: AtomicBool,
}

#[async_trait]
impl CacheStore for FakeCacheStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("read refused".to_owned()));
        }
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("write refused".to_owned()));
        }
        self.values.lock().await.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.values.lock().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> AppResult<Vec<String>> {
        Ok(self
            .values
            .lock()
            .await
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

type Subscribers = Arc<SyncMutex<Vec<(TemplateId, mpsc::UnboundedSender<Option<PermissionTemplate>>)>>>;

#[derive(Default)]
pub(crate) struct FakeDocumentStore {
    templates: Mutex<HashMap<TemplateId, PermissionTemplate>>,
    subscribers: Subscribers,
    pub(crate) find_calls: AtomicUsize,
    pub(crate) subscribe_calls: AtomicUsize,
    pub(crate) cancelled_subscriptions: Arc<AtomicUsize>,
    pub(crate) fail_finds: AtomicBool,
    pub(crate) slow_finds: AtomicBool,
    edit_after_find: SyncMutex<Option<PermissionTemplate>>,
}

impl FakeDocumentStore {
    pub(crate) async fn seed(&self, template: PermissionTemplate) {
        self.templates.lock().await.insert(template.id, template);
    }

    /// Simulates a change made by another process.
    pub(crate) fn push(&self, template_id: TemplateId, change: Option<PermissionTemplate>) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (subscribed_id, sender) in subscribers.iter() {
            if *subscribed_id == template_id {
                let _ = sender.send(change.clone());
            }
        }
    }

    /// Makes the next read return the current document, then commits `edit`
    /// from another process before the reader gets control back.
    pub(crate) fn edit_after_next_find(&self, edit: PermissionTemplate) {
        *self
            .edit_after_find
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(edit);
    }

    pub(crate) fn open_subscriptions(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, sender)| !sender.is_closed())
            .count()
    }
}

#[async_trait]
impl TemplateDocumentStore for FakeDocumentStore {
    async fn find_template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> AppResult<Option<PermissionTemplate>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        if self.slow_finds.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        if self.fail_finds.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("documents offline".to_owned()));
        }

        let mut templates = self.templates.lock().await;
        let found = templates
            .get(&template_id)
            .filter(|template| template.tenant_id == tenant_id)
            .cloned();

        let edit = self
            .edit_after_find
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(edit) = edit {
            templates.insert(edit.id, edit.clone());
            drop(templates);
            self.push(edit.id, Some(edit));
        }

        Ok(found)
    }

    async fn list_templates(&self, tenant_id: TenantId) -> AppResult<Vec<PermissionTemplate>> {
        let mut templates: Vec<PermissionTemplate> = self
            .templates
            .lock()
            .await
            .values()
            .filter(|template| template.tenant_id == tenant_id)
            .cloned()
            .collect();
        templates.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(templates)
    }

    async fn insert_template(&self, template: PermissionTemplate) -> AppResult<()> {
        self.templates.lock().await.insert(template.id, template);
        Ok(())
    }

    async fn replace_template(&self, template: PermissionTemplate) -> AppResult<()> {
        self.templates
            .lock()
            .await
            .insert(template.id, template.clone());
        self.push(template.id, Some(template));
        Ok(())
    }

    async fn delete_template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> AppResult<bool> {
        let mut templates = self.templates.lock().await;
        let removed = templates
            .get(&template_id)
            .is_some_and(|template| template.tenant_id == tenant_id);
        if removed {
            templates.remove(&template_id);
            drop(templates);
            self.push(template_id, None);
        }
        Ok(removed)
    }

    async fn subscribe_template(
        &self,
        _tenant_id: TenantId,
        template_id: TemplateId,
    ) -> AppResult<TemplateSubscription> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((template_id, sender));

        let cancelled = self.cancelled_subscriptions.clone();
        Ok(TemplateSubscription::new(receiver, move || {
            cancelled.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

#[derive(Default)]
pub(crate) struct FakeMembershipRepository {
    memberships: Mutex<HashMap<(TenantId, UserId), Membership>>,
    pub(crate) find_calls: AtomicUsize,
    pub(crate) fail_finds: AtomicBool,
}

impl FakeMembershipRepository {
    pub(crate) async fn seed(&self, membership: Membership) {
        self.memberships.lock().await.insert(
            (membership.tenant_id, membership.user_id.clone()),
            membership,
        );
    }
}

#[async_trait]
impl MembershipRepository for FakeMembershipRepository {
    async fn find_membership(
        &self,
        tenant_id: TenantId,
        user_id: &UserId,
    ) -> AppResult<Option<Membership>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_finds.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("memberships offline".to_owned()));
        }
        Ok(self
            .memberships
            .lock()
            .await
            .get(&(tenant_id, user_id.clone()))
            .cloned())
    }

    async fn list_memberships_for_user(&self, user_id: &UserId) -> AppResult<Vec<Membership>> {
        Ok(self
            .memberships
            .lock()
            .await
            .values()
            .filter(|membership| &membership.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn set_assigned_template(
        &self,
        tenant_id: TenantId,
        user_id: &UserId,
        template_id: Option<TemplateId>,
    ) -> AppResult<bool> {
        let mut memberships = self.memberships.lock().await;
        match memberships.get_mut(&(tenant_id, user_id.clone())) {
            Some(membership) => {
                membership.assigned_template_id = template_id;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Fully wired cache over fakes.
pub(crate) struct Harness {
    pub(crate) store: Arc<FakeCacheStore>,
    pub(crate) documents: Arc<FakeDocumentStore>,
    pub(crate) memberships: Arc<FakeMembershipRepository>,
    pub(crate) bus: Arc<InvalidationBus>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) cache: PermissionCache,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let store = Arc::new(FakeCacheStore::default());
        let documents = Arc::new(FakeDocumentStore::default());
        let memberships = Arc::new(FakeMembershipRepository::default());
        let bus = Arc::new(InvalidationBus::new());
        let clock = Arc::new(ManualClock::new());
        let cache = PermissionCache::new(
            PermissionCacheDependencies {
                store: store.clone(),
                documents: documents.clone(),
                memberships: memberships.clone(),
                bus: bus.clone(),
                clock: clock.clone(),
            },
            PermissionCacheConfig::default(),
        );

        Self {
            store,
            documents,
            memberships,
            bus,
            clock,
            cache,
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
