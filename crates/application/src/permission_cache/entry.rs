use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tenantgate_core::{TenantId, UserId};
use tenantgate_domain::{PermissionTemplate, TemplateId};

/// Cache key for one session scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    pub(crate) user_id: UserId,
    pub(crate) tenant_id: TenantId,
}

impl CacheKey {
    pub(crate) fn new(user_id: &UserId, tenant_id: TenantId) -> Self {
        Self {
            user_id: user_id.clone(),
            tenant_id,
        }
    }

    pub(crate) fn storage_key(&self, namespace: &str) -> String {
        format!("{namespace}:{}:{}", self.user_id, self.tenant_id)
    }
}

/// Template resolved for one (user, tenant) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTemplate {
    /// Template the membership points at; `None` when nothing is assigned.
    pub template_id: Option<TemplateId>,
    /// Template document; `None` when unassigned or dangling.
    pub template: Option<PermissionTemplate>,
}

/// Persisted cache document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Template as it was last observed.
    pub template_snapshot: Option<PermissionTemplate>,
    /// Assigned template id; together with an empty snapshot, `None` marks a
    /// member known to have no template.
    pub template_id: Option<TemplateId>,
    /// When the entry was loaded; the TTL is measured from here.
    pub cached_at: DateTime<Utc>,
    /// Last change seen for the template, by load or by live push.
    pub template_updated_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub(crate) fn loaded(
        template_id: Option<TemplateId>,
        template: Option<PermissionTemplate>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            template_updated_at: template.as_ref().map(|template| template.updated_at),
            template_snapshot: template,
            template_id,
            cached_at: now,
        }
    }

    /// Returns whether the entry is older than the TTL.
    #[must_use]
    pub fn is_expired(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> bool {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        now.signed_duration_since(self.cached_at) > ttl
    }

    /// Returns whether this is the known-empty marker.
    #[must_use]
    pub fn is_known_empty(&self) -> bool {
        self.template_id.is_none() && self.template_snapshot.is_none()
    }

    pub(crate) fn to_cached(&self) -> CachedTemplate {
        CachedTemplate {
            template_id: self.template_id,
            template: self.template_snapshot.clone(),
        }
    }
}
