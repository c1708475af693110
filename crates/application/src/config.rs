use std::time::Duration;

use tenantgate_core::{AppError, AppResult};

/// Default staleness window for cached templates.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Default key namespace for durable cache entries.
pub const DEFAULT_CACHE_NAMESPACE: &str = "permission_cache";

/// Settings for the durable permission cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCacheConfig {
    /// Entries older than this are reloaded on the next read.
    pub ttl: Duration,
    /// Prefix shared by every entry key; bulk clears operate on it.
    pub namespace: String,
}

impl PermissionCacheConfig {
    /// Creates a validated configuration.
    pub fn new(ttl: Duration, namespace: impl Into<String>) -> AppResult<Self> {
        if ttl.is_zero() {
            return Err(AppError::Validation(
                "permission cache ttl must be greater than zero".to_owned(),
            ));
        }

        let namespace = namespace.into();
        let namespace = namespace.trim();
        if namespace.is_empty() || namespace.contains(':') {
            return Err(AppError::Validation(format!(
                "permission cache namespace '{namespace}' must be non-empty and must not contain ':'"
            )));
        }

        Ok(Self {
            ttl,
            namespace: namespace.to_owned(),
        })
    }

    /// Returns the key prefix used for bulk operations.
    #[must_use]
    pub fn key_prefix(&self) -> String {
        format!("{}:", self.namespace)
    }
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
            namespace: DEFAULT_CACHE_NAMESPACE.to_owned(),
        }
    }
}

/// Behavior for non-owner members without an assigned template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoTemplatePolicy {
    /// Grant nothing until a template is assigned.
    #[default]
    Deny,
    /// Fall back to the static per-role table.
    RoleDefaults,
}

impl NoTemplatePolicy {
    /// Parses a configuration value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim() {
            "deny" => Ok(Self::Deny),
            "role_defaults" => Ok(Self::RoleDefaults),
            other => Err(AppError::Validation(format!(
                "no-template policy must be either 'deny' or 'role_defaults', got '{other}'"
            ))),
        }
    }
}

/// Resolution policy shared by every resolver in a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResolverPolicy {
    /// What unassigned members receive.
    pub no_template: NoTemplatePolicy,
}
