//! Application services and ports.

#![forbid(unsafe_code)]

mod config;
mod invalidation_bus;
mod permission_cache;
mod permission_ports;
mod permission_resolver;
mod permission_template_service;
mod template_assignment_service;

#[cfg(test)]
mod test_support;

pub use config::{
    DEFAULT_CACHE_NAMESPACE, DEFAULT_CACHE_TTL, NoTemplatePolicy, PermissionCacheConfig,
    ResolverPolicy,
};
pub use invalidation_bus::{InvalidationBus, ListenerId, PermissionEvent};
pub use permission_cache::{
    CacheEntry, CachedTemplate, PermissionCache, PermissionCacheDependencies,
};
pub use permission_ports::{
    CacheStore, Clock, MembershipRepository, TemplateDocumentStore, TemplateSubscription,
};
pub use permission_resolver::{
    EffectivePermissions, PermissionResolver, PermissionSource, SessionContext,
};
pub use permission_template_service::{
    CreateTemplateInput, PermissionTemplateService, PermissionsPatch, TemplatePatch,
};
pub use template_assignment_service::TemplateAssignmentService;
