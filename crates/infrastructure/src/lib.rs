//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod in_memory_cache_store;
mod in_memory_membership_repository;
mod in_memory_template_document_store;
mod postgres_membership_repository;
mod postgres_template_document_store;
mod redis_cache_store;
mod system_clock;


pub use in_memory_cache_store::InMemoryCacheStore;
pub use in_memory_membership_repository::InMemoryMembershipRepository;
pub use in_memory_template_document_store::InMemoryTemplateDocumentStore;
pub use postgres_membership_repository::PostgresMembershipRepository;
pub use postgres_template_document_store::{
    PostgresTemplateDocumentStore, TEMPLATE_CHANGES_CHANNEL,
};
pub use redis_cache_store::RedisCacheStore;
pub use system_clock::SystemClock;
