mod cache_store;
mod clock;
mod documents;
mod memberships;

pub use cache_store::CacheStore;
pub use clock::Clock;
pub use documents::{TemplateDocumentStore, TemplateSubscription};
pub use memberships::MembershipRepository;
