//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod grant;
mod membership;
mod permission_set;
pub mod resource;
mod role;
mod template;

pub use grant::{GrantItem, GrantSet};
pub use membership::Membership;
pub use permission_set::PermissionSet;
pub use resource::{ALL_RESOURCES, ResourceId};
pub use role::Role;
pub use template::{PermissionTemplate, TemplateId};
