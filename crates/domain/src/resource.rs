//! Catalog of protected resources.
//!
//! Resource identifiers are stable storage values referenced by permission
//! templates. Deprecated names from older templates are kept as aliases and
//! mapped onto their current identifier before any comparison.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Reserved wildcard meaning "every resource" (or "every role").
pub const ALL_RESOURCES: &str = "ALL";

const REGISTRY: &[(&str, &str)] = &[
    ("dashboard", "Dashboard"),
    ("sales", "Sales"),
    ("customers", "Customers"),
    ("products_stocks", "Products & stocks"),
    ("suppliers", "Suppliers"),
    ("purchases", "Purchases"),
    ("expenses", "Expenses"),
    ("finance", "Finance"),
    ("reports", "Reports"),
    ("hr", "Human resources"),
    ("settings", "Settings"),
    ("permissions", "Permission templates"),
];

const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("products", "products_stocks"),
    ("stocks", "products_stocks"),
    ("inventory", "products_stocks"),
    ("accounting", "finance"),
    ("staff", "hr"),
    ("employees", "hr"),
    ("clients", "customers"),
    ("providers", "suppliers"),
];

/// Returns whether the identifier is a current registry entry or the wildcard.
///
/// Legacy aliases are not valid on their own; normalize them first.
#[must_use]
pub fn is_valid_resource(id: &str) -> bool {
    id == ALL_RESOURCES || REGISTRY.iter().any(|(known, _)| *known == id)
}

/// Returns whether the identifier is a deprecated resource name.
#[must_use]
pub fn is_legacy_alias(id: &str) -> bool {
    LEGACY_ALIASES.iter().any(|(legacy, _)| *legacy == id)
}

/// Maps a deprecated resource name to its current identifier.
///
/// Unknown and already-current identifiers are returned unchanged, which makes
/// the mapping idempotent.
#[must_use]
pub fn normalize_legacy(id: &str) -> &str {
    LEGACY_ALIASES
        .iter()
        .find(|(legacy, _)| *legacy == id)
        .map(|(_, current)| *current)
        .unwrap_or(id)
}

/// Returns the human label for a resource, or the input for unknown ids.
#[must_use]
pub fn label(id: &str) -> &str {
    if id == ALL_RESOURCES {
        return "All resources";
    }

    let normalized = normalize_legacy(id);
    REGISTRY
        .iter()
        .find(|(known, _)| *known == normalized)
        .map(|(_, label)| *label)
        .unwrap_or(id)
}

/// Returns all registry identifiers in display order.
pub fn all_resources() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|(id, _)| *id)
}

/// Legacy-normalized resource identifier.
///
/// Identifiers outside the registry are accepted so templates written by newer
/// clients keep working; validity is a separate check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates a normalized identifier from a raw value.
    #[must_use]
    pub fn new(value: &str) -> Self {
        Self(normalize_legacy(value.trim()).to_owned())
    }

    /// Returns the normalized identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns whether the identifier is part of the registry.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        is_valid_resource(self.as_str())
    }

    /// Returns the human label.
    #[must_use]
    pub fn label(&self) -> &str {
        label(self.as_str())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self::new(value.as_str())
    }
}

impl From<ResourceId> for String {
    fn from(value: ResourceId) -> Self {
        value.0
    }
}

impl Display for ResourceId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}
