use std::collections::BTreeSet;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::resource::{ALL_RESOURCES, ResourceId};
use crate::role::Role;

/// Item type that can appear in a [`GrantSet`].
pub trait GrantItem: Clone + Ord {
    /// Parses a stored value; `None` drops the value from the set.
    fn parse_grant(value: &str) -> Option<Self>;

    /// Returns the stored value.
    fn grant_str(&self) -> &str;
}

impl GrantItem for ResourceId {
    fn parse_grant(value: &str) -> Option<Self> {
        let value = value.trim();
        (!value.is_empty()).then(|| Self::new(value))
    }

    fn grant_str(&self) -> &str {
        self.as_str()
    }
}

impl GrantItem for Role {
    fn parse_grant(value: &str) -> Option<Self> {
        Role::parse(value).ok()
    }

    fn grant_str(&self) -> &str {
        self.as_str()
    }
}

/// Set of granted items, or the universal set.
///
/// Stored as a JSON string array. An array containing `ALL` decodes to
/// [`GrantSet::All`] no matter what else it lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantSet<T> {
    /// Every item, including ones not known yet.
    All,
    /// Exactly the listed items.
    Only(BTreeSet<T>),
}

impl<T: GrantItem> GrantSet<T> {
    /// Returns the empty set.
    #[must_use]
    pub fn none() -> Self {
        Self::Only(BTreeSet::new())
    }

    /// Builds a set from stored values.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut items = BTreeSet::new();
        for value in values {
            let value = value.as_ref();
            if value.trim() == ALL_RESOURCES {
                return Self::All;
            }
            if let Some(item) = T::parse_grant(value) {
                items.insert(item);
            }
        }

        Self::Only(items)
    }

    /// Returns whether the item is granted.
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        match self {
            Self::All => true,
            Self::Only(items) => items.contains(item),
        }
    }

    /// Returns whether nothing is granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::All => false,
            Self::Only(items) => items.is_empty(),
        }
    }

    /// Returns whether this is the universal set.
    #[must_use]
    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Returns the number of explicit items, or `None` for the universal set.
    #[must_use]
    pub fn explicit_len(&self) -> Option<usize> {
        match self {
            Self::All => None,
            Self::Only(items) => Some(items.len()),
        }
    }

    /// Returns stored values in canonical order.
    #[must_use]
    pub fn to_values(&self) -> Vec<String> {
        match self {
            Self::All => vec![ALL_RESOURCES.to_owned()],
            Self::Only(items) => items
                .iter()
                .map(|item| item.grant_str().to_owned())
                .collect(),
        }
    }
}

impl<T: GrantItem> Default for GrantSet<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T: GrantItem> FromIterator<T> for GrantSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::Only(iter.into_iter().collect())
    }
}

impl<T: GrantItem> Serialize for GrantSet<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.collect_seq([ALL_RESOURCES]),
            Self::Only(items) => serializer.collect_seq(items.iter().map(GrantItem::grant_str)),
        }
    }
}

impl<'de, T: GrantItem> Deserialize<'de> for GrantSet<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<String>::deserialize(deserializer)?;
        Ok(Self::from_values(values))
    }
}
