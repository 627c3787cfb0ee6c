//! Client-side filtering over unfiltered backend collections.
//!
//! The backend list endpoints ignore query filters, so lookups by name,
//! status or owning volume are applied here. The output is identical to what
//! a server-side filter would return, which keeps callers unchanged if the
//! backend ever gains native support.

use std::collections::BTreeMap;

use crate::resources::{Backup, Snapshot, Volume};

/// Attribute a filter can match on.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum FilterKey {
    /// Exact resource name.
    Name,
    /// Lifecycle status, compared without regard to ASCII case.
    Status,
    /// Owning or source volume id.
    VolumeId,
}

/// Set of filter criteria combined with AND semantics.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Filters(BTreeMap<FilterKey, String>);

impl Filters {
    /// Creates an empty filter set that matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a filter on [`FilterKey::Name`].
    #[must_use]
    pub fn by_name(name: impl Into<String>) -> Self {
        Self::new().with(FilterKey::Name, name)
    }

    /// Adds or replaces the criterion for `key`.
    #[must_use]
    pub fn with(mut self, key: FilterKey, value: impl Into<String>) -> Self {
        self.0.insert(key, value.into());
        self
    }

    /// Returns the value for `key`, if set.
    #[must_use]
    pub fn get(&self, key: FilterKey) -> Option<&str> {
        self.0.get(&key).map(String::as_str)
    }

    /// Returns `true` when no criteria are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reports whether `item` satisfies every criterion.
    #[must_use]
    pub fn matches<T: Filterable>(&self, item: &T) -> bool {
        self.0.iter().all(|(key, expected)| {
            item.field(*key).is_some_and(|actual| match key {
                FilterKey::Status => actual.eq_ignore_ascii_case(expected),
                FilterKey::Name | FilterKey::VolumeId => actual == expected,
            })
        })
    }

    /// Keeps the items of `items` that satisfy every criterion.
    #[must_use]
    pub fn apply<T: Filterable>(&self, items: Vec<T>) -> Vec<T> {
        if self.is_empty() {
            return items;
        }
        items.into_iter().filter(|item| self.matches(item)).collect()
    }
}

/// Resource that exposes the attributes [`Filters`] can match.
pub trait Filterable {
    /// Returns the value of `key`, or `None` if the resource has no such
    /// attribute. Resources without an attribute never match a filter on it.
    fn field(&self, key: FilterKey) -> Option<&str>;
}

impl Filterable for Volume {
    fn field(&self, key: FilterKey) -> Option<&str> {
        match key {
            FilterKey::Name => Some(&self.name),
            FilterKey::Status => Some(self.status.as_str()),
            FilterKey::VolumeId => Some(&self.id),
        }
    }
}

impl Filterable for Snapshot {
    fn field(&self, key: FilterKey) -> Option<&str> {
        match key {
            FilterKey::Name => Some(&self.name),
            FilterKey::Status => Some(self.status.as_str()),
            FilterKey::VolumeId => Some(&self.volume_id),
        }
    }
}

impl Filterable for Backup {
    fn field(&self, key: FilterKey) -> Option<&str> {
        match key {
            FilterKey::Name => Some(&self.name),
            FilterKey::Status => Some(self.status.as_str()),
            FilterKey::VolumeId => Some(&self.volume_id),
        }
    }
}
