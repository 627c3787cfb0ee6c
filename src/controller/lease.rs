//! Per-process leases on resource names.
//!
//! Find-by-name-then-create is only safe when a single request works on a
//! name at a time. A lease narrows the race to separate processes; replicas
//! of the controller can still collide.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Namespace of a leased name.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum LeaseKind {
    Volume,
    Snapshot,
}

impl LeaseKind {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
        }
    }
}

/// Set of names currently held by in-flight requests.
#[derive(Clone, Debug, Default)]
pub(crate) struct NameLeases {
    held: Arc<Mutex<HashSet<String>>>,
}

impl NameLeases {
    /// Takes the lease on `name`, or returns `None` while another request
    /// holds it.
    pub(crate) fn acquire(&self, kind: LeaseKind, name: &str) -> Option<NameLease> {
        let key = format!("{}/{name}", kind.prefix());
        let inserted = self
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        inserted.then(|| NameLease {
            key,
            held: Arc::clone(&self.held),
        })
    }
}

/// Lease released when dropped.
#[derive(Debug)]
pub(crate) struct NameLease {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for NameLease {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
