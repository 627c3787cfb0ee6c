//! Request and response bodies that have no counterpart in the resource
//! records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backend::NewBackup;
use crate::resources::{SourceKind, VolumeSource};

/// Envelope returned by every list endpoint.
#[derive(Debug, Deserialize)]
pub(super) struct ItemList<T> {
    #[serde(default = "Vec::new")]
    pub(super) items: Vec<T>,
}

/// Body of `POST volumes/{id}/resize`.
#[derive(Debug, Serialize)]
pub(super) struct ResizeVolume {
    pub(super) size: u64,
}

/// Body of `POST backups`. The API takes the snapshot as a typed source and
/// derives the volume from it.
#[derive(Debug, Serialize)]
pub(super) struct CreateBackup<'a> {
    pub(super) name: &'a str,
    pub(super) source: VolumeSource,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(super) labels: &'a BTreeMap<String, String>,
}

impl<'a> From<&'a NewBackup> for CreateBackup<'a> {
    fn from(request: &'a NewBackup) -> Self {
        Self {
            name: &request.name,
            source: VolumeSource {
                kind: SourceKind::Snapshot,
                id: request.snapshot_id.clone(),
            },
            labels: &request.labels,
        }
    }
}

/// Error body the API returns on failures, when it returns one.
#[derive(Debug, Deserialize)]
pub(super) struct ApiFailure {
    #[serde(default)]
    pub(super) message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_body_names_snapshot_source() {
        let request = NewBackup {
            name: String::from("nightly"),
            volume_id: String::from("vol-1"),
            snapshot_id: String::from("snap-1"),
            labels: BTreeMap::new(),
        };
        let json = serde_json::to_string(&CreateBackup::from(&request)).expect("serialise");
        assert_eq!(
            json,
            r#"{"name":"nightly","source":{"type":"snapshot","id":"snap-1"}}"#
        );
    }

    #[test]
    fn missing_items_decode_as_empty() {
        let list: ItemList<crate::resources::Volume> =
            serde_json::from_str("{}").expect("decode");
        assert!(list.items.is_empty());
    }
}
