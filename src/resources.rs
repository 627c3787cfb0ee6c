//! Backend resource records mirrored as in-flight values.
//!
//! The backend is the source of truth; these records only live for the
//! duration of one request and are never cached.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Status strings reported by the backend.
pub mod status {
    /// Resource is ready for use.
    pub const AVAILABLE: &str = "AVAILABLE";
    /// Volume is attached to a server.
    pub const ATTACHED: &str = "ATTACHED";
    /// Resource is still being created.
    pub const CREATING: &str = "CREATING";
    /// Resource failed.
    pub const ERROR: &str = "ERROR";
    /// Volume resize failed.
    pub const ERROR_RESIZING: &str = "ERROR_RESIZING";
    /// Backup restore failed.
    pub const ERROR_RESTORING: &str = "ERROR_RESTORING";
    /// Volume is changing size.
    pub const RESIZING: &str = "RESIZING";
}

/// Resource status as reported by the backend.
///
/// Volume and snapshot statuses arrive upper-case while backups have been
/// observed in lower-case, so comparisons ignore ASCII case.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Status(String);

impl Status {
    /// Returns the raw status string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Case-insensitive comparison against a status constant.
    #[must_use]
    pub fn is(&self, expected: &str) -> bool {
        self.0.eq_ignore_ascii_case(expected)
    }

    /// Returns `true` when the status matches any of `candidates`.
    #[must_use]
    pub fn is_any(&self, candidates: &[&str]) -> bool {
        candidates.iter().any(|candidate| self.is(candidate))
    }
}

impl From<&str> for Status {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of resource a volume was initialised from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Cloned from another volume.
    Volume,
    /// Restored from a snapshot.
    Snapshot,
    /// Restored from a backup.
    Backup,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
            Self::Backup => "backup",
        })
    }
}

/// Creation source of a volume.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeSource {
    /// Kind of the source resource.
    #[serde(rename = "type")]
    pub kind: SourceKind,
    /// Identifier of the source resource.
    pub id: String,
}

/// Block volume record.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Backend identifier.
    pub id: String,
    /// Name supplied at creation; used as the idempotency key.
    #[serde(default)]
    pub name: String,
    /// Size in GiB.
    #[serde(default)]
    pub size: u64,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: Status,
    /// Availability zone the volume lives in.
    #[serde(default)]
    pub availability_zone: String,
    /// Server the volume is attached to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Resource the volume was initialised from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<VolumeSource>,
    /// Performance class chosen at creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_class: Option<String>,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Volume {
    /// Returns the attached server id, treating an empty string as detached.
    #[must_use]
    pub fn attached_server(&self) -> Option<&str> {
        self.server_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Block snapshot record.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Backend identifier.
    pub id: String,
    /// Name supplied at creation.
    #[serde(default)]
    pub name: String,
    /// Volume the snapshot was taken from.
    #[serde(default)]
    pub volume_id: String,
    /// Size in GiB.
    #[serde(default)]
    pub size: u64,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: Status,
    /// RFC 3339 creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Backup record. Backups are always produced from a snapshot.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    /// Backend identifier.
    pub id: String,
    /// Name supplied at creation.
    #[serde(default)]
    pub name: String,
    /// Volume the backup protects.
    #[serde(default)]
    pub volume_id: String,
    /// Snapshot the backup was materialised from.
    #[serde(default)]
    pub snapshot_id: String,
    /// Size in GiB.
    #[serde(default)]
    pub size: u64,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: Status,
    /// Availability zone the backup can be restored into.
    #[serde(default)]
    pub availability_zone: String,
    /// RFC 3339 creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Compute instance record; only used to confirm a node exists.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /// Backend identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Current lifecycle status.
    #[serde(default)]
    pub status: Status,
    /// Availability zone of the server.
    #[serde(default)]
    pub availability_zone: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_comparison_ignores_case() {
        let backup_status = Status::from("available");
        assert!(backup_status.is(status::AVAILABLE));
        assert!(backup_status.is_any(&[status::ERROR, status::AVAILABLE]));
        assert!(!backup_status.is(status::CREATING));
    }

    #[test]
    fn volume_deserialises_camel_case_payload() {
        let payload = r#"{
            "id": "vol-1",
            "name": "data",
            "size": 20,
            "status": "ATTACHED",
            "availabilityZone": "eu01-1",
            "serverId": "srv-1",
            "source": {"type": "snapshot", "id": "snap-1"}
        }"#;
        let volume: Volume = serde_json::from_str(payload).expect("deserialise");
        assert_eq!(volume.attached_server(), Some("srv-1"));
        assert_eq!(
            volume.source,
            Some(VolumeSource {
                kind: SourceKind::Snapshot,
                id: String::from("snap-1"),
            })
        );
        assert!(volume.status.is(status::ATTACHED));
    }

    #[test]
    fn empty_server_id_counts_as_detached() {
        let volume = Volume {
            server_id: Some(String::new()),
            ..Volume::default()
        };
        assert_eq!(volume.attached_server(), None);
    }
}
