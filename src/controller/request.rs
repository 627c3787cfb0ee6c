//! Request and response shapes for the controller operations.
//!
//! These mirror the CSI controller messages closely enough for a protocol
//! adapter to convert field by field. Responses serialise to JSON for the
//! operator CLI.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Capacity bounds in bytes. Zero means "unset" for either bound.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CapacityRange {
    /// Minimum size the volume must have.
    pub required_bytes: u64,
    /// Maximum size the volume may have.
    pub limit_bytes: u64,
}

/// How a volume may be accessed by workloads.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum AccessMode {
    /// Read-write from a single node.
    #[default]
    SingleNodeWriter,
    /// Read-only from a single node.
    SingleNodeReaderOnly,
    /// Read-only from many nodes.
    MultiNodeReaderOnly,
}

/// Whether the volume is consumed as a raw device or a filesystem.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum AccessType {
    /// Raw block device.
    Block,
    /// Mounted filesystem.
    Mount {
        /// Requested filesystem type; empty means the node default.
        fs_type: String,
        /// Extra mount options.
        mount_flags: Vec<String>,
    },
}

impl Default for AccessType {
    fn default() -> Self {
        Self::Mount {
            fs_type: String::new(),
            mount_flags: Vec::new(),
        }
    }
}

/// Capability the caller requires from a volume.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeCapability {
    /// Access mode.
    pub access_mode: AccessMode,
    /// Block or mount access.
    pub access_type: AccessType,
}

/// Existing resource used to initialise a new volume.
///
/// A snapshot id may also name a backup; see the content-source resolver.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    /// Restore from a snapshot or backup with this id.
    Snapshot {
        /// Snapshot or backup identifier.
        snapshot_id: String,
    },
    /// Clone an existing volume.
    Volume {
        /// Source volume identifier.
        volume_id: String,
    },
}

/// Topology segments, e.g. `{"topology.block.csi.cloud/zone": "eu01-1"}`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Topology {
    /// Segment key/value pairs.
    pub segments: BTreeMap<String, String>,
}

/// Placement requirements supplied by the orchestrator.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TopologyRequirement {
    /// Topologies the volume must be accessible from.
    pub requisite: Vec<Topology>,
    /// Topologies in order of preference.
    pub preferred: Vec<Topology>,
}

/// Volume as reported back to the orchestrator.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CsiVolume {
    /// Backend volume id.
    pub volume_id: String,
    /// Provisioned capacity in bytes.
    pub capacity_bytes: u64,
    /// Source the volume was created from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_source: Option<ContentSource>,
    /// Topologies the volume is reachable from.
    pub accessible_topology: Vec<Topology>,
}

/// Input to `CreateVolume`.
#[derive(Clone, Debug, Default)]
pub struct CreateVolumeRequest {
    /// Idempotency key.
    pub name: String,
    /// Requested size bounds; 1 GiB when absent.
    pub capacity_range: Option<CapacityRange>,
    /// Capabilities the volume must support.
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Storage-class parameters.
    pub parameters: BTreeMap<String, String>,
    /// Optional content source.
    pub content_source: Option<ContentSource>,
    /// Optional placement requirements.
    pub accessibility_requirements: Option<TopologyRequirement>,
}

/// Output of `CreateVolume`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CreateVolumeResponse {
    /// The created or reused volume.
    pub volume: CsiVolume,
}

/// Input to `DeleteVolume`.
#[derive(Clone, Debug, Default)]
pub struct DeleteVolumeRequest {
    /// Volume to delete.
    pub volume_id: String,
}

/// Input to `ControllerPublishVolume`.
#[derive(Clone, Debug, Default)]
pub struct ControllerPublishVolumeRequest {
    /// Volume to attach.
    pub volume_id: String,
    /// Server the volume is attached to.
    pub node_id: String,
    /// Capability the workload needs.
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the workload mounts read-only.
    pub readonly: bool,
}

/// Output of `ControllerPublishVolume`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ControllerPublishVolumeResponse {
    /// Context handed to the node plugin.
    pub publish_context: BTreeMap<String, String>,
}

/// Input to `ControllerUnpublishVolume`.
#[derive(Clone, Debug, Default)]
pub struct ControllerUnpublishVolumeRequest {
    /// Volume to detach.
    pub volume_id: String,
    /// Server to detach from.
    pub node_id: String,
}

/// Input to `ControllerGetVolume`.
#[derive(Clone, Debug, Default)]
pub struct ControllerGetVolumeRequest {
    /// Volume to describe.
    pub volume_id: String,
}

/// Volume plus the servers it is attached to.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct VolumeEntry {
    /// Volume description.
    pub volume: CsiVolume,
    /// Servers the volume is published to; at most one.
    pub published_node_ids: Vec<String>,
}

/// Input to `ListVolumes`. Pagination fields are accepted but ignored.
#[derive(Clone, Debug, Default)]
pub struct ListVolumesRequest {
    /// Requested page size.
    pub max_entries: u32,
    /// Continuation token from a previous page.
    pub starting_token: String,
}

/// Output of `ListVolumes`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ListVolumesResponse {
    /// Every volume in the project.
    pub entries: Vec<VolumeEntry>,
    /// Always empty; the backend does not paginate.
    pub next_token: String,
}

/// Input to `ControllerExpandVolume`.
#[derive(Clone, Debug, Default)]
pub struct ControllerExpandVolumeRequest {
    /// Volume to grow.
    pub volume_id: String,
    /// New size bounds.
    pub capacity_range: Option<CapacityRange>,
}

/// Output of `ControllerExpandVolume`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ControllerExpandVolumeResponse {
    /// Capacity after expansion in bytes.
    pub capacity_bytes: u64,
    /// Whether the node must grow the filesystem.
    pub node_expansion_required: bool,
}

/// Snapshot or backup as reported back to the orchestrator.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CsiSnapshot {
    /// Snapshot id, or backup id for backup-type snapshots.
    pub snapshot_id: String,
    /// Volume the snapshot was taken from.
    pub source_volume_id: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// RFC 3339 creation timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<String>,
    /// Whether the snapshot can be restored from.
    pub ready_to_use: bool,
}

/// Input to `CreateSnapshot`.
#[derive(Clone, Debug, Default)]
pub struct CreateSnapshotRequest {
    /// Idempotency key.
    pub name: String,
    /// Volume to snapshot.
    pub source_volume_id: String,
    /// Snapshot-class parameters.
    pub parameters: BTreeMap<String, String>,
}

/// Output of `CreateSnapshot`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CreateSnapshotResponse {
    /// The created or reused snapshot.
    pub snapshot: CsiSnapshot,
}

/// Input to `DeleteSnapshot`.
#[derive(Clone, Debug, Default)]
pub struct DeleteSnapshotRequest {
    /// Snapshot or backup to delete.
    pub snapshot_id: String,
}

/// Input to `ListSnapshots`. Pagination fields are accepted but ignored.
#[derive(Clone, Debug, Default)]
pub struct ListSnapshotsRequest {
    /// Return only this snapshot or backup.
    pub snapshot_id: String,
    /// Return only snapshots of this volume.
    pub source_volume_id: String,
    /// Requested page size.
    pub max_entries: u32,
    /// Continuation token from a previous page.
    pub starting_token: String,
}

/// Output of `ListSnapshots`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ListSnapshotsResponse {
    /// Matching snapshots.
    pub entries: Vec<CsiSnapshot>,
    /// Always empty; the backend does not paginate.
    pub next_token: String,
}
