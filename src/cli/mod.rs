//! Command-line interface definitions for the `block-csi` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Top-level CLI for the `block-csi` binary.
#[derive(Debug, Parser)]
#[command(
    name = "block-csi",
    about = "Drive CSI controller operations against the IaaS block-storage API",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log line format written to stderr.
    #[arg(long, value_enum, default_value_t = LogFormatArg::Text, global = true)]
    pub(crate) log_format: LogFormatArg,
    /// Overall deadline for the operation, in seconds.
    #[arg(long, value_name = "SECONDS", default_value_t = 600, global = true)]
    pub(crate) timeout_secs: u64,
    /// Operation to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Log output formats accepted by `--log-format`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum LogFormatArg {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Controller operations.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create a volume, or return the existing one with the same name.
    #[command(name = "create-volume")]
    CreateVolume(CreateVolumeArgs),
    /// Delete a volume.
    #[command(name = "delete-volume")]
    DeleteVolume(VolumeIdArgs),
    /// Describe a volume.
    #[command(name = "get-volume")]
    GetVolume(VolumeIdArgs),
    /// List every volume in the project.
    #[command(name = "list-volumes")]
    ListVolumes,
    /// Attach a volume to a server.
    #[command(name = "publish")]
    Publish(AttachmentArgs),
    /// Detach a volume from a server.
    #[command(name = "unpublish")]
    Unpublish(AttachmentArgs),
    /// Grow a volume.
    #[command(name = "expand-volume")]
    ExpandVolume(ExpandArgs),
    /// Create a snapshot or backup of a volume.
    #[command(name = "create-snapshot")]
    CreateSnapshot(CreateSnapshotArgs),
    /// Delete a snapshot or backup.
    #[command(name = "delete-snapshot")]
    DeleteSnapshot(SnapshotIdArgs),
    /// List snapshots, or look one up by id.
    #[command(name = "list-snapshots")]
    ListSnapshots(ListSnapshotsArgs),
}

/// Arguments for `block-csi create-volume`.
#[derive(Debug, Args)]
pub(crate) struct CreateVolumeArgs {
    /// Volume name; repeated calls with the same name return the same volume.
    #[arg(long)]
    pub(crate) name: String,
    /// Requested size in GiB. Defaults to 1.
    #[arg(long, value_name = "GIB")]
    pub(crate) size_gib: Option<u64>,
    /// Availability zone to place the volume in.
    #[arg(long)]
    pub(crate) zone: Option<String>,
    /// Restore from this snapshot or backup id.
    #[arg(long, value_name = "ID", conflicts_with = "source_volume")]
    pub(crate) source_snapshot: Option<String>,
    /// Clone this volume.
    #[arg(long, value_name = "ID", conflicts_with = "source_snapshot")]
    pub(crate) source_volume: Option<String>,
    /// Request raw block access instead of a filesystem.
    #[arg(long)]
    pub(crate) block: bool,
    /// Storage-class parameter as `KEY=VALUE`; may be repeated.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub(crate) params: Vec<(String, String)>,
}

/// A single volume id.
#[derive(Debug, Args)]
pub(crate) struct VolumeIdArgs {
    /// Volume identifier.
    pub(crate) volume_id: String,
}

/// A volume and the server it is attached to.
#[derive(Debug, Args)]
pub(crate) struct AttachmentArgs {
    /// Volume identifier.
    #[arg(long)]
    pub(crate) volume_id: String,
    /// Server (node) identifier.
    #[arg(long)]
    pub(crate) node_id: String,
}

/// Arguments for `block-csi expand-volume`.
#[derive(Debug, Args)]
pub(crate) struct ExpandArgs {
    /// Volume identifier.
    #[arg(long)]
    pub(crate) volume_id: String,
    /// New size in GiB.
    #[arg(long, value_name = "GIB")]
    pub(crate) size_gib: u64,
}

/// Arguments for `block-csi create-snapshot`.
#[derive(Debug, Args)]
pub(crate) struct CreateSnapshotArgs {
    /// Snapshot name; repeated calls with the same name return the same
    /// snapshot.
    #[arg(long)]
    pub(crate) name: String,
    /// Volume to snapshot.
    #[arg(long)]
    pub(crate) volume_id: String,
    /// Produce a backup instead of a snapshot.
    #[arg(long)]
    pub(crate) backup: bool,
    /// Snapshot-class parameter as `KEY=VALUE`; may be repeated.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub(crate) params: Vec<(String, String)>,
}

/// A single snapshot or backup id.
#[derive(Debug, Args)]
pub(crate) struct SnapshotIdArgs {
    /// Snapshot or backup identifier.
    pub(crate) snapshot_id: String,
}

/// Arguments for `block-csi list-snapshots`.
#[derive(Debug, Args)]
pub(crate) struct ListSnapshotsArgs {
    /// Return only this snapshot or backup.
    #[arg(long)]
    pub(crate) snapshot_id: Option<String>,
    /// Return only snapshots of this volume.
    #[arg(long)]
    pub(crate) volume_id: Option<String>,
}

/// Parses a `KEY=VALUE` pair. The value may itself contain `=`.
pub(crate) fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.to_owned()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}
