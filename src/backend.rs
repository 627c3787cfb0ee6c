//! Outbound interface to the IaaS block-storage API.
//!
//! Every call returns a typed record or a typed [`BackendError`]; callers
//! distinguish "resource absent" from other failures through
//! [`BackendError::is_not_found`]. Requests are scoped by the controller,
//! which races each returned future against the request context.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use thiserror::Error;

use crate::filter::Filters;
use crate::resources::{Backup, Server, Snapshot, Volume, VolumeSource};

/// Kind of backend resource, used in error messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResourceKind {
    /// Block volume.
    Volume,
    /// Volume snapshot.
    Snapshot,
    /// Volume backup.
    Backup,
    /// Compute instance.
    Server,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
            Self::Backup => "backup",
            Self::Server => "server",
        })
    }
}

/// Errors raised by backend gateways.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BackendError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
    /// Raised when the addressed resource does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Kind of resource that was looked up.
        kind: ResourceKind,
        /// Identifier that was looked up.
        id: String,
    },
    /// Raised when the API answers with a non-success status.
    #[error("API returned {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or error message.
        message: String,
    },
    /// Raised when the request could not be delivered.
    #[error("transport error: {0}")]
    Transport(String),
    /// Raised when a response body cannot be decoded.
    #[error("failed to decode {resource} response: {message}")]
    Decode {
        /// Resource whose payload failed to decode.
        resource: String,
        /// Decoder error message.
        message: String,
    },
}

impl BackendError {
    /// Returns `true` when the error reports an absent resource.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Builds a [`BackendError::NotFound`].
    #[must_use]
    pub fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

/// Parameters for creating a volume.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVolume {
    /// Name used as the idempotency key.
    pub name: String,
    /// Size in GiB.
    pub size: u64,
    /// Target availability zone; backend default when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    /// Resource to initialise the volume from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<VolumeSource>,
    /// Performance class requested through parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance_class: Option<String>,
    /// Labels attached to the volume.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl NewVolume {
    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Validation`] when the name is empty.
    pub fn validate(&self) -> Result<(), BackendError> {
        if self.name.trim().is_empty() {
            return Err(BackendError::Validation("name".to_owned()));
        }
        Ok(())
    }
}

/// Parameters for creating a snapshot.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSnapshot {
    /// Name used as the idempotency key.
    pub name: String,
    /// Volume to snapshot.
    pub volume_id: String,
    /// Labels attached to the snapshot.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Parameters for creating a backup from a snapshot.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBackup {
    /// Name used as the idempotency key.
    pub name: String,
    /// Volume being protected.
    pub volume_id: String,
    /// Snapshot the backup is materialised from.
    pub snapshot_id: String,
    /// Labels attached to the backup.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// Future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Operations the controller needs from the IaaS API.
///
/// List operations take [`Filters`] because the backend cannot filter
/// server-side; implementations fetch the full collection and apply the
/// filters locally.
pub trait BlockStorage: Send + Sync {
    /// Creates a volume and returns the record as first reported.
    fn create_volume<'a>(&'a self, request: &'a NewVolume) -> BackendFuture<'a, Volume>;

    /// Deletes a volume, refusing when it is still attached.
    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> BackendFuture<'a, ()>;

    /// Fetches a single volume.
    fn get_volume<'a>(&'a self, volume_id: &'a str) -> BackendFuture<'a, Volume>;

    /// Lists every volume whose name equals `name`.
    fn get_volumes_by_name<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Vec<Volume>>;

    /// Lists all volumes in the project.
    fn list_volumes(&self) -> BackendFuture<'_, Vec<Volume>>;

    /// Requests attachment of a volume to a server.
    fn attach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> BackendFuture<'a, ()>;

    /// Requests detachment of a volume from a server.
    fn detach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> BackendFuture<'a, ()>;

    /// Requests a resize to `new_size_gib`.
    fn expand_volume<'a>(&'a self, volume_id: &'a str, new_size_gib: u64)
    -> BackendFuture<'a, ()>;

    /// Creates a snapshot.
    fn create_snapshot<'a>(&'a self, request: &'a NewSnapshot) -> BackendFuture<'a, Snapshot>;

    /// Fetches a single snapshot.
    fn get_snapshot_by_id<'a>(&'a self, snapshot_id: &'a str) -> BackendFuture<'a, Snapshot>;

    /// Lists snapshots matching `filters`.
    fn list_snapshots<'a>(&'a self, filters: &'a Filters) -> BackendFuture<'a, Vec<Snapshot>>;

    /// Deletes a snapshot.
    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str) -> BackendFuture<'a, ()>;

    /// Creates a backup from a snapshot.
    fn create_backup<'a>(&'a self, request: &'a NewBackup) -> BackendFuture<'a, Backup>;

    /// Fetches a single backup.
    fn get_backup_by_id<'a>(&'a self, backup_id: &'a str) -> BackendFuture<'a, Backup>;

    /// Lists backups matching `filters`.
    fn list_backups<'a>(&'a self, filters: &'a Filters) -> BackendFuture<'a, Vec<Backup>>;

    /// Deletes a backup.
    fn delete_backup<'a>(&'a self, backup_id: &'a str) -> BackendFuture<'a, ()>;

    /// Fetches a compute instance.
    fn get_instance_by_id<'a>(&'a self, server_id: &'a str) -> BackendFuture<'a, Server>;
}
