//! Resolution of a CreateVolume content source into a backend create source.
//!
//! The CSI snapshot id is ambiguous: this driver hands out both snapshot ids
//! and backup ids through it. Resolution tries a snapshot first and falls
//! back to a backup only when the snapshot lookup reports not-found.

use tracing::{debug, warn};

use super::{ContentSource, Controller, ControllerError};
use crate::backend::BlockStorage;
use crate::context::RequestContext;
use crate::resources::{SourceKind, VolumeSource, status};

/// Concrete create source and the zone it lives in, when known.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct ResolvedSource {
    pub(super) source: VolumeSource,
    pub(super) zone: Option<String>,
}

impl ResolvedSource {
    fn new(kind: SourceKind, id: &str, zone: &str) -> Self {
        Self {
            source: VolumeSource {
                kind,
                id: id.to_owned(),
            },
            zone: (!zone.is_empty()).then(|| zone.to_owned()),
        }
    }
}

impl<S: BlockStorage> Controller<S> {
    /// Resolves `content` and checks its zone against `target_zone`.
    pub(super) async fn resolve_source(
        &self,
        ctx: &RequestContext,
        content: &ContentSource,
        target_zone: Option<&str>,
    ) -> Result<ResolvedSource, ControllerError> {
        let resolved = match content {
            ContentSource::Volume { volume_id } => self.resolve_volume(ctx, volume_id).await?,
            ContentSource::Snapshot { snapshot_id } => self.resolve_snapshot(ctx, snapshot_id).await?,
        };
        if let (Some(target), Some(zone)) = (target_zone, resolved.zone.as_deref()) {
            if target != zone {
                return Err(zone_mismatch(&resolved.source, target, zone));
            }
        }
        debug!(
            kind = %resolved.source.kind,
            source_id = %resolved.source.id,
            "resolved content source"
        );
        Ok(resolved)
    }

    async fn resolve_volume(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
    ) -> Result<ResolvedSource, ControllerError> {
        match ctx.run(self.storage.get_volume(volume_id)).await? {
            Ok(volume) => Ok(ResolvedSource::new(
                SourceKind::Volume,
                &volume.id,
                &volume.availability_zone,
            )),
            Err(err) if err.is_not_found() => Err(ControllerError::NotFound(format!(
                "source volume {volume_id} not found"
            ))),
            Err(err) => Err(ControllerError::NotFound(format!(
                "failed to retrieve source volume {volume_id}: {err}"
            ))),
        }
    }

    async fn resolve_snapshot(
        &self,
        ctx: &RequestContext,
        snapshot_id: &str,
    ) -> Result<ResolvedSource, ControllerError> {
        let snapshot = match ctx.run(self.storage.get_snapshot_by_id(snapshot_id)).await? {
            Ok(snapshot) => snapshot,
            Err(err) if err.is_not_found() => return self.resolve_backup(ctx, snapshot_id).await,
            Err(err) => {
                return Err(ControllerError::backend(
                    format!("failed to retrieve snapshot {snapshot_id}"),
                    &err,
                ));
            }
        };
        if !snapshot.status.is(status::AVAILABLE) {
            return Err(ControllerError::Unavailable(format!(
                "VolumeContentSource snapshot {snapshot_id} is not yet available, status {}",
                snapshot.status
            )));
        }

        let zone = match ctx.run(self.storage.get_volume(&snapshot.volume_id)).await? {
            Ok(volume) => volume.availability_zone,
            Err(err) if err.is_not_found() => {
                warn!(
                    snapshot_id,
                    volume_id = %snapshot.volume_id,
                    "source volume of snapshot no longer exists, skipping zone check"
                );
                String::new()
            }
            Err(err) => {
                return Err(ControllerError::backend(
                    format!("failed to retrieve source volume of snapshot {snapshot_id}"),
                    &err,
                ));
            }
        };
        Ok(ResolvedSource::new(SourceKind::Snapshot, &snapshot.id, &zone))
    }

    async fn resolve_backup(
        &self,
        ctx: &RequestContext,
        backup_id: &str,
    ) -> Result<ResolvedSource, ControllerError> {
        let backup = match ctx.run(self.storage.get_backup_by_id(backup_id)).await? {
            Ok(backup) => backup,
            Err(err) if err.is_not_found() => {
                return Err(ControllerError::NotFound(format!(
                    "VolumeContentSource snapshot or backup {backup_id} not found"
                )));
            }
            Err(err) => {
                return Err(ControllerError::backend(
                    format!("failed to retrieve backup {backup_id}"),
                    &err,
                ));
            }
        };
        if !backup.status.is(status::AVAILABLE) {
            return Err(ControllerError::Unavailable(format!(
                "VolumeContentSource backup {backup_id} is not yet available, status {}",
                backup.status
            )));
        }
        Ok(ResolvedSource::new(
            SourceKind::Backup,
            &backup.id,
            &backup.availability_zone,
        ))
    }
}

fn zone_mismatch(source: &VolumeSource, target: &str, zone: &str) -> ControllerError {
    ControllerError::ResourceExhausted(format!(
        "volume must be in the same availability zone as source {} {}: requested {target}, source in {zone}",
        source.kind, source.id
    ))
}
