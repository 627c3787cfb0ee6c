//! CreateSnapshot dispatch, plain snapshots, DeleteSnapshot and
//! ListSnapshots.

use std::collections::BTreeMap;

use tracing::{debug, info, instrument};

use super::lease::LeaseKind;
use super::params::SnapshotType;
use super::{
    Controller, ControllerError, CreateSnapshotRequest, CreateSnapshotResponse, CsiSnapshot,
    DeleteSnapshotRequest, ListSnapshotsRequest, ListSnapshotsResponse, final_state,
};
use crate::backend::{BlockStorage, NewSnapshot};
use crate::capacity::gib_to_bytes;
use crate::context::RequestContext;
use crate::filter::{FilterKey, Filters};
use crate::resources::{Backup, Snapshot, status};
use crate::wait::{StatusTarget, WaitError, wait_for_status};

const SNAPSHOT_READY: StatusTarget<'static> =
    StatusTarget::new(&[status::AVAILABLE], &[status::ERROR]);

impl<S: BlockStorage> Controller<S> {
    /// Creates a snapshot or, with `type=backup`, a backup of a volume.
    /// Same-named artefacts of the same volume are reused.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for missing fields or an
    /// unknown type, [`ControllerError::AlreadyExists`] when the name is
    /// taken by an artefact of another volume, [`ControllerError::Aborted`]
    /// while another request holds the name, and
    /// [`ControllerError::Internal`] for backend failures, duplicate names
    /// and timeouts.
    #[instrument(
        skip_all,
        fields(request_id = %ctx.id(), name = %request.name, volume_id = %request.source_volume_id)
    )]
    pub async fn create_snapshot(
        &self,
        ctx: &RequestContext,
        request: &CreateSnapshotRequest,
    ) -> Result<CreateSnapshotResponse, ControllerError> {
        if request.name.is_empty() {
            return Err(ControllerError::invalid("missing Snapshot Name"));
        }
        if request.source_volume_id.is_empty() {
            return Err(ControllerError::invalid("missing Source Volume ID"));
        }
        let kind = SnapshotType::from_parameters(&request.parameters)?;

        let _lease = self
            .leases
            .acquire(LeaseKind::Snapshot, &request.name)
            .ok_or_else(|| {
                ControllerError::Aborted(format!(
                    "an operation on snapshot {} is already in progress",
                    request.name
                ))
            })?;

        match kind {
            SnapshotType::Snapshot => {
                let pending = self
                    .find_or_create_snapshot(
                        ctx,
                        &request.name,
                        &request.source_volume_id,
                        &request.parameters,
                    )
                    .await?;
                let ready = self.wait_snapshot_ready(ctx, &pending.id).await?;
                Ok(CreateSnapshotResponse {
                    snapshot: snapshot_entry(&ready),
                })
            }
            SnapshotType::Backup => self.create_backup_snapshot(ctx, request).await,
        }
    }

    /// Returns the same-named snapshot of `volume_id`, creating it when
    /// absent. The snapshot may still be converging.
    pub(super) async fn find_or_create_snapshot(
        &self,
        ctx: &RequestContext,
        name: &str,
        volume_id: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<Snapshot, ControllerError> {
        let filters = Filters::by_name(name);
        let existing = ctx
            .run(self.storage.list_snapshots(&filters))
            .await?
            .map_err(|err| ControllerError::backend("failed to list snapshots", &err))?;
        match existing.as_slice() {
            [] => {}
            [snapshot] if snapshot.volume_id == volume_id => {
                debug!(snapshot_id = %snapshot.id, "reusing existing snapshot");
                return Ok(snapshot.clone());
            }
            [_] => {
                return Err(ControllerError::AlreadyExists(String::from(
                    "snapshot with given name already exists, with different source volume ID",
                )));
            }
            _ => {
                return Err(ControllerError::internal(format!(
                    "Multiple snapshots reported by backend with same name {name}"
                )));
            }
        }

        let new_snapshot = NewSnapshot {
            name: name.to_owned(),
            volume_id: volume_id.to_owned(),
            labels: self.labels(parameters),
        };
        let created = ctx
            .run(self.storage.create_snapshot(&new_snapshot))
            .await?
            .map_err(|err| {
                ControllerError::internal(format!("CreateSnapshot failed with error {err}"))
            })?;
        info!(snapshot_id = %created.id, "snapshot created");
        Ok(created)
    }

    pub(super) async fn wait_snapshot_ready(
        &self,
        ctx: &RequestContext,
        snapshot_id: &str,
    ) -> Result<Snapshot, ControllerError> {
        let resource = format!("snapshot {snapshot_id}");
        let outcome = wait_for_status(
            ctx,
            &self.timing.snapshot_ready,
            &resource,
            SNAPSHOT_READY,
            || self.storage.get_snapshot_by_id(snapshot_id),
        )
        .await;
        match outcome {
            Ok(snapshot) => Ok(snapshot),
            Err(WaitError::Timeout { last_state, .. }) => {
                let state =
                    final_state(ctx, self.storage.get_snapshot_by_id(snapshot_id), last_state)
                        .await;
                Err(ControllerError::internal(format!(
                    "snapshot {snapshot_id} did not become ready in time: last state {state}"
                )))
            }
            Err(err) => Err(ControllerError::wait(
                format!("snapshot {snapshot_id} did not become ready"),
                err,
            )),
        }
    }

    /// Deletes a snapshot, or the backup with the same id. Absent ids
    /// succeed.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for a missing id and
    /// [`ControllerError::Internal`] for backend failures.
    #[instrument(skip_all, fields(request_id = %ctx.id(), snapshot_id = %request.snapshot_id))]
    pub async fn delete_snapshot(
        &self,
        ctx: &RequestContext,
        request: &DeleteSnapshotRequest,
    ) -> Result<(), ControllerError> {
        let snapshot_id = request.snapshot_id.as_str();
        if snapshot_id.is_empty() {
            return Err(ControllerError::invalid("missing Snapshot ID"));
        }

        match ctx.run(self.storage.get_backup_by_id(snapshot_id)).await? {
            Ok(_) => match ctx.run(self.storage.delete_backup(snapshot_id)).await? {
                Ok(()) => info!("backup deleted"),
                Err(err) if err.is_not_found() => {}
                Err(err) => {
                    return Err(ControllerError::internal(format!(
                        "DeleteBackup failed with error {err}"
                    )));
                }
            },
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                return Err(ControllerError::backend(
                    format!("failed to look up backup {snapshot_id}"),
                    &err,
                ));
            }
        }

        match ctx.run(self.storage.delete_snapshot(snapshot_id)).await? {
            Ok(()) => {
                info!("snapshot deleted");
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(ControllerError::internal(format!(
                "DeleteSnapshot failed with error {err}"
            ))),
        }
    }

    /// Lists snapshots. With an id, returns that snapshot or backup alone, or
    /// nothing when neither exists. Without one, returns every available
    /// snapshot, optionally narrowed to one source volume. Pagination fields
    /// are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Internal`] for backend failures.
    #[instrument(skip_all, fields(request_id = %ctx.id()))]
    pub async fn list_snapshots(
        &self,
        ctx: &RequestContext,
        request: &ListSnapshotsRequest,
    ) -> Result<ListSnapshotsResponse, ControllerError> {
        let entries = if request.snapshot_id.is_empty() {
            let mut filters = Filters::new().with(FilterKey::Status, status::AVAILABLE);
            if !request.source_volume_id.is_empty() {
                filters = filters.with(FilterKey::VolumeId, request.source_volume_id.clone());
            }
            ctx.run(self.storage.list_snapshots(&filters))
                .await?
                .map_err(|err| ControllerError::backend("failed to list snapshots", &err))?
                .iter()
                .map(snapshot_entry)
                .collect()
        } else {
            self.lookup_snapshot_entry(ctx, &request.snapshot_id)
                .await?
                .into_iter()
                .collect()
        };
        Ok(ListSnapshotsResponse {
            entries,
            next_token: String::new(),
        })
    }

    async fn lookup_snapshot_entry(
        &self,
        ctx: &RequestContext,
        snapshot_id: &str,
    ) -> Result<Option<CsiSnapshot>, ControllerError> {
        match ctx.run(self.storage.get_snapshot_by_id(snapshot_id)).await? {
            Ok(snapshot) => return Ok(Some(snapshot_entry(&snapshot))),
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                return Err(ControllerError::backend(
                    format!("failed to look up snapshot {snapshot_id}"),
                    &err,
                ));
            }
        }
        match ctx.run(self.storage.get_backup_by_id(snapshot_id)).await? {
            Ok(backup) => Ok(Some(backup_entry(&backup))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(ControllerError::backend(
                format!("failed to look up backup {snapshot_id}"),
                &err,
            )),
        }
    }
}

pub(super) fn snapshot_entry(snapshot: &Snapshot) -> CsiSnapshot {
    CsiSnapshot {
        snapshot_id: snapshot.id.clone(),
        source_volume_id: snapshot.volume_id.clone(),
        size_bytes: gib_to_bytes(snapshot.size),
        creation_time: snapshot.created_at.clone(),
        ready_to_use: snapshot.status.is(status::AVAILABLE),
    }
}

pub(super) fn backup_entry(backup: &Backup) -> CsiSnapshot {
    CsiSnapshot {
        snapshot_id: backup.id.clone(),
        source_volume_id: backup.volume_id.clone(),
        size_bytes: gib_to_bytes(backup.size),
        creation_time: backup.created_at.clone(),
        ready_to_use: backup.status.is(status::AVAILABLE),
    }
}
