//! Backup-type CreateSnapshot.
//!
//! A backup is always materialised from a snapshot of the volume. That
//! snapshot is transient: once the backup request is settled it is deleted
//! on every path, including reuse of an existing backup and failures after
//! the snapshot exists.

use std::future::Future;

use tracing::{debug, info, warn};

use super::snapshot::backup_entry;
use super::{
    Controller, ControllerError, CreateSnapshotRequest, CreateSnapshotResponse, final_state,
    params,
};
use crate::backend::{BlockStorage, NewBackup};
use crate::context::RequestContext;
use crate::filter::Filters;
use crate::resources::{Backup, status};
use crate::wait::{Backoff, StatusTarget, WaitError, wait_for_status};

const BACKUP_READY: StatusTarget<'static> =
    StatusTarget::new(&[status::AVAILABLE], &[status::ERROR]);

impl<S: BlockStorage> Controller<S> {
    pub(super) async fn create_backup_snapshot(
        &self,
        ctx: &RequestContext,
        request: &CreateSnapshotRequest,
    ) -> Result<CreateSnapshotResponse, ControllerError> {
        let seconds_per_gib =
            params::backup_seconds_per_gib(&request.parameters, self.timing.backup_seconds_per_gib)?;
        let filters = Filters::by_name(&request.name);
        let existing = ctx
            .run(self.storage.list_backups(&filters))
            .await?
            .map_err(|err| ControllerError::backend("failed to list backups", &err))?;

        let settled = match existing.as_slice() {
            [] => self.create_fresh_backup(ctx, request, seconds_per_gib).await?,
            [backup] if backup.volume_id == request.source_volume_id => {
                debug!(backup_id = %backup.id, "reusing existing backup");
                self.with_snapshot_cleanup(
                    ctx,
                    &backup.snapshot_id,
                    self.settle_backup(ctx, &backup.id, seconds_per_gib, 0),
                )
                .await?
            }
            [_] => {
                return Err(ControllerError::AlreadyExists(String::from(
                    "backup with given name already exists, with different source volume ID",
                )));
            }
            _ => {
                return Err(ControllerError::internal(format!(
                    "Multiple backups reported by backend with same name {}",
                    request.name
                )));
            }
        };
        Ok(CreateSnapshotResponse {
            snapshot: backup_entry(&settled),
        })
    }

    async fn create_fresh_backup(
        &self,
        ctx: &RequestContext,
        request: &CreateSnapshotRequest,
        seconds_per_gib: u64,
    ) -> Result<Backup, ControllerError> {
        let snapshot = self
            .find_or_create_snapshot(
                ctx,
                &request.name,
                &request.source_volume_id,
                &request.parameters,
            )
            .await?;
        let body = async {
            let ready = self.wait_snapshot_ready(ctx, &snapshot.id).await?;
            let new_backup = NewBackup {
                name: request.name.clone(),
                volume_id: request.source_volume_id.clone(),
                snapshot_id: ready.id.clone(),
                labels: self.labels(&request.parameters),
            };
            let created = ctx
                .run(self.storage.create_backup(&new_backup))
                .await?
                .map_err(|err| {
                    ControllerError::internal(format!("CreateBackup failed with error {err}"))
                })?;
            info!(backup_id = %created.id, snapshot_id = %ready.id, "backup created");
            self.settle_backup(ctx, &created.id, seconds_per_gib, ready.size)
                .await
        };
        self.with_snapshot_cleanup(ctx, &snapshot.id, body).await
    }

    /// Waits for a backup within its size-scaled budget, then fetches it for
    /// the response whatever the wait outcome.
    async fn settle_backup(
        &self,
        ctx: &RequestContext,
        backup_id: &str,
        seconds_per_gib: u64,
        snapshot_size_gib: u64,
    ) -> Result<Backup, ControllerError> {
        let backoff = Backoff::fixed(
            self.timing.backup_poll_interval,
            self.timing.backup_timeout(seconds_per_gib, snapshot_size_gib),
        );
        let resource = format!("backup {backup_id}");
        let waited = wait_for_status(
            ctx,
            &backoff,
            &resource,
            BACKUP_READY,
            || self.storage.get_backup_by_id(backup_id),
        )
        .await;

        match waited {
            Ok(_) => ctx
                .run(self.storage.get_backup_by_id(backup_id))
                .await?
                .map_err(|err| {
                    ControllerError::backend(format!("failed to fetch backup {backup_id}"), &err)
                }),
            Err(WaitError::Timeout { last_state, .. }) => {
                let state =
                    final_state(ctx, self.storage.get_backup_by_id(backup_id), last_state).await;
                Err(ControllerError::internal(format!(
                    "backup {backup_id} did not become available in time: last state {state}"
                )))
            }
            Err(WaitError::Fatal { state, .. }) => {
                let current = final_state(ctx, self.storage.get_backup_by_id(backup_id), Some(state))
                    .await;
                Err(ControllerError::internal(format!(
                    "backup {backup_id} failed: state {current}"
                )))
            }
            Err(err) => Err(ControllerError::wait(
                format!("backup {backup_id} did not become available"),
                err,
            )),
        }
    }

    /// Runs `body`, then deletes the transient snapshot regardless of the
    /// outcome.
    ///
    /// A cleanup failure after a successful body is an error. When both fail
    /// the body's error is returned with the cleanup failure noted.
    async fn with_snapshot_cleanup<T, F>(
        &self,
        ctx: &RequestContext,
        snapshot_id: &str,
        body: F,
    ) -> Result<T, ControllerError>
    where
        F: Future<Output = Result<T, ControllerError>>,
    {
        let outcome = body.await;
        let cleanup = self.delete_transient_snapshot(ctx, snapshot_id).await;
        match (outcome, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(cleanup_err)) => Err(ControllerError::internal(format!(
                "failed to delete transient snapshot {snapshot_id}: {cleanup_err}"
            ))),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(cleanup_err)) => {
                warn!(snapshot_id, error = %cleanup_err, "transient snapshot cleanup failed");
                Err(append_cleanup_note(err, snapshot_id, &cleanup_err))
            }
        }
    }

    /// Deletes the snapshot under a context detached from the request, so
    /// cleanup still runs after the caller cancelled.
    async fn delete_transient_snapshot(
        &self,
        ctx: &RequestContext,
        snapshot_id: &str,
    ) -> Result<(), String> {
        if snapshot_id.is_empty() {
            return Ok(());
        }
        let cleanup_ctx = ctx.detached(self.timing.cleanup_timeout);
        match cleanup_ctx.run(self.storage.delete_snapshot(snapshot_id)).await {
            Ok(Ok(())) => {
                info!(snapshot_id, "transient snapshot deleted");
                Ok(())
            }
            Ok(Err(err)) if err.is_not_found() => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(interruption) => Err(interruption.to_string()),
        }
    }
}

fn append_cleanup_note(err: ControllerError, snapshot_id: &str, cleanup: &str) -> ControllerError {
    let note = |message: String| {
        format!("{message} (deleting transient snapshot {snapshot_id} also failed: {cleanup})")
    };
    match err {
        ControllerError::InvalidArgument(message) => ControllerError::InvalidArgument(note(message)),
        ControllerError::AlreadyExists(message) => ControllerError::AlreadyExists(note(message)),
        ControllerError::NotFound(message) => ControllerError::NotFound(note(message)),
        ControllerError::Unavailable(message) => ControllerError::Unavailable(note(message)),
        ControllerError::ResourceExhausted(message) => {
            ControllerError::ResourceExhausted(note(message))
        }
        ControllerError::FailedPrecondition(message) => {
            ControllerError::FailedPrecondition(note(message))
        }
        ControllerError::OutOfRange(message) => ControllerError::OutOfRange(note(message)),
        ControllerError::Aborted(message) => ControllerError::Aborted(note(message)),
        ControllerError::Internal(message) => ControllerError::Internal(note(message)),
        interrupted @ ControllerError::Interrupted(_) => interrupted,
    }
}
