//! [`BlockStorage`] over the REST endpoints.

use reqwest::Method;

use super::wire::{CreateBackup, ResizeVolume};
use super::{IaasClient, Target};
use crate::backend::{
    BackendError, BackendFuture, BlockStorage, NewBackup, NewSnapshot, NewVolume, ResourceKind,
};
use crate::filter::Filters;
use crate::resources::{Backup, Server, Snapshot, Volume};

impl BlockStorage for IaasClient {
    fn create_volume<'a>(&'a self, request: &'a NewVolume) -> BackendFuture<'a, Volume> {
        Box::pin(async move {
            request.validate()?;
            self.create("volumes", request, ResourceKind::Volume).await
        })
    }

    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.execute(
                Method::DELETE,
                &format!("volumes/{volume_id}"),
                Target::new(ResourceKind::Volume, volume_id),
            )
            .await
        })
    }

    fn get_volume<'a>(&'a self, volume_id: &'a str) -> BackendFuture<'a, Volume> {
        Box::pin(async move {
            self.fetch(
                &format!("volumes/{volume_id}"),
                Target::new(ResourceKind::Volume, volume_id),
            )
            .await
        })
    }

    fn get_volumes_by_name<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Vec<Volume>> {
        Box::pin(async move {
            let volumes = self.fetch_all("volumes", ResourceKind::Volume).await?;
            Ok(Filters::by_name(name).apply(volumes))
        })
    }

    fn list_volumes(&self) -> BackendFuture<'_, Vec<Volume>> {
        Box::pin(async move { self.fetch_all("volumes", ResourceKind::Volume).await })
    }

    fn attach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.execute(
                Method::PUT,
                &format!("servers/{server_id}/volume-attachments/{volume_id}"),
                Target::new(ResourceKind::Volume, volume_id),
            )
            .await
        })
    }

    fn detach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.execute(
                Method::DELETE,
                &format!("servers/{server_id}/volume-attachments/{volume_id}"),
                Target::new(ResourceKind::Volume, volume_id),
            )
            .await
        })
    }

    fn expand_volume<'a>(
        &'a self,
        volume_id: &'a str,
        new_size_gib: u64,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let body = ResizeVolume { size: new_size_gib };
            self.send(
                self.request(Method::POST, &format!("volumes/{volume_id}/resize"))
                    .json(&body),
                Target::new(ResourceKind::Volume, volume_id),
            )
            .await
            .map(drop)
        })
    }

    fn create_snapshot<'a>(&'a self, request: &'a NewSnapshot) -> BackendFuture<'a, Snapshot> {
        Box::pin(async move {
            if request.volume_id.trim().is_empty() {
                return Err(BackendError::Validation(String::from("volumeId")));
            }
            self.create("snapshots", request, ResourceKind::Snapshot)
                .await
        })
    }

    fn get_snapshot_by_id<'a>(&'a self, snapshot_id: &'a str) -> BackendFuture<'a, Snapshot> {
        Box::pin(async move {
            self.fetch(
                &format!("snapshots/{snapshot_id}"),
                Target::new(ResourceKind::Snapshot, snapshot_id),
            )
            .await
        })
    }

    fn list_snapshots<'a>(&'a self, filters: &'a Filters) -> BackendFuture<'a, Vec<Snapshot>> {
        Box::pin(async move {
            let snapshots = self.fetch_all("snapshots", ResourceKind::Snapshot).await?;
            Ok(filters.apply(snapshots))
        })
    }

    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.execute(
                Method::DELETE,
                &format!("snapshots/{snapshot_id}"),
                Target::new(ResourceKind::Snapshot, snapshot_id),
            )
            .await
        })
    }

    fn create_backup<'a>(&'a self, request: &'a NewBackup) -> BackendFuture<'a, Backup> {
        Box::pin(async move {
            if request.snapshot_id.trim().is_empty() {
                return Err(BackendError::Validation(String::from("snapshotId")));
            }
            self.create("backups", &CreateBackup::from(request), ResourceKind::Backup)
                .await
        })
    }

    fn get_backup_by_id<'a>(&'a self, backup_id: &'a str) -> BackendFuture<'a, Backup> {
        Box::pin(async move {
            self.fetch(
                &format!("backups/{backup_id}"),
                Target::new(ResourceKind::Backup, backup_id),
            )
            .await
        })
    }

    fn list_backups<'a>(&'a self, filters: &'a Filters) -> BackendFuture<'a, Vec<Backup>> {
        Box::pin(async move {
            let backups = self.fetch_all("backups", ResourceKind::Backup).await?;
            Ok(filters.apply(backups))
        })
    }

    fn delete_backup<'a>(&'a self, backup_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.execute(
                Method::DELETE,
                &format!("backups/{backup_id}"),
                Target::new(ResourceKind::Backup, backup_id),
            )
            .await
        })
    }

    fn get_instance_by_id<'a>(&'a self, server_id: &'a str) -> BackendFuture<'a, Server> {
        Box::pin(async move {
            self.fetch(
                &format!("servers/{server_id}"),
                Target::new(ResourceKind::Server, server_id),
            )
            .await
        })
    }
}
