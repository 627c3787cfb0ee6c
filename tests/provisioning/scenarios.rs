//! BDD scenarios for controller provisioning.

use rstest_bdd_macros::scenario;

use super::test_helpers::{ProvisioningWorld, world};

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Retrying a volume creation reuses the first volume"
)]
fn scenario_retry_reuses_volume(world: ProvisioningWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Reject a same-named volume with another size"
)]
fn scenario_size_conflict(world: ProvisioningWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Refuse to restore a backup into another zone"
)]
fn scenario_cross_zone_restore(world: ProvisioningWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/provisioning.feature",
    name = "Refuse to delete an attached volume"
)]
fn scenario_delete_attached(world: ProvisioningWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/attachment.feature",
    name = "Publish then unpublish a volume"
)]
fn scenario_publish_unpublish(world: ProvisioningWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/attachment.feature",
    name = "Publishing to a missing server is reported as not found"
)]
fn scenario_publish_missing_server(world: ProvisioningWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/attachment.feature",
    name = "Unpublishing an unknown volume succeeds"
)]
fn scenario_unpublish_unknown(world: ProvisioningWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "A backup leaves no transient snapshot behind"
)]
fn scenario_backup_cleans_up(world: ProvisioningWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/backup.feature",
    name = "A failed backup still removes its transient snapshot"
)]
fn scenario_failed_backup_cleans_up(world: ProvisioningWorld) {
    drop(world);
}
