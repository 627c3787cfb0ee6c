//! BDD step definitions for controller provisioning flows.

use std::collections::BTreeMap;

use block_csi::backend::ResourceKind;
use block_csi::capacity::gib_to_bytes;
use block_csi::controller::{
    CapacityRange, ContentSource, ControllerPublishVolumeRequest,
    ControllerUnpublishVolumeRequest, CreateSnapshotRequest, CreateVolumeRequest,
    DeleteVolumeRequest, VolumeCapability, params,
};
use block_csi::resources::status;
use block_csi::test_support::{backup, server, volume};
use rstest_bdd_macros::{given, then, when};

use super::test_helpers::{ProvisioningWorld, StepError};

fn volume_request(name: &str, size_gib: u64, zone: &str) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: name.to_owned(),
        capacity_range: Some(CapacityRange {
            required_bytes: gib_to_bytes(size_gib),
            limit_bytes: 0,
        }),
        volume_capabilities: vec![VolumeCapability::default()],
        parameters: BTreeMap::from([(params::AVAILABILITY.to_owned(), zone.to_owned())]),
        ..CreateVolumeRequest::default()
    }
}

#[given("an empty project")]
fn empty_project(world: &ProvisioningWorld) {
    assert!(world.storage.calls().is_empty());
}

#[given("an available volume \"{id}\" in zone \"{zone}\"")]
fn available_volume(world: &ProvisioningWorld, id: String, zone: String) {
    world.storage.insert_volume(volume(&id, "existing", 10, &zone));
}

#[given("a server \"{id}\"")]
fn a_server(world: &ProvisioningWorld, id: String) {
    world.storage.insert_server(server(&id));
}

#[given("a backup \"{id}\" of volume \"{volume_id}\" in zone \"{zone}\"")]
fn a_backup(world: &ProvisioningWorld, id: String, volume_id: String, zone: String) {
    world
        .storage
        .insert_backup(backup(&id, "nightly", &volume_id, "snap-gone", &zone));
}

#[given("new backups end in state \"{state}\"")]
fn backups_end_in(world: &ProvisioningWorld, state: String) {
    world.storage.set_final_status(ResourceKind::Backup, &state);
}

#[when("I create volume \"{name}\" of {size} GiB in zone \"{zone}\"")]
fn create_volume(world: &ProvisioningWorld, name: String, size: u64, zone: String) {
    let request = volume_request(&name, size, &zone);
    world.record(|ctx| async move { world.controller.create_volume(&ctx, &request).await });
}

#[when("I restore \"{source}\" into volume \"{name}\" in zone \"{zone}\"")]
fn restore_volume(world: &ProvisioningWorld, source: String, name: String, zone: String) {
    let request = CreateVolumeRequest {
        content_source: Some(ContentSource::Snapshot {
            snapshot_id: source,
        }),
        ..volume_request(&name, 1, &zone)
    };
    world.record(|ctx| async move { world.controller.create_volume(&ctx, &request).await });
}

#[when("I delete volume \"{id}\"")]
fn delete_volume(world: &ProvisioningWorld, id: String) {
    let request = DeleteVolumeRequest { volume_id: id };
    world.record(|ctx| async move { world.controller.delete_volume(&ctx, &request).await });
}

#[when("I publish volume \"{volume_id}\" to server \"{node_id}\"")]
fn publish_volume(world: &ProvisioningWorld, volume_id: String, node_id: String) {
    let request = ControllerPublishVolumeRequest {
        volume_id,
        node_id,
        volume_capability: Some(VolumeCapability::default()),
        readonly: false,
    };
    world.record(|ctx| async move {
        world
            .controller
            .controller_publish_volume(&ctx, &request)
            .await
    });
}

#[when("I unpublish volume \"{volume_id}\" from server \"{node_id}\"")]
fn unpublish_volume(world: &ProvisioningWorld, volume_id: String, node_id: String) {
    let request = ControllerUnpublishVolumeRequest { volume_id, node_id };
    world.record(|ctx| async move {
        world
            .controller
            .controller_unpublish_volume(&ctx, &request)
            .await
    });
}

#[when("I create backup \"{name}\" of volume \"{volume_id}\"")]
fn create_backup(world: &ProvisioningWorld, name: String, volume_id: String) {
    let request = CreateSnapshotRequest {
        name,
        source_volume_id: volume_id,
        parameters: BTreeMap::from([(params::TYPE.to_owned(), String::from("backup"))]),
    };
    world.record(|ctx| async move { world.controller.create_snapshot(&ctx, &request).await });
}

#[then("the operation succeeds")]
fn operation_succeeds(world: &ProvisioningWorld) -> Result<(), StepError> {
    world
        .outcome()?
        .map_err(|err| StepError::Assertion(format!("expected success, got {err}")))
}

#[then("the operation fails with \"{code}\"")]
fn operation_fails_with(world: &ProvisioningWorld, code: String) -> Result<(), StepError> {
    let Err(err) = world.outcome()? else {
        return Err(StepError::Assertion(format!(
            "expected {code} failure, got success"
        )));
    };
    let actual = format!("{:?}", err.code());
    if actual == code {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {code}, got {actual}: {err}"
        )))
    }
}

#[then("the backend created {count} volume")]
fn backend_created_volumes(world: &ProvisioningWorld, count: usize) -> Result<(), StepError> {
    let created = world.storage.count("CreateVolume");
    if created == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} CreateVolume calls, got {created}"
        )))
    }
}

#[then("volume \"{volume_id}\" is attached to server \"{node_id}\"")]
fn volume_attached(
    world: &ProvisioningWorld,
    volume_id: String,
    node_id: String,
) -> Result<(), StepError> {
    let record = world
        .storage
        .volume(&volume_id)
        .ok_or_else(|| StepError::Assertion(format!("volume {volume_id} is missing")))?;
    if record.attached_server() == Some(node_id.as_str()) && record.status.is(status::ATTACHED) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "volume {volume_id} is {} on {:?}",
            record.status,
            record.attached_server()
        )))
    }
}

#[then("volume \"{volume_id}\" is available")]
fn volume_available(world: &ProvisioningWorld, volume_id: String) -> Result<(), StepError> {
    let record = world
        .storage
        .volume(&volume_id)
        .ok_or_else(|| StepError::Assertion(format!("volume {volume_id} is missing")))?;
    if record.status.is(status::AVAILABLE) && record.attached_server().is_none() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "volume {volume_id} is {}",
            record.status
        )))
    }
}

#[then("no snapshot remains")]
fn no_snapshot_remains(world: &ProvisioningWorld) -> Result<(), StepError> {
    let remaining = world.storage.snapshots();
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "transient snapshots left behind: {remaining:?}"
        )))
    }
}

#[then("the backend holds {count} backup")]
fn backend_holds_backups(world: &ProvisioningWorld, count: usize) -> Result<(), StepError> {
    let held = world.storage.backups().len();
    if held == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} backups, got {held}"
        )))
    }
}
