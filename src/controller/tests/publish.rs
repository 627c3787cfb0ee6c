//! Attach and detach.

use rstest::rstest;

use super::{controller, ctx, storage};
use crate::backend::BackendError;
use crate::controller::{
    ControllerError, ControllerPublishVolumeRequest, ControllerUnpublishVolumeRequest,
    VolumeCapability,
};
use crate::resources::{Status, Volume, status};
use crate::test_support::{Call, FakeBlockStorage, server, volume};

fn publish(volume_id: &str, node_id: &str) -> ControllerPublishVolumeRequest {
    ControllerPublishVolumeRequest {
        volume_id: volume_id.to_owned(),
        node_id: node_id.to_owned(),
        volume_capability: Some(VolumeCapability::default()),
        readonly: false,
    }
}

fn unpublish(volume_id: &str, node_id: &str) -> ControllerUnpublishVolumeRequest {
    ControllerUnpublishVolumeRequest {
        volume_id: volume_id.to_owned(),
        node_id: node_id.to_owned(),
    }
}

fn attached(id: &str, server_id: &str) -> Volume {
    Volume {
        status: Status::from(status::ATTACHED),
        server_id: Some(server_id.to_owned()),
        ..volume(id, "data", 5, "eu01")
    }
}

fn mutations(storage: &FakeBlockStorage) -> Vec<Call> {
    storage
        .calls()
        .into_iter()
        .filter(Call::is_mutation)
        .collect()
}

#[rstest]
#[tokio::test]
async fn publish_attaches_volume(storage: FakeBlockStorage) {
    storage.insert_server(server("srv-1"));
    storage.insert_volume(volume("vol-1", "data", 5, "eu01"));

    controller(&storage)
        .controller_publish_volume(&ctx(), &publish("vol-1", "srv-1"))
        .await
        .unwrap_or_else(|err| panic!("publish: {err}"));

    assert_eq!(
        mutations(&storage),
        vec![Call::AttachVolume {
            server_id: String::from("srv-1"),
            volume_id: String::from("vol-1"),
        }]
    );
    assert_eq!(
        storage.volume("vol-1").and_then(|current| current.server_id),
        Some(String::from("srv-1"))
    );
}

#[rstest]
#[tokio::test]
async fn publish_is_idempotent(storage: FakeBlockStorage) {
    storage.insert_server(server("srv-1"));
    storage.insert_volume(attached("vol-1", "srv-1"));

    controller(&storage)
        .controller_publish_volume(&ctx(), &publish("vol-1", "srv-1"))
        .await
        .unwrap_or_else(|err| panic!("publish: {err}"));

    assert!(mutations(&storage).is_empty());
}

#[rstest]
#[tokio::test]
async fn publish_to_missing_instance_is_not_found(storage: FakeBlockStorage) {
    storage.insert_volume(volume("vol-1", "data", 5, "eu01"));

    let err = controller(&storage)
        .controller_publish_volume(&ctx(), &publish("vol-1", "srv-gone"))
        .await
        .expect_err("missing instance");

    assert!(matches!(err, ControllerError::NotFound(_)), "got {err:?}");
    assert_eq!(storage.count("AttachVolume"), 0);
}

#[rstest]
#[tokio::test]
async fn publish_of_missing_volume_is_not_found(storage: FakeBlockStorage) {
    storage.insert_server(server("srv-1"));

    let err = controller(&storage)
        .controller_publish_volume(&ctx(), &publish("vol-gone", "srv-1"))
        .await
        .expect_err("missing volume");

    assert!(matches!(err, ControllerError::NotFound(_)), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn publish_to_other_server_surfaces_backend_refusal(storage: FakeBlockStorage) {
    storage.insert_server(server("srv-2"));
    storage.insert_volume(attached("vol-1", "srv-1"));

    let err = controller(&storage)
        .controller_publish_volume(&ctx(), &publish("vol-1", "srv-2"))
        .await
        .expect_err("attached elsewhere");

    assert!(matches!(err, ControllerError::Internal(_)), "got {err:?}");
    assert_eq!(storage.count("AttachVolume"), 1);
}

#[rstest]
#[case(publish("", "srv-1"), "missing Volume ID")]
#[case(publish("vol-1", ""), "missing Node ID")]
#[case(
    ControllerPublishVolumeRequest { volume_capability: None, ..publish("vol-1", "srv-1") },
    "missing Volume capability"
)]
#[tokio::test]
async fn publish_validates_request(
    storage: FakeBlockStorage,
    #[case] request: ControllerPublishVolumeRequest,
    #[case] message: &str,
) {
    let err = controller(&storage)
        .controller_publish_volume(&ctx(), &request)
        .await
        .expect_err("invalid");
    assert_eq!(err, ControllerError::invalid(message));
}

#[rstest]
#[tokio::test]
async fn unpublish_detaches_volume(storage: FakeBlockStorage) {
    storage.insert_server(server("srv-1"));
    storage.insert_volume(attached("vol-1", "srv-1"));

    controller(&storage)
        .controller_unpublish_volume(&ctx(), &unpublish("vol-1", "srv-1"))
        .await
        .unwrap_or_else(|err| panic!("unpublish: {err}"));

    assert_eq!(storage.count("DetachVolume"), 1);
    let current = storage
        .volume("vol-1")
        .unwrap_or_else(|| panic!("volume vanished"));
    assert!(current.server_id.is_none());
    assert!(current.status.is(status::AVAILABLE));
}

#[rstest]
#[tokio::test]
async fn unpublish_of_available_volume_changes_nothing(storage: FakeBlockStorage) {
    storage.insert_server(server("srv-1"));
    storage.insert_volume(volume("vol-1", "data", 5, "eu01"));

    controller(&storage)
        .controller_unpublish_volume(&ctx(), &unpublish("vol-1", "srv-1"))
        .await
        .unwrap_or_else(|err| panic!("unpublish: {err}"));

    assert!(mutations(&storage).is_empty());
}

#[rstest]
#[case("srv-gone", Some("vol-1"))]
#[case("srv-1", None)]
#[tokio::test]
async fn unpublish_of_absent_resources_succeeds(
    storage: FakeBlockStorage,
    #[case] node_id: &str,
    #[case] volume_id: Option<&str>,
) {
    storage.insert_server(server("srv-1"));
    storage.insert_volume(attached("vol-1", "srv-1"));

    controller(&storage)
        .controller_unpublish_volume(&ctx(), &unpublish(volume_id.unwrap_or("vol-gone"), node_id))
        .await
        .unwrap_or_else(|err| panic!("unpublish: {err}"));

    assert!(mutations(&storage).is_empty());
}

#[rstest]
#[tokio::test]
async fn unpublish_from_other_server_is_noop(storage: FakeBlockStorage) {
    storage.insert_server(server("srv-2"));
    storage.insert_volume(attached("vol-1", "srv-1"));

    controller(&storage)
        .controller_unpublish_volume(&ctx(), &unpublish("vol-1", "srv-2"))
        .await
        .unwrap_or_else(|err| panic!("unpublish: {err}"));

    assert!(mutations(&storage).is_empty());
}

#[rstest]
#[tokio::test]
async fn unpublish_in_transient_state_fails(storage: FakeBlockStorage) {
    storage.insert_server(server("srv-1"));
    storage.insert_volume(Volume {
        status: Status::from("DETACHING"),
        ..volume("vol-1", "data", 5, "eu01")
    });

    let err = controller(&storage)
        .controller_unpublish_volume(&ctx(), &unpublish("vol-1", "srv-1"))
        .await
        .expect_err("transient state");

    assert!(matches!(err, ControllerError::Internal(_)), "got {err:?}");
    assert!(err.to_string().contains("cannot detach volume vol-1"), "got {err}");
}

#[rstest]
#[tokio::test]
async fn instance_lookup_failure_is_internal(storage: FakeBlockStorage) {
    storage.fail_on(
        "GetInstanceById",
        BackendError::Api {
            status: 500,
            message: String::from("compute down"),
        },
    );

    let err = controller(&storage)
        .controller_unpublish_volume(&ctx(), &unpublish("vol-1", "srv-1"))
        .await
        .expect_err("lookup fails");

    assert!(matches!(err, ControllerError::Internal(_)), "got {err:?}");
}
