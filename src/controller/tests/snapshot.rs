//! Plain snapshots: CreateSnapshot, DeleteSnapshot and ListSnapshots.

use rstest::rstest;

use super::{controller, ctx, parameters, storage};
use crate::backend::ResourceKind;
use crate::controller::lease::LeaseKind;
use crate::controller::params::TYPE;
use crate::controller::{
    ControllerError, CreateSnapshotRequest, DeleteSnapshotRequest, ListSnapshotsRequest,
};
use crate::filter::FilterKey;
use crate::resources::{Snapshot, Status};
use crate::test_support::{Call, FakeBlockStorage, backup, snapshot, volume};

fn create(name: &str, volume_id: &str) -> CreateSnapshotRequest {
    CreateSnapshotRequest {
        name: name.to_owned(),
        source_volume_id: volume_id.to_owned(),
        ..CreateSnapshotRequest::default()
    }
}

#[rstest]
#[tokio::test]
async fn create_snapshot_waits_until_ready(storage: FakeBlockStorage) {
    storage.insert_volume(volume("vol-1", "data", 5, "eu01"));
    storage.queue_id(ResourceKind::Snapshot, "snap-new");

    let response = controller(&storage)
        .create_snapshot(&ctx(), &create("daily", "vol-1"))
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    let created = response.snapshot;
    assert_eq!(created.snapshot_id, "snap-new");
    assert_eq!(created.source_volume_id, "vol-1");
    assert_eq!(created.size_bytes, 5 * crate::capacity::GIB);
    assert!(created.ready_to_use);
    assert_eq!(storage.count("CreateSnapshot"), 1);
}

#[rstest]
#[tokio::test]
async fn create_snapshot_reuses_same_source(storage: FakeBlockStorage) {
    storage.insert_volume(volume("vol-1", "data", 5, "eu01"));
    storage.insert_snapshot(snapshot("snap-1", "daily", "vol-1", 5));

    let response = controller(&storage)
        .create_snapshot(&ctx(), &create("daily", "vol-1"))
        .await
        .unwrap_or_else(|err| panic!("create: {err}"));

    assert_eq!(response.snapshot.snapshot_id, "snap-1");
    assert_eq!(storage.count("CreateSnapshot"), 0);
}

#[rstest]
#[tokio::test]
async fn create_snapshot_with_other_source_conflicts(storage: FakeBlockStorage) {
    storage.insert_snapshot(snapshot("snap-1", "daily", "vol-2", 5));

    let err = controller(&storage)
        .create_snapshot(&ctx(), &create("daily", "vol-1"))
        .await
        .expect_err("name taken");

    assert!(matches!(err, ControllerError::AlreadyExists(_)), "got {err:?}");
    assert!(err.to_string().contains("different source volume ID"), "got {err}");
}

#[rstest]
#[tokio::test]
async fn duplicate_snapshot_names_are_internal(storage: FakeBlockStorage) {
    storage.insert_snapshot(snapshot("snap-1", "daily", "vol-1", 5));
    storage.insert_snapshot(snapshot("snap-2", "daily", "vol-1", 5));

    let err = controller(&storage)
        .create_snapshot(&ctx(), &create("daily", "vol-1"))
        .await
        .expect_err("duplicates");

    assert!(err.to_string().contains("Multiple snapshots"), "got {err}");
}

#[rstest]
#[tokio::test]
async fn snapshot_in_error_state_fails(storage: FakeBlockStorage) {
    storage.insert_volume(volume("vol-1", "data", 5, "eu01"));
    storage.set_final_status(ResourceKind::Snapshot, "ERROR");

    let err = controller(&storage)
        .create_snapshot(&ctx(), &create("daily", "vol-1"))
        .await
        .expect_err("error state");

    assert!(matches!(err, ControllerError::Internal(_)), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn snapshot_that_never_settles_times_out(storage: FakeBlockStorage) {
    storage.insert_volume(volume("vol-1", "data", 5, "eu01"));
    storage.set_final_status(ResourceKind::Snapshot, "CREATING");

    let err = controller(&storage)
        .create_snapshot(&ctx(), &create("daily", "vol-1"))
        .await
        .expect_err("timeout");

    assert!(err.to_string().contains("did not become ready in time"), "got {err}");
}

#[rstest]
#[case(create("", "vol-1"), "missing Snapshot Name")]
#[case(create("daily", ""), "missing Source Volume ID")]
#[tokio::test]
async fn create_snapshot_validates_request(
    storage: FakeBlockStorage,
    #[case] request: CreateSnapshotRequest,
    #[case] message: &str,
) {
    let err = controller(&storage)
        .create_snapshot(&ctx(), &request)
        .await
        .expect_err("invalid");
    assert_eq!(err, ControllerError::invalid(message));
}

#[rstest]
#[tokio::test]
async fn unknown_snapshot_type_is_invalid(storage: FakeBlockStorage) {
    let request = CreateSnapshotRequest {
        parameters: parameters(&[(TYPE, "archive")]),
        ..create("daily", "vol-1")
    };
    let err = controller(&storage)
        .create_snapshot(&ctx(), &request)
        .await
        .expect_err("unknown type");
    assert!(matches!(err, ControllerError::InvalidArgument(_)), "got {err:?}");
    assert!(storage.calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn concurrent_snapshot_with_same_name_is_aborted(storage: FakeBlockStorage) {
    let controller = controller(&storage);
    let _held = controller.leases.acquire(LeaseKind::Snapshot, "daily");

    let err = controller
        .create_snapshot(&ctx(), &create("daily", "vol-1"))
        .await
        .expect_err("lease held");

    assert!(matches!(err, ControllerError::Aborted(_)), "got {err:?}");
}

#[rstest]
#[tokio::test]
async fn delete_snapshot_removes_backup_with_same_id(storage: FakeBlockStorage) {
    storage.insert_backup(backup("backup-1", "nightly", "vol-1", "snap-1", "eu01"));

    controller(&storage)
        .delete_snapshot(
            &ctx(),
            &DeleteSnapshotRequest {
                snapshot_id: String::from("backup-1"),
            },
        )
        .await
        .unwrap_or_else(|err| panic!("delete: {err}"));

    assert!(storage.backups().is_empty());
    assert_eq!(storage.count("DeleteBackup"), 1);
}

#[rstest]
#[case("snap-1")]
#[case("snap-gone")]
#[tokio::test]
async fn delete_snapshot_is_idempotent(storage: FakeBlockStorage, #[case] snapshot_id: &str) {
    storage.insert_snapshot(snapshot("snap-1", "daily", "vol-1", 5));
    let request = DeleteSnapshotRequest {
        snapshot_id: snapshot_id.to_owned(),
    };
    let controller = controller(&storage);

    controller
        .delete_snapshot(&ctx(), &request)
        .await
        .unwrap_or_else(|err| panic!("delete: {err}"));
    controller
        .delete_snapshot(&ctx(), &request)
        .await
        .unwrap_or_else(|err| panic!("repeat delete: {err}"));

    let remaining: Vec<String> = storage
        .snapshots()
        .into_iter()
        .map(|snapshot| snapshot.id)
        .collect();
    assert!(!remaining.iter().any(|id| id == snapshot_id));
    assert_eq!(remaining.len(), usize::from(snapshot_id != "snap-1"));
    assert_eq!(storage.count("DeleteBackup"), 0);
}

#[rstest]
#[tokio::test]
async fn list_snapshots_returns_available_snapshots(storage: FakeBlockStorage) {
    storage.insert_snapshot(snapshot("snap-1", "a", "vol-1", 5));
    storage.insert_snapshot(snapshot("snap-2", "b", "vol-2", 5));
    storage.insert_snapshot(Snapshot {
        status: Status::from("CREATING"),
        ..snapshot("snap-3", "c", "vol-1", 5)
    });

    let all = controller(&storage)
        .list_snapshots(&ctx(), &ListSnapshotsRequest::default())
        .await
        .unwrap_or_else(|err| panic!("list: {err}"));
    let narrowed = controller(&storage)
        .list_snapshots(
            &ctx(),
            &ListSnapshotsRequest {
                source_volume_id: String::from("vol-1"),
                ..ListSnapshotsRequest::default()
            },
        )
        .await
        .unwrap_or_else(|err| panic!("list: {err}"));

    let ids = |entries: &[crate::controller::CsiSnapshot]| {
        entries
            .iter()
            .map(|entry| entry.snapshot_id.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(ids(&all.entries), vec!["snap-1", "snap-2"]);
    assert_eq!(ids(&narrowed.entries), vec!["snap-1"]);
    let narrowed_filters = storage.calls().into_iter().rev().find_map(|call| match call {
        Call::ListSnapshots(filters) => Some(filters),
        _ => None,
    });
    assert_eq!(
        narrowed_filters
            .as_ref()
            .and_then(|filters| filters.get(FilterKey::VolumeId)),
        Some("vol-1")
    );
}

#[rstest]
#[case("snap-1", Some("snap-1"))]
#[case("backup-1", Some("backup-1"))]
#[case("unknown", None)]
#[tokio::test]
async fn list_snapshots_by_id(
    storage: FakeBlockStorage,
    #[case] snapshot_id: &str,
    #[case] expected: Option<&str>,
) {
    storage.insert_snapshot(snapshot("snap-1", "a", "vol-1", 5));
    storage.insert_backup(backup("backup-1", "nightly", "vol-1", "snap-x", "eu01"));

    let response = controller(&storage)
        .list_snapshots(
            &ctx(),
            &ListSnapshotsRequest {
                snapshot_id: snapshot_id.to_owned(),
                ..ListSnapshotsRequest::default()
            },
        )
        .await
        .unwrap_or_else(|err| panic!("list: {err}"));

    let found = response
        .entries
        .first()
        .map(|entry| entry.snapshot_id.as_str());
    assert_eq!(found, expected);
    assert!(response.entries.len() <= 1);
}
