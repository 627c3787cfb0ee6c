//! Storage-class and snapshot-class parameters understood by the controller.

use std::collections::BTreeMap;

use super::error::ControllerError;

/// Selects between a plain snapshot and a backup on `CreateSnapshot`.
pub const TYPE: &str = "type";
/// Overrides the target availability zone on `CreateVolume`.
pub const AVAILABILITY: &str = "availability";
/// Performance class passed through to the backend on `CreateVolume`.
pub const VOLUME_TYPE: &str = "volume-type";
/// Per-GiB budget, in seconds, for a backup to become available.
pub const BACKUP_SECONDS_PER_GIB: &str = "backup-max-duration-seconds-per-gb";

/// Orchestrator-supplied keys copied into backend labels.
pub const LABEL_KEYS: &[&str] = &[
    "csi.storage.k8s.io/pvc/name",
    "csi.storage.k8s.io/pvc/namespace",
    "csi.storage.k8s.io/pv/name",
    "csi.storage.k8s.io/volumesnapshot/name",
    "csi.storage.k8s.io/volumesnapshot/namespace",
    "csi.storage.k8s.io/volumesnapshotcontent/name",
];

/// Kind of artefact `CreateSnapshot` produces.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SnapshotType {
    /// Backend snapshot.
    #[default]
    Snapshot,
    /// Backup materialised through a transient snapshot.
    Backup,
}

impl SnapshotType {
    /// Reads the `type` parameter. Missing or empty means
    /// [`SnapshotType::Snapshot`].
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for unknown values.
    pub fn from_parameters(parameters: &BTreeMap<String, String>) -> Result<Self, ControllerError> {
        match parameters.get(TYPE).map(|value| value.trim()) {
            None | Some("" | "snapshot") => Ok(Self::Snapshot),
            Some("backup") => Ok(Self::Backup),
            Some(other) => Err(ControllerError::invalid(format!(
                "snapshot type {other} is not supported, use snapshot or backup"
            ))),
        }
    }
}

/// Reads the per-GiB backup budget, falling back to `default`.
///
/// # Errors
///
/// Returns [`ControllerError::InvalidArgument`] when the value is not an
/// unsigned integer.
pub fn backup_seconds_per_gib(
    parameters: &BTreeMap<String, String>,
    default: u64,
) -> Result<u64, ControllerError> {
    parameters
        .get(BACKUP_SECONDS_PER_GIB)
        .map_or(Ok(default), |raw| {
            raw.trim().parse().map_err(|_| {
                ControllerError::invalid(format!(
                    "invalid {BACKUP_SECONDS_PER_GIB} parameter {raw:?}: expected whole seconds"
                ))
            })
        })
}

/// Returns the first non-empty value of `key`.
#[must_use]
pub fn non_empty<'a>(parameters: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    parameters
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// Builds backend labels from well-known orchestrator parameters plus an
/// optional cluster label.
#[must_use]
pub fn labels(
    parameters: &BTreeMap<String, String>,
    cluster: Option<(&str, &str)>,
) -> BTreeMap<String, String> {
    let mut selected: BTreeMap<String, String> = LABEL_KEYS
        .iter()
        .filter_map(|key| {
            non_empty(parameters, key).map(|value| ((*key).to_owned(), value.to_owned()))
        })
        .collect();
    if let Some((key, value)) = cluster {
        selected.insert(key.to_owned(), value.to_owned());
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect()
    }

    #[rstest]
    #[case(&[], SnapshotType::Snapshot)]
    #[case(&[(TYPE, "")], SnapshotType::Snapshot)]
    #[case(&[(TYPE, "snapshot")], SnapshotType::Snapshot)]
    #[case(&[(TYPE, "backup")], SnapshotType::Backup)]
    fn snapshot_type_parses(#[case] pairs: &[(&str, &str)], #[case] expected: SnapshotType) {
        assert_eq!(SnapshotType::from_parameters(&params(pairs)), Ok(expected));
    }

    #[test]
    fn unknown_snapshot_type_is_rejected() {
        let err = SnapshotType::from_parameters(&params(&[(TYPE, "clone")]))
            .expect_err("unknown type");
        assert!(matches!(err, ControllerError::InvalidArgument(_)));
    }

    #[rstest]
    #[case(&[], 20)]
    #[case(&[(BACKUP_SECONDS_PER_GIB, "45")], 45)]
    fn backup_budget_defaults_and_overrides(#[case] pairs: &[(&str, &str)], #[case] expected: u64) {
        assert_eq!(backup_seconds_per_gib(&params(pairs), 20), Ok(expected));
    }

    #[test]
    fn malformed_backup_budget_is_rejected() {
        let result = backup_seconds_per_gib(&params(&[(BACKUP_SECONDS_PER_GIB, "soon")]), 20);
        assert!(matches!(result, Err(ControllerError::InvalidArgument(_))));
    }

    #[test]
    fn labels_copy_known_keys_only() {
        let input = params(&[
            ("csi.storage.k8s.io/pvc/name", "data"),
            ("csi.storage.k8s.io/pvc/namespace", ""),
            ("unrelated", "ignored"),
        ]);
        let result = labels(&input, Some(("block.csi.cloud/cluster", "prod")));
        assert_eq!(
            result,
            params(&[
                ("block.csi.cloud/cluster", "prod"),
                ("csi.storage.k8s.io/pvc/name", "data"),
            ])
        );
    }
}
