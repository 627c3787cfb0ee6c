//! Unit tests for controller orchestration against the in-memory backend.

mod publish;
mod snapshot;

use std::collections::BTreeMap;

use rstest::fixture;

use super::{
    Controller, CreateVolumeRequest, DEFAULT_DRIVER_NAME, Topology, TopologyRequirement,
    VolumeCapability,
};
use crate::capacity::GIB;
use crate::context::RequestContext;
use crate::test_support::{FakeBlockStorage, fast_timing};

use super::request::CapacityRange;

const ZONE_KEY: &str = "topology.block.csi.cloud/zone";

#[fixture]
fn storage() -> FakeBlockStorage {
    FakeBlockStorage::new()
}

fn controller(storage: &FakeBlockStorage) -> Controller<FakeBlockStorage> {
    Controller::new(storage.clone(), DEFAULT_DRIVER_NAME).with_timing(fast_timing())
}

fn ctx() -> RequestContext {
    RequestContext::new()
}

fn zone_requirement(zone: &str) -> TopologyRequirement {
    TopologyRequirement {
        requisite: vec![Topology {
            segments: BTreeMap::from([(ZONE_KEY.to_owned(), zone.to_owned())]),
        }],
        preferred: Vec::new(),
    }
}

fn create_request(name: &str, size_gib: u64) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: name.to_owned(),
        capacity_range: Some(CapacityRange {
            required_bytes: size_gib * GIB,
            limit_bytes: 0,
        }),
        volume_capabilities: vec![VolumeCapability::default()],
        ..CreateVolumeRequest::default()
    }
}

fn parameters(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}

/// Position of the first call named `name`, panicking when it is missing.
fn first_call(names: &[&str], name: &str) -> usize {
    names
        .iter()
        .position(|candidate| *candidate == name)
        .unwrap_or_else(|| panic!("{name} was not called: {names:?}"))
}
