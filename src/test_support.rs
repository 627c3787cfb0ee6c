//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeBlockStorage`] is an in-memory backend that records every call in
//! order, lets tests seed resources, inject failures and decide how many
//! polls a freshly created resource stays in its transient state.

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::backend::{
    BackendError, BackendFuture, BlockStorage, NewBackup, NewSnapshot, NewVolume, ResourceKind,
};
use crate::controller::Timing;
use crate::filter::Filters;
use crate::resources::{Backup, Server, Snapshot, Status, Volume, status};
use crate::wait::Backoff;

/// Backend call recorded by [`FakeBlockStorage`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Call {
    /// `create_volume`.
    CreateVolume(NewVolume),
    /// `delete_volume`.
    DeleteVolume(String),
    /// `get_volume`.
    GetVolume(String),
    /// `get_volumes_by_name`.
    GetVolumesByName(String),
    /// `list_volumes`.
    ListVolumes,
    /// `attach_volume`.
    AttachVolume {
        /// Target server.
        server_id: String,
        /// Volume being attached.
        volume_id: String,
    },
    /// `detach_volume`.
    DetachVolume {
        /// Server being detached from.
        server_id: String,
        /// Volume being detached.
        volume_id: String,
    },
    /// `expand_volume`.
    ExpandVolume {
        /// Volume being resized.
        volume_id: String,
        /// Requested size in GiB.
        size_gib: u64,
    },
    /// `create_snapshot`.
    CreateSnapshot(NewSnapshot),
    /// `get_snapshot_by_id`.
    GetSnapshotById(String),
    /// `list_snapshots`.
    ListSnapshots(Filters),
    /// `delete_snapshot`.
    DeleteSnapshot(String),
    /// `create_backup`.
    CreateBackup(NewBackup),
    /// `get_backup_by_id`.
    GetBackupById(String),
    /// `list_backups`.
    ListBackups(Filters),
    /// `delete_backup`.
    DeleteBackup(String),
    /// `get_instance_by_id`.
    GetInstanceById(String),
}

impl Call {
    /// Operation name, used for ordering assertions and failure injection.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateVolume(_) => "CreateVolume",
            Self::DeleteVolume(_) => "DeleteVolume",
            Self::GetVolume(_) => "GetVolume",
            Self::GetVolumesByName(_) => "GetVolumesByName",
            Self::ListVolumes => "ListVolumes",
            Self::AttachVolume { .. } => "AttachVolume",
            Self::DetachVolume { .. } => "DetachVolume",
            Self::ExpandVolume { .. } => "ExpandVolume",
            Self::CreateSnapshot(_) => "CreateSnapshot",
            Self::GetSnapshotById(_) => "GetSnapshotById",
            Self::ListSnapshots(_) => "ListSnapshots",
            Self::DeleteSnapshot(_) => "DeleteSnapshot",
            Self::CreateBackup(_) => "CreateBackup",
            Self::GetBackupById(_) => "GetBackupById",
            Self::ListBackups(_) => "ListBackups",
            Self::DeleteBackup(_) => "DeleteBackup",
            Self::GetInstanceById(_) => "GetInstanceById",
        }
    }

    /// Returns `true` for calls that change backend state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::CreateVolume(_)
                | Self::DeleteVolume(_)
                | Self::AttachVolume { .. }
                | Self::DetachVolume { .. }
                | Self::ExpandVolume { .. }
                | Self::CreateSnapshot(_)
                | Self::DeleteSnapshot(_)
                | Self::CreateBackup(_)
                | Self::DeleteBackup(_)
        )
    }
}

#[derive(Debug)]
struct Pending {
    polls_left: u32,
    settles_to: Status,
}

#[derive(Debug)]
struct FakeState {
    volumes: Vec<Volume>,
    snapshots: Vec<Snapshot>,
    backups: Vec<Backup>,
    servers: Vec<Server>,
    calls: Vec<Call>,
    failures: HashMap<&'static str, BackendError>,
    next_ids: HashMap<&'static str, Vec<String>>,
    final_status: HashMap<&'static str, Status>,
    settle_polls: u32,
    pending: HashMap<String, Pending>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            volumes: Vec::new(),
            snapshots: Vec::new(),
            backups: Vec::new(),
            servers: Vec::new(),
            calls: Vec::new(),
            failures: HashMap::new(),
            next_ids: HashMap::new(),
            final_status: HashMap::new(),
            settle_polls: 1,
            pending: HashMap::new(),
        }
    }
}

const fn kind_key(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Volume => "volume",
        ResourceKind::Snapshot => "snapshot",
        ResourceKind::Backup => "backup",
        ResourceKind::Server => "server",
    }
}

impl FakeState {
    fn record(&mut self, call: Call) -> Result<(), BackendError> {
        let name = call.name();
        self.calls.push(call);
        self.failures.get(name).cloned().map_or(Ok(()), Err)
    }

    fn next_id(&mut self, kind: ResourceKind) -> String {
        let key = kind_key(kind);
        self.next_ids
            .get_mut(key)
            .and_then(|queue| (!queue.is_empty()).then(|| queue.remove(0)))
            .unwrap_or_else(|| format!("{key}-{}", Uuid::new_v4().simple()))
    }

    fn settle_status(&self, kind: ResourceKind) -> Status {
        self.final_status
            .get(kind_key(kind))
            .cloned()
            .unwrap_or_else(|| {
                Status::from(if kind == ResourceKind::Backup {
                    "available"
                } else {
                    status::AVAILABLE
                })
            })
    }

    fn schedule(&mut self, id: &str, settles_to: Status) {
        self.pending.insert(
            id.to_owned(),
            Pending {
                polls_left: self.settle_polls,
                settles_to,
            },
        );
    }

    /// Advances a pending transition by one poll, returning the status to
    /// apply once it settles.
    fn poll(&mut self, id: &str) -> Option<Status> {
        let entry = self.pending.get_mut(id)?;
        if entry.polls_left > 0 {
            entry.polls_left -= 1;
            return None;
        }
        self.pending.remove(id).map(|done| done.settles_to)
    }

    fn volume_mut(&mut self, volume_id: &str) -> Result<&mut Volume, BackendError> {
        self.volumes
            .iter_mut()
            .find(|volume| volume.id == volume_id)
            .ok_or_else(|| BackendError::not_found(ResourceKind::Volume, volume_id))
    }
}

/// In-memory [`BlockStorage`] double.
///
/// Clones share state, so a test can keep a handle while the controller owns
/// another.
#[derive(Clone, Debug, Default)]
pub struct FakeBlockStorage {
    state: Arc<StdMutex<FakeState>>,
}

impl FakeBlockStorage {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Adds a volume.
    pub fn insert_volume(&self, volume: Volume) {
        self.with_state(|state| state.volumes.push(volume));
    }

    /// Adds a snapshot.
    pub fn insert_snapshot(&self, snapshot: Snapshot) {
        self.with_state(|state| state.snapshots.push(snapshot));
    }

    /// Adds a backup.
    pub fn insert_backup(&self, backup: Backup) {
        self.with_state(|state| state.backups.push(backup));
    }

    /// Adds a server.
    pub fn insert_server(&self, server: Server) {
        self.with_state(|state| state.servers.push(server));
    }

    /// Queues the id the next created resource of `kind` receives.
    pub fn queue_id(&self, kind: ResourceKind, id: impl Into<String>) {
        let value = id.into();
        self.with_state(|state| {
            state
                .next_ids
                .entry(kind_key(kind))
                .or_default()
                .push(value);
        });
    }

    /// Sets how many status polls a new resource stays in its transient
    /// state. Defaults to one.
    pub fn set_settle_polls(&self, polls: u32) {
        self.with_state(|state| state.settle_polls = polls);
    }

    /// Sets the status new resources of `kind` settle into.
    pub fn set_final_status(&self, kind: ResourceKind, final_status: &str) {
        let value = Status::from(final_status);
        self.with_state(|state| {
            state.final_status.insert(kind_key(kind), value);
        });
    }

    /// Makes every call to operation `name` (see [`Call::name`]) fail.
    pub fn fail_on(&self, name: &'static str, err: BackendError) {
        self.with_state(|state| {
            state.failures.insert(name, err);
        });
    }

    /// Calls recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.with_state(|state| state.calls.clone())
    }

    /// Operation names recorded so far, in order.
    #[must_use]
    pub fn call_names(&self) -> Vec<&'static str> {
        self.with_state(|state| state.calls.iter().map(Call::name).collect())
    }

    /// Number of recorded calls to operation `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.with_state(|state| state.calls.iter().filter(|call| call.name() == name).count())
    }

    /// Current record of a volume.
    #[must_use]
    pub fn volume(&self, volume_id: &str) -> Option<Volume> {
        self.with_state(|state| {
            state
                .volumes
                .iter()
                .find(|volume| volume.id == volume_id)
                .cloned()
        })
    }

    /// Every stored snapshot.
    #[must_use]
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.with_state(|state| state.snapshots.clone())
    }

    /// Every stored backup.
    #[must_use]
    pub fn backups(&self) -> Vec<Backup> {
        self.with_state(|state| state.backups.clone())
    }
}

impl BlockStorage for FakeBlockStorage {
    fn create_volume<'a>(&'a self, request: &'a NewVolume) -> BackendFuture<'a, Volume> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::CreateVolume(request.clone()))?;
                request.validate()?;
                let volume = Volume {
                    id: state.next_id(ResourceKind::Volume),
                    name: request.name.clone(),
                    size: request.size,
                    status: Status::from(status::CREATING),
                    availability_zone: request.availability_zone.clone().unwrap_or_default(),
                    server_id: None,
                    source: request.source.clone(),
                    performance_class: request.performance_class.clone(),
                    labels: request.labels.clone(),
                };
                let settles_to = state.settle_status(ResourceKind::Volume);
                state.schedule(&volume.id, settles_to);
                state.volumes.push(volume.clone());
                Ok(volume)
            })
        })
    }

    fn delete_volume<'a>(&'a self, volume_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::DeleteVolume(volume_id.to_owned()))?;
                let volume = state.volume_mut(volume_id)?;
                if volume.attached_server().is_some() {
                    return Err(BackendError::Api {
                        status: 409,
                        message: format!("volume {volume_id} is attached"),
                    });
                }
                state.volumes.retain(|candidate| candidate.id != volume_id);
                Ok(())
            })
        })
    }

    fn get_volume<'a>(&'a self, volume_id: &'a str) -> BackendFuture<'a, Volume> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::GetVolume(volume_id.to_owned()))?;
                let settled = state.poll(volume_id);
                let volume = state.volume_mut(volume_id)?;
                if let Some(next) = settled {
                    volume.status = next;
                }
                Ok(volume.clone())
            })
        })
    }

    fn get_volumes_by_name<'a>(&'a self, name: &'a str) -> BackendFuture<'a, Vec<Volume>> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::GetVolumesByName(name.to_owned()))?;
                Ok(Filters::by_name(name).apply(state.volumes.clone()))
            })
        })
    }

    fn list_volumes(&self) -> BackendFuture<'_, Vec<Volume>> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::ListVolumes)?;
                Ok(state.volumes.clone())
            })
        })
    }

    fn attach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::AttachVolume {
                    server_id: server_id.to_owned(),
                    volume_id: volume_id.to_owned(),
                })?;
                let volume = state.volume_mut(volume_id)?;
                if volume.attached_server().is_some() {
                    return Err(BackendError::Api {
                        status: 409,
                        message: format!("volume {volume_id} is already attached"),
                    });
                }
                volume.server_id = Some(server_id.to_owned());
                volume.status = Status::from(status::ATTACHED);
                Ok(())
            })
        })
    }

    fn detach_volume<'a>(
        &'a self,
        server_id: &'a str,
        volume_id: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::DetachVolume {
                    server_id: server_id.to_owned(),
                    volume_id: volume_id.to_owned(),
                })?;
                let volume = state.volume_mut(volume_id)?;
                volume.server_id = None;
                volume.status = Status::from(status::AVAILABLE);
                Ok(())
            })
        })
    }

    fn expand_volume<'a>(
        &'a self,
        volume_id: &'a str,
        new_size_gib: u64,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::ExpandVolume {
                    volume_id: volume_id.to_owned(),
                    size_gib: new_size_gib,
                })?;
                let volume = state.volume_mut(volume_id)?;
                if !volume.status.is_any(&[status::AVAILABLE, status::ATTACHED]) {
                    return Err(BackendError::Api {
                        status: 400,
                        message: format!(
                            "volume {volume_id} cannot be resized in state {}",
                            volume.status
                        ),
                    });
                }
                let previous = std::mem::replace(&mut volume.status, Status::from(status::RESIZING));
                volume.size = new_size_gib;
                state.schedule(volume_id, previous);
                Ok(())
            })
        })
    }

    fn create_snapshot<'a>(&'a self, request: &'a NewSnapshot) -> BackendFuture<'a, Snapshot> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::CreateSnapshot(request.clone()))?;
                let size = state.volume_mut(&request.volume_id)?.size;
                let snapshot = Snapshot {
                    id: state.next_id(ResourceKind::Snapshot),
                    name: request.name.clone(),
                    volume_id: request.volume_id.clone(),
                    size,
                    status: Status::from(status::CREATING),
                    created_at: Some(String::from("2024-01-01T00:00:00Z")),
                };
                let settles_to = state.settle_status(ResourceKind::Snapshot);
                state.schedule(&snapshot.id, settles_to);
                state.snapshots.push(snapshot.clone());
                Ok(snapshot)
            })
        })
    }

    fn get_snapshot_by_id<'a>(&'a self, snapshot_id: &'a str) -> BackendFuture<'a, Snapshot> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::GetSnapshotById(snapshot_id.to_owned()))?;
                let settled = state.poll(snapshot_id);
                let snapshot = state
                    .snapshots
                    .iter_mut()
                    .find(|snapshot| snapshot.id == snapshot_id)
                    .ok_or_else(|| BackendError::not_found(ResourceKind::Snapshot, snapshot_id))?;
                if let Some(next) = settled {
                    snapshot.status = next;
                }
                Ok(snapshot.clone())
            })
        })
    }

    fn list_snapshots<'a>(&'a self, filters: &'a Filters) -> BackendFuture<'a, Vec<Snapshot>> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::ListSnapshots(filters.clone()))?;
                Ok(filters.apply(state.snapshots.clone()))
            })
        })
    }

    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::DeleteSnapshot(snapshot_id.to_owned()))?;
                let before = state.snapshots.len();
                state.snapshots.retain(|snapshot| snapshot.id != snapshot_id);
                if state.snapshots.len() == before {
                    return Err(BackendError::not_found(ResourceKind::Snapshot, snapshot_id));
                }
                Ok(())
            })
        })
    }

    fn create_backup<'a>(&'a self, request: &'a NewBackup) -> BackendFuture<'a, Backup> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::CreateBackup(request.clone()))?;
                let size = state
                    .snapshots
                    .iter()
                    .find(|snapshot| snapshot.id == request.snapshot_id)
                    .map(|snapshot| snapshot.size)
                    .ok_or_else(|| {
                        BackendError::not_found(ResourceKind::Snapshot, &request.snapshot_id)
                    })?;
                let zone = state
                    .volumes
                    .iter()
                    .find(|volume| volume.id == request.volume_id)
                    .map(|volume| volume.availability_zone.clone())
                    .unwrap_or_default();
                let backup = Backup {
                    id: state.next_id(ResourceKind::Backup),
                    name: request.name.clone(),
                    volume_id: request.volume_id.clone(),
                    snapshot_id: request.snapshot_id.clone(),
                    size,
                    status: Status::from("creating"),
                    availability_zone: zone,
                    created_at: Some(String::from("2024-01-01T00:00:00Z")),
                };
                let settles_to = state.settle_status(ResourceKind::Backup);
                state.schedule(&backup.id, settles_to);
                state.backups.push(backup.clone());
                Ok(backup)
            })
        })
    }

    fn get_backup_by_id<'a>(&'a self, backup_id: &'a str) -> BackendFuture<'a, Backup> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::GetBackupById(backup_id.to_owned()))?;
                let settled = state.poll(backup_id);
                let backup = state
                    .backups
                    .iter_mut()
                    .find(|backup| backup.id == backup_id)
                    .ok_or_else(|| BackendError::not_found(ResourceKind::Backup, backup_id))?;
                if let Some(next) = settled {
                    backup.status = next;
                }
                Ok(backup.clone())
            })
        })
    }

    fn list_backups<'a>(&'a self, filters: &'a Filters) -> BackendFuture<'a, Vec<Backup>> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::ListBackups(filters.clone()))?;
                Ok(filters.apply(state.backups.clone()))
            })
        })
    }

    fn delete_backup<'a>(&'a self, backup_id: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::DeleteBackup(backup_id.to_owned()))?;
                let before = state.backups.len();
                state.backups.retain(|backup| backup.id != backup_id);
                if state.backups.len() == before {
                    return Err(BackendError::not_found(ResourceKind::Backup, backup_id));
                }
                Ok(())
            })
        })
    }

    fn get_instance_by_id<'a>(&'a self, server_id: &'a str) -> BackendFuture<'a, Server> {
        Box::pin(async move {
            self.with_state(|state| {
                state.record(Call::GetInstanceById(server_id.to_owned()))?;
                state
                    .servers
                    .iter()
                    .find(|server| server.id == server_id)
                    .cloned()
                    .ok_or_else(|| BackendError::not_found(ResourceKind::Server, server_id))
            })
        })
    }
}

/// Poll schedules shrunk to milliseconds for tests.
#[must_use]
pub fn fast_timing() -> Timing {
    let tick = Duration::from_millis(1);
    Timing {
        volume_create: Backoff::exponential(tick, 1.1, 10),
        attach: Backoff::exponential(tick, 1.2, 15),
        detach: Backoff::exponential(tick, 1.2, 13),
        expand: Backoff::exponential(tick, 1.2, 15),
        snapshot_ready: Backoff::exponential(tick, 1.2, 10),
        backup_poll_interval: tick,
        backup_base_timeout: Duration::from_millis(50),
        backup_seconds_per_gib: 0,
        cleanup_timeout: Duration::from_secs(1),
    }
}

/// Builds an available volume record.
#[must_use]
pub fn volume(id: &str, name: &str, size_gib: u64, zone: &str) -> Volume {
    Volume {
        id: id.to_owned(),
        name: name.to_owned(),
        size: size_gib,
        status: Status::from(status::AVAILABLE),
        availability_zone: zone.to_owned(),
        ..Volume::default()
    }
}

/// Builds an available snapshot record.
#[must_use]
pub fn snapshot(id: &str, name: &str, volume_id: &str, size_gib: u64) -> Snapshot {
    Snapshot {
        id: id.to_owned(),
        name: name.to_owned(),
        volume_id: volume_id.to_owned(),
        size: size_gib,
        status: Status::from(status::AVAILABLE),
        created_at: None,
    }
}

/// Builds an available backup record.
#[must_use]
pub fn backup(id: &str, name: &str, volume_id: &str, snapshot_id: &str, zone: &str) -> Backup {
    Backup {
        id: id.to_owned(),
        name: name.to_owned(),
        volume_id: volume_id.to_owned(),
        snapshot_id: snapshot_id.to_owned(),
        size: 1,
        status: Status::from("available"),
        availability_zone: zone.to_owned(),
        created_at: None,
    }
}

/// Builds a running server record.
#[must_use]
pub fn server(id: &str) -> Server {
    Server {
        id: id.to_owned(),
        name: id.to_owned(),
        status: Status::from("ACTIVE"),
        availability_zone: String::new(),
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
