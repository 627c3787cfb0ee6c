//! CreateVolume, DeleteVolume, ControllerGetVolume and ListVolumes.

use tracing::{debug, info, instrument};

use super::lease::LeaseKind;
use super::{
    Controller, ControllerError, ControllerGetVolumeRequest, CreateVolumeRequest,
    CreateVolumeResponse, CsiVolume, DeleteVolumeRequest, ListVolumesRequest, ListVolumesResponse,
    VolumeEntry, final_state, params,
};
use super::request::CapacityRange;
use crate::backend::{BlockStorage, NewVolume};
use crate::capacity::{DEFAULT_VOLUME_SIZE_BYTES, GIB, bytes_to_gib, gib_to_bytes};
use crate::context::RequestContext;
use crate::resources::{Volume, status};
use crate::wait::{StatusTarget, WaitError, wait_for_status};

const VOLUME_READY: StatusTarget<'static> =
    StatusTarget::new(&[status::AVAILABLE], &[status::ERROR, status::ERROR_RESTORING]);

impl<S: BlockStorage> Controller<S> {
    /// Creates a volume, or returns the existing volume with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for a missing name or
    /// capability, [`ControllerError::AlreadyExists`] when a same-named
    /// volume has another size, [`ControllerError::Aborted`] while another
    /// request holds the name, content-source errors from the resolver, and
    /// [`ControllerError::Internal`] for backend failures and timeouts.
    #[instrument(skip_all, fields(request_id = %ctx.id(), name = %request.name))]
    pub async fn create_volume(
        &self,
        ctx: &RequestContext,
        request: &CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse, ControllerError> {
        if request.name.is_empty() {
            return Err(ControllerError::invalid("missing Volume Name"));
        }
        if request.volume_capabilities.is_empty() {
            return Err(ControllerError::invalid("missing Volume capability"));
        }
        let size_gib = requested_size_gib(request.capacity_range.as_ref())?;

        let _lease = self
            .leases
            .acquire(LeaseKind::Volume, &request.name)
            .ok_or_else(|| {
                ControllerError::Aborted(format!(
                    "an operation on volume {} is already in progress",
                    request.name
                ))
            })?;

        let existing = ctx
            .run(self.storage.get_volumes_by_name(&request.name))
            .await?
            .map_err(|err| {
                ControllerError::backend(format!("failed to look up volume {}", request.name), &err)
            })?;
        match existing.as_slice() {
            [] => {}
            [volume] => return self.reuse_volume(volume, size_gib, request),
            _ => {
                return Err(ControllerError::internal(format!(
                    "Multiple volumes reported by backend with same name {}",
                    request.name
                )));
            }
        }

        let target_zone = self.target_zone(request);
        let source = match &request.content_source {
            Some(content) => Some(
                self.resolve_source(ctx, content, target_zone.as_deref())
                    .await?,
            ),
            None => None,
        };
        let zone = target_zone.or_else(|| source.as_ref().and_then(|resolved| resolved.zone.clone()));

        let new_volume = NewVolume {
            name: request.name.clone(),
            size: size_gib,
            availability_zone: zone,
            source: source.map(|resolved| resolved.source),
            performance_class: params::non_empty(&request.parameters, params::VOLUME_TYPE)
                .map(str::to_owned),
            labels: self.labels(&request.parameters),
        };
        let created = ctx
            .run(self.storage.create_volume(&new_volume))
            .await?
            .map_err(|err| ControllerError::internal(format!("CreateVolume failed with error {err}")))?;
        info!(volume_id = %created.id, size_gib, "volume created");

        let ready = self.wait_volume_available(ctx, &created.id).await?;
        Ok(CreateVolumeResponse {
            volume: self.csi_volume(&ready, request),
        })
    }

    fn reuse_volume(
        &self,
        volume: &Volume,
        size_gib: u64,
        request: &CreateVolumeRequest,
    ) -> Result<CreateVolumeResponse, ControllerError> {
        if volume.size != size_gib {
            return Err(ControllerError::AlreadyExists(format!(
                "volume {} already exists with size {} GiB, requested {size_gib} GiB",
                request.name, volume.size
            )));
        }
        if !volume.status.is(status::AVAILABLE) {
            return Err(ControllerError::internal(format!(
                "volume {} is not in available state: {}",
                volume.id, volume.status
            )));
        }
        debug!(volume_id = %volume.id, "reusing existing volume");
        Ok(CreateVolumeResponse {
            volume: self.csi_volume(volume, request),
        })
    }

    /// Zone from the `availability` parameter, else from the first topology
    /// carrying the zone key, preferred topologies first.
    fn target_zone(&self, request: &CreateVolumeRequest) -> Option<String> {
        if let Some(zone) = params::non_empty(&request.parameters, params::AVAILABILITY) {
            return Some(zone.to_owned());
        }
        let requirement = request.accessibility_requirements.as_ref()?;
        requirement
            .preferred
            .iter()
            .chain(&requirement.requisite)
            .find_map(|topology| topology.segments.get(&self.topology_key))
            .filter(|zone| !zone.is_empty())
            .cloned()
    }

    async fn wait_volume_available(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
    ) -> Result<Volume, ControllerError> {
        let resource = format!("volume {volume_id}");
        let outcome = wait_for_status(
            ctx,
            &self.timing.volume_create,
            &resource,
            VOLUME_READY,
            || self.storage.get_volume(volume_id),
        )
        .await;
        match outcome {
            Ok(volume) => Ok(volume),
            Err(WaitError::Timeout { last_state, .. }) => {
                let state = final_state(ctx, self.storage.get_volume(volume_id), last_state).await;
                Err(ControllerError::internal(format!(
                    "volume {volume_id} failed getting available in time: last state {state}"
                )))
            }
            Err(err) => Err(ControllerError::wait(
                format!("volume {volume_id} did not become available"),
                err,
            )),
        }
    }

    fn csi_volume(&self, volume: &Volume, request: &CreateVolumeRequest) -> CsiVolume {
        CsiVolume {
            volume_id: volume.id.clone(),
            capacity_bytes: gib_to_bytes(volume.size),
            content_source: request.content_source.clone(),
            accessible_topology: self.topology_for(&volume.availability_zone),
        }
    }

    /// Deletes a volume. Deleting an absent volume succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::FailedPrecondition`] while the volume is
    /// attached and [`ControllerError::Internal`] for backend failures.
    #[instrument(skip_all, fields(request_id = %ctx.id(), volume_id = %request.volume_id))]
    pub async fn delete_volume(
        &self,
        ctx: &RequestContext,
        request: &DeleteVolumeRequest,
    ) -> Result<(), ControllerError> {
        let volume_id = request.volume_id.as_str();
        if volume_id.is_empty() {
            return Err(ControllerError::invalid("missing Volume ID"));
        }
        let volume = match ctx.run(self.storage.get_volume(volume_id)).await? {
            Ok(volume) => volume,
            Err(err) if err.is_not_found() => {
                debug!("volume already deleted");
                return Ok(());
            }
            Err(err) => {
                return Err(ControllerError::backend(
                    format!("failed to look up volume {volume_id}"),
                    &err,
                ));
            }
        };
        if let Some(server_id) = volume.attached_server() {
            return Err(ControllerError::FailedPrecondition(format!(
                "volume {volume_id} is still attached to server {server_id}"
            )));
        }
        if volume.status.is(status::ATTACHED) {
            return Err(ControllerError::FailedPrecondition(format!(
                "volume {volume_id} is still attached"
            )));
        }
        match ctx.run(self.storage.delete_volume(volume_id)).await? {
            Ok(()) => {
                info!("volume deleted");
                Ok(())
            }
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(ControllerError::internal(format!(
                "DeleteVolume failed with error {err}"
            ))),
        }
    }

    /// Describes one volume and the server it is attached to.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::NotFound`] for an unknown volume.
    #[instrument(skip_all, fields(request_id = %ctx.id(), volume_id = %request.volume_id))]
    pub async fn controller_get_volume(
        &self,
        ctx: &RequestContext,
        request: &ControllerGetVolumeRequest,
    ) -> Result<VolumeEntry, ControllerError> {
        let volume_id = request.volume_id.as_str();
        if volume_id.is_empty() {
            return Err(ControllerError::invalid("missing Volume ID"));
        }
        match ctx.run(self.storage.get_volume(volume_id)).await? {
            Ok(volume) => Ok(self.volume_entry(&volume)),
            Err(err) if err.is_not_found() => Err(ControllerError::NotFound(format!(
                "volume {volume_id} not found"
            ))),
            Err(err) => Err(ControllerError::backend(
                format!("failed to look up volume {volume_id}"),
                &err,
            )),
        }
    }

    /// Lists every volume. Pagination fields are ignored and the full set is
    /// returned on each call.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Internal`] when the backend list fails.
    #[instrument(skip_all, fields(request_id = %ctx.id()))]
    pub async fn list_volumes(
        &self,
        ctx: &RequestContext,
        request: &ListVolumesRequest,
    ) -> Result<ListVolumesResponse, ControllerError> {
        if request.max_entries > 0 || !request.starting_token.is_empty() {
            debug!("pagination is not supported, returning all volumes");
        }
        let volumes = ctx
            .run(self.storage.list_volumes())
            .await?
            .map_err(|err| ControllerError::backend("failed to list volumes", &err))?;
        Ok(ListVolumesResponse {
            entries: volumes.iter().map(|volume| self.volume_entry(volume)).collect(),
            next_token: String::new(),
        })
    }

    fn volume_entry(&self, volume: &Volume) -> VolumeEntry {
        VolumeEntry {
            volume: CsiVolume {
                volume_id: volume.id.clone(),
                capacity_bytes: gib_to_bytes(volume.size),
                content_source: None,
                accessible_topology: self.topology_for(&volume.availability_zone),
            },
            published_node_ids: volume
                .attached_server()
                .map(|server| vec![server.to_owned()])
                .unwrap_or_default(),
        }
    }
}

/// Size to provision in GiB. A missing range or zero request means 1 GiB.
///
/// The backend allocates whole GiB, so a limit below 1 GiB cannot be met
/// even when no minimum is requested.
fn requested_size_gib(requested: Option<&CapacityRange>) -> Result<u64, ControllerError> {
    let range = requested.copied().unwrap_or_default();
    if range.required_bytes == 0 && range.limit_bytes > 0 && range.limit_bytes < GIB {
        return Err(ControllerError::OutOfRange(format!(
            "limit of {} bytes is below the 1 GiB allocation unit",
            range.limit_bytes
        )));
    }
    let required = if range.required_bytes == 0 {
        DEFAULT_VOLUME_SIZE_BYTES
    } else {
        range.required_bytes
    };
    let size_gib = bytes_to_gib(required);
    if range.limit_bytes > 0 && gib_to_bytes(size_gib) > range.limit_bytes {
        return Err(ControllerError::OutOfRange(format!(
            "requested {required} bytes rounds up to {size_gib} GiB, above the limit of {} bytes",
            range.limit_bytes
        )));
    }
    Ok(size_gib)
}
