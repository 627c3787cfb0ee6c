//! ControllerExpandVolume.

use tracing::{debug, info, instrument};

use super::{
    CapacityRange, Controller, ControllerError, ControllerExpandVolumeRequest,
    ControllerExpandVolumeResponse,
};
use crate::backend::BlockStorage;
use crate::capacity::{bytes_to_gib, gib_to_bytes};
use crate::context::RequestContext;
use crate::resources::{Volume, status};
use crate::wait::{Verdict, wait_until};

const RESIZABLE: &[&str] = &[status::AVAILABLE, status::ATTACHED];
const RESIZE_FAILED: &[&str] = &[status::ERROR, status::ERROR_RESIZING];

impl<S: BlockStorage> Controller<S> {
    /// Grows a volume to at least the requested size.
    ///
    /// Volumes already at or above the size are left untouched. The response
    /// always asks the node to grow the filesystem.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for missing fields,
    /// [`ControllerError::OutOfRange`] when the rounded size exceeds the
    /// limit, [`ControllerError::NotFound`] for an unknown volume, and
    /// [`ControllerError::Internal`] when the volume cannot be resized in its
    /// current state or the resize fails.
    #[instrument(skip_all, fields(request_id = %ctx.id(), volume_id = %request.volume_id))]
    pub async fn controller_expand_volume(
        &self,
        ctx: &RequestContext,
        request: &ControllerExpandVolumeRequest,
    ) -> Result<ControllerExpandVolumeResponse, ControllerError> {
        let volume_id = request.volume_id.as_str();
        if volume_id.is_empty() {
            return Err(ControllerError::invalid("missing Volume ID"));
        }
        let range = request
            .capacity_range
            .ok_or_else(|| ControllerError::invalid("missing Capacity range"))?;
        let size_gib = expansion_size_gib(range)?;

        let volume = match ctx.run(self.storage.get_volume(volume_id)).await? {
            Ok(volume) => volume,
            Err(err) if err.is_not_found() => {
                return Err(ControllerError::NotFound(format!(
                    "volume {volume_id} not found"
                )));
            }
            Err(err) => {
                return Err(ControllerError::backend(
                    format!("failed to look up volume {volume_id}"),
                    &err,
                ));
            }
        };
        if volume.size >= size_gib {
            debug!(current_gib = volume.size, "volume already has the requested size");
            return Ok(expanded(volume.size));
        }
        if !volume.status.is_any(RESIZABLE) {
            return Err(ControllerError::internal(format!(
                "volume {volume_id} cannot be resized in state {}",
                volume.status
            )));
        }

        ctx.run(self.storage.expand_volume(volume_id, size_gib))
            .await?
            .map_err(|err| {
                ControllerError::backend(format!("failed to resize volume {volume_id}"), &err)
            })?;
        let resized = wait_until(
            ctx,
            &self.timing.expand,
            &format!("volume {volume_id}"),
            || self.storage.get_volume(volume_id),
            |current: &Volume| resize_verdict(current, size_gib),
        )
        .await
        .map_err(|err| ControllerError::wait(format!("volume {volume_id} resize did not finish"), err))?;
        info!(size_gib = resized.size, "volume resized");
        Ok(expanded(resized.size))
    }
}

fn expansion_size_gib(range: CapacityRange) -> Result<u64, ControllerError> {
    let size_gib = bytes_to_gib(range.required_bytes);
    if range.limit_bytes > 0 && gib_to_bytes(size_gib) > range.limit_bytes {
        return Err(ControllerError::OutOfRange(format!(
            "requested {} bytes rounds up to {size_gib} GiB, above the limit of {} bytes",
            range.required_bytes, range.limit_bytes
        )));
    }
    Ok(size_gib)
}

const fn expanded(size_gib: u64) -> ControllerExpandVolumeResponse {
    ControllerExpandVolumeResponse {
        capacity_bytes: gib_to_bytes(size_gib),
        node_expansion_required: true,
    }
}

fn resize_verdict(volume: &Volume, size_gib: u64) -> Verdict {
    if volume.status.is_any(RESIZE_FAILED) {
        Verdict::Fatal
    } else if volume.status.is_any(RESIZABLE) && volume.size >= size_gib {
        Verdict::Ready
    } else {
        Verdict::Pending
    }
}
