//! ControllerPublishVolume and ControllerUnpublishVolume.
//!
//! Both check the volume's current attachment before mutating it, so a
//! retried request never issues a second attach or detach.

use tracing::{debug, info, instrument};

use super::{
    Controller, ControllerError, ControllerPublishVolumeRequest, ControllerPublishVolumeResponse,
    ControllerUnpublishVolumeRequest,
};
use crate::backend::BlockStorage;
use crate::context::RequestContext;
use crate::resources::{Volume, status};
use crate::wait::{Verdict, wait_until};

impl<S: BlockStorage> Controller<S> {
    /// Attaches a volume to a server.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for missing fields,
    /// [`ControllerError::NotFound`] when the server or volume does not
    /// exist, and [`ControllerError::Internal`] for backend failures.
    #[instrument(
        skip_all,
        fields(request_id = %ctx.id(), volume_id = %request.volume_id, node_id = %request.node_id)
    )]
    pub async fn controller_publish_volume(
        &self,
        ctx: &RequestContext,
        request: &ControllerPublishVolumeRequest,
    ) -> Result<ControllerPublishVolumeResponse, ControllerError> {
        if request.volume_id.is_empty() {
            return Err(ControllerError::invalid("missing Volume ID"));
        }
        if request.node_id.is_empty() {
            return Err(ControllerError::invalid("missing Node ID"));
        }
        if request.volume_capability.is_none() {
            return Err(ControllerError::invalid("missing Volume capability"));
        }
        if !self.instance_exists(ctx, &request.node_id).await? {
            return Err(ControllerError::NotFound(format!(
                "instance {} not found",
                request.node_id
            )));
        }
        self.attach(ctx, &request.volume_id, &request.node_id).await?;
        Ok(ControllerPublishVolumeResponse::default())
    }

    /// Detaches a volume from a server. Missing servers and volumes count as
    /// already detached.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidArgument`] for missing fields and
    /// [`ControllerError::Internal`] for backend failures or a volume in a
    /// state that cannot be detached.
    #[instrument(
        skip_all,
        fields(request_id = %ctx.id(), volume_id = %request.volume_id, node_id = %request.node_id)
    )]
    pub async fn controller_unpublish_volume(
        &self,
        ctx: &RequestContext,
        request: &ControllerUnpublishVolumeRequest,
    ) -> Result<(), ControllerError> {
        if request.volume_id.is_empty() {
            return Err(ControllerError::invalid("missing Volume ID"));
        }
        if request.node_id.is_empty() {
            return Err(ControllerError::invalid("missing Node ID"));
        }
        if !self.instance_exists(ctx, &request.node_id).await? {
            debug!("instance no longer exists, nothing to detach");
            return Ok(());
        }
        self.detach(ctx, &request.volume_id, &request.node_id).await
    }

    async fn instance_exists(
        &self,
        ctx: &RequestContext,
        server_id: &str,
    ) -> Result<bool, ControllerError> {
        match ctx.run(self.storage.get_instance_by_id(server_id)).await? {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(ControllerError::backend(
                format!("failed to look up instance {server_id}"),
                &err,
            )),
        }
    }

    async fn attach(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
        server_id: &str,
    ) -> Result<(), ControllerError> {
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
        if volume.attached_server() == Some(server_id) {
            debug!("volume already attached");
            return Ok(());
        }

        ctx.run(self.storage.attach_volume(server_id, volume_id))
            .await?
            .map_err(|err| {
                ControllerError::backend(
                    format!("failed to attach volume {volume_id} to server {server_id}"),
                    &err,
                )
            })?;
        wait_until(
            ctx,
            &self.timing.attach,
            &format!("volume {volume_id}"),
            || self.storage.get_volume(volume_id),
            |current: &Volume| attachment_verdict(current, Some(server_id)),
        )
        .await
        .map_err(|err| {
            ControllerError::wait(
                format!("volume {volume_id} did not attach to server {server_id}"),
                err,
            )
        })?;
        info!("volume attached");
        Ok(())
    }

    async fn detach(
        &self,
        ctx: &RequestContext,
        volume_id: &str,
        server_id: &str,
    ) -> Result<(), ControllerError> {
        let volume = match ctx.run(self.storage.get_volume(volume_id)).await? {
            Ok(volume) => volume,
            Err(err) if err.is_not_found() => {
                debug!("volume no longer exists, nothing to detach");
                return Ok(());
            }
            Err(err) => {
                return Err(ControllerError::backend(
                    format!("failed to look up volume {volume_id}"),
                    &err,
                ));
            }
        };
        if volume.status.is(status::AVAILABLE) {
            debug!("volume already detached");
            return Ok(());
        }
        if !volume.status.is(status::ATTACHED) {
            return Err(ControllerError::internal(format!(
                "cannot detach volume {volume_id} in state {}",
                volume.status
            )));
        }
        if volume
            .attached_server()
            .is_some_and(|current| current != server_id)
        {
            debug!("volume is attached to another server, nothing to detach");
            return Ok(());
        }

        ctx.run(self.storage.detach_volume(server_id, volume_id))
            .await?
            .map_err(|err| {
                ControllerError::backend(
                    format!("failed to detach volume {volume_id} from server {server_id}"),
                    &err,
                )
            })?;
        wait_until(
            ctx,
            &self.timing.detach,
            &format!("volume {volume_id}"),
            || self.storage.get_volume(volume_id),
            |current: &Volume| attachment_verdict(current, None),
        )
        .await
        .map_err(|err| {
            ControllerError::wait(
                format!("volume {volume_id} did not detach from server {server_id}"),
                err,
            )
        })?;
        info!("volume detached");
        Ok(())
    }
}

/// Done once the volume's server reference equals `expected`.
fn attachment_verdict(volume: &Volume, expected: Option<&str>) -> Verdict {
    if volume.status.is(status::ERROR) {
        Verdict::Fatal
    } else if volume.attached_server() == expected {
        Verdict::Ready
    } else {
        Verdict::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn volume(state: &str, server: Option<&str>) -> Volume {
        Volume {
            id: String::from("vol-1"),
            status: state.into(),
            server_id: server.map(str::to_owned),
            ..Volume::default()
        }
    }

    #[rstest]
    #[case(volume("ATTACHED", Some("srv-1")), Some("srv-1"), Verdict::Ready)]
    #[case(volume("AVAILABLE", None), Some("srv-1"), Verdict::Pending)]
    #[case(volume("AVAILABLE", None), None, Verdict::Ready)]
    #[case(volume("ATTACHED", Some("srv-1")), None, Verdict::Pending)]
    #[case(volume("ERROR", None), None, Verdict::Fatal)]
    fn attachment_progress(
        #[case] current: Volume,
        #[case] expected: Option<&str>,
        #[case] verdict: Verdict,
    ) {
        assert_eq!(attachment_verdict(&current, expected), verdict);
    }
}
