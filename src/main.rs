//! Binary entry point for the `block-csi` operator CLI.
//!
//! Each subcommand runs one controller operation against the configured
//! IaaS project and prints the response as JSON on stdout.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::process;
use std::time::Duration;

use clap::Parser;
use serde_json::{Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use block_csi::capacity::gib_to_bytes;
use block_csi::controller::{
    AccessType, CapacityRange, ContentSource, ControllerExpandVolumeRequest,
    ControllerGetVolumeRequest, ControllerPublishVolumeRequest,
    ControllerUnpublishVolumeRequest, CreateSnapshotRequest, CreateVolumeRequest,
    DeleteSnapshotRequest, DeleteVolumeRequest, ListSnapshotsRequest, ListVolumesRequest,
    VolumeCapability, params,
};
use block_csi::logging::{self, LogFormat, LoggingError};
use block_csi::{
    BlockStorage, CloudConfig, ConfigError, Controller, ControllerError, IaasClient,
    RequestContext,
};

mod cli;

use cli::{Cli, Command, CreateSnapshotArgs, CreateVolumeArgs, LogFormatArg};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),
    #[error("{code:?}: {source}")]
    Controller {
        code: tonic::Code,
        source: ControllerError,
    },
    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

impl From<ControllerError> for CliError {
    fn from(source: ControllerError) -> Self {
        Self::Controller {
            code: source.code(),
            source,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let format = match cli.log_format {
        LogFormatArg::Text => LogFormat::Text,
        LogFormatArg::Json => LogFormat::Json,
    };
    logging::init(format, logging::DEFAULT_FILTER)?;

    let config = CloudConfig::load_without_cli_args()?;
    let client = IaasClient::from_config(&config)?;
    let controller =
        Controller::new(client, config.driver_name.clone()).with_cluster(config.cluster.clone());

    let token = CancellationToken::new();
    let ctx = RequestContext::new()
        .with_timeout(Duration::from_secs(cli.timeout_secs))
        .with_cancellation(token.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            token.cancel();
        }
    });

    let output = execute(&controller, &ctx, cli.command).await?;
    write_output(io::stdout(), &output)
}

async fn execute<S: BlockStorage>(
    controller: &Controller<S>,
    ctx: &RequestContext,
    command: Command,
) -> Result<Value, CliError> {
    let output = match command {
        Command::CreateVolume(args) => {
            let request = create_volume_request(args);
            serde_json::to_value(controller.create_volume(ctx, &request).await?)?
        }
        Command::DeleteVolume(args) => {
            let request = DeleteVolumeRequest {
                volume_id: args.volume_id,
            };
            controller.delete_volume(ctx, &request).await?;
            json!({ "deleted": request.volume_id })
        }
        Command::GetVolume(args) => {
            let request = ControllerGetVolumeRequest {
                volume_id: args.volume_id,
            };
            serde_json::to_value(controller.controller_get_volume(ctx, &request).await?)?
        }
        Command::ListVolumes => serde_json::to_value(
            controller
                .list_volumes(ctx, &ListVolumesRequest::default())
                .await?,
        )?,
        Command::Publish(args) => {
            let request = ControllerPublishVolumeRequest {
                volume_id: args.volume_id,
                node_id: args.node_id,
                volume_capability: Some(VolumeCapability::default()),
                readonly: false,
            };
            serde_json::to_value(
                controller
                    .controller_publish_volume(ctx, &request)
                    .await?,
            )?
        }
        Command::Unpublish(args) => {
            let request = ControllerUnpublishVolumeRequest {
                volume_id: args.volume_id,
                node_id: args.node_id,
            };
            controller
                .controller_unpublish_volume(ctx, &request)
                .await?;
            json!({ "detached": request.volume_id, "node": request.node_id })
        }
        Command::ExpandVolume(args) => {
            let request = ControllerExpandVolumeRequest {
                volume_id: args.volume_id,
                capacity_range: Some(CapacityRange {
                    required_bytes: gib_to_bytes(args.size_gib),
                    limit_bytes: 0,
                }),
            };
            serde_json::to_value(controller.controller_expand_volume(ctx, &request).await?)?
        }
        Command::CreateSnapshot(args) => {
            let request = create_snapshot_request(args);
            serde_json::to_value(controller.create_snapshot(ctx, &request).await?)?
        }
        Command::DeleteSnapshot(args) => {
            let request = DeleteSnapshotRequest {
                snapshot_id: args.snapshot_id,
            };
            controller.delete_snapshot(ctx, &request).await?;
            json!({ "deleted": request.snapshot_id })
        }
        Command::ListSnapshots(args) => {
            let request = ListSnapshotsRequest {
                snapshot_id: args.snapshot_id.unwrap_or_default(),
                source_volume_id: args.volume_id.unwrap_or_default(),
                ..ListSnapshotsRequest::default()
            };
            serde_json::to_value(controller.list_snapshots(ctx, &request).await?)?
        }
    };
    Ok(output)
}

fn create_volume_request(args: CreateVolumeArgs) -> CreateVolumeRequest {
    let mut parameters: BTreeMap<String, String> = args.params.into_iter().collect();
    if let Some(zone) = args.zone {
        parameters.insert(params::AVAILABILITY.to_owned(), zone);
    }
    let content_source = args
        .source_snapshot
        .map(|snapshot_id| ContentSource::Snapshot { snapshot_id })
        .or_else(|| {
            args.source_volume
                .map(|volume_id| ContentSource::Volume { volume_id })
        });
    let access_type = if args.block {
        AccessType::Block
    } else {
        AccessType::default()
    };
    CreateVolumeRequest {
        name: args.name,
        capacity_range: args.size_gib.map(|gib| CapacityRange {
            required_bytes: gib_to_bytes(gib),
            limit_bytes: 0,
        }),
        volume_capabilities: vec![VolumeCapability {
            access_type,
            ..VolumeCapability::default()
        }],
        parameters,
        content_source,
        accessibility_requirements: None,
    }
}

fn create_snapshot_request(args: CreateSnapshotArgs) -> CreateSnapshotRequest {
    let mut parameters: BTreeMap<String, String> = args.params.into_iter().collect();
    if args.backup {
        parameters.insert(params::TYPE.to_owned(), String::from("backup"));
    }
    CreateSnapshotRequest {
        name: args.name,
        source_volume_id: args.volume_id,
        parameters,
    }
}

fn write_output(mut target: impl Write, output: &Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(output)?;
    writeln!(target, "{rendered}").ok();
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
