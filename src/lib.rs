//! Core library for the `block-csi` storage driver.
//!
//! The crate implements the controller side of a CSI driver on top of an
//! asynchronous IaaS block-storage API: volumes are created, attached,
//! resized and deleted, and snapshots or backups are taken, all through
//! idempotent operations that poll the backend until it converges.
//!
//! [`controller::Controller`] holds the orchestration and is generic over
//! [`backend::BlockStorage`]; [`iaas::IaasClient`] is the HTTP
//! implementation and [`test_support::FakeBlockStorage`] an in-memory one.

pub mod backend;
pub mod capacity;
pub mod config;
pub mod context;
pub mod controller;
pub mod credentials;
pub mod filter;
pub mod iaas;
pub mod logging;
pub mod resources;
pub mod test_support;
pub mod wait;

pub use backend::{BackendError, BlockStorage, NewBackup, NewSnapshot, NewVolume};
pub use config::{CloudConfig, ConfigError};
pub use context::{Interruption, RequestContext};
pub use controller::{Controller, ControllerError, Timing};
pub use iaas::IaasClient;
