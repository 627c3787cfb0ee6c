//! Shared fixtures for provisioning BDD scenarios.

use std::cell::RefCell;
use std::future::Future;

use block_csi::controller::DEFAULT_DRIVER_NAME;
use block_csi::test_support::{FakeBlockStorage, fast_timing};
use block_csi::{Controller, ControllerError, RequestContext};
use rstest::fixture;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};

/// Controller, fake backend and the outcome of the last `When` step.
pub struct ProvisioningWorld {
    pub storage: FakeBlockStorage,
    pub controller: Controller<FakeBlockStorage>,
    runtime: Runtime,
    outcome: RefCell<Option<Result<(), ControllerError>>>,
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

impl ProvisioningWorld {
    fn new() -> Self {
        let storage = FakeBlockStorage::new();
        let controller =
            Controller::new(storage.clone(), DEFAULT_DRIVER_NAME).with_timing(fast_timing());
        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap_or_else(|err| panic!("test runtime should build: {err}"));
        Self {
            storage,
            controller,
            runtime,
            outcome: RefCell::new(None),
        }
    }

    /// Runs a controller call to completion and records whether it failed.
    pub fn record<T, F>(&self, operation: impl FnOnce(RequestContext) -> F)
    where
        F: Future<Output = Result<T, ControllerError>>,
    {
        let result = self.runtime.block_on(operation(RequestContext::new()));
        self.outcome.replace(Some(result.map(drop)));
    }

    /// Outcome of the last recorded call.
    pub fn outcome(&self) -> Result<Result<(), ControllerError>, StepError> {
        self.outcome
            .borrow()
            .clone()
            .ok_or_else(|| StepError::Assertion(String::from("no operation was run")))
    }
}

#[fixture]
pub fn world() -> ProvisioningWorld {
    ProvisioningWorld::new()
}
