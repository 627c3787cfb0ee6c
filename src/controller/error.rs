//! Controller error taxonomy and its mapping onto gRPC status codes.

use std::fmt::Display;

use thiserror::Error;
use tonic::{Code, Status};

use crate::backend::BackendError;
use crate::context::Interruption;
use crate::wait::WaitError;

/// Errors returned by controller operations.
///
/// Each variant corresponds to one CSI status code; see
/// [`ControllerError::code`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ControllerError {
    /// A required request field is missing or malformed.
    #[error("{0}")]
    InvalidArgument(String),
    /// A same-named resource exists but is incompatible with the request.
    #[error("{0}")]
    AlreadyExists(String),
    /// A referenced resource does not exist.
    #[error("{0}")]
    NotFound(String),
    /// A referenced resource exists but is not usable yet; callers retry.
    #[error("{0}")]
    Unavailable(String),
    /// A referenced resource violates a placement constraint.
    #[error("{0}")]
    ResourceExhausted(String),
    /// The resource is in a state that forbids the operation.
    #[error("{0}")]
    FailedPrecondition(String),
    /// A requested size lies outside the allowed capacity range.
    #[error("{0}")]
    OutOfRange(String),
    /// Another in-flight request holds the same resource name.
    #[error("{0}")]
    Aborted(String),
    /// Backend failures, fatal backend states and wait timeouts.
    #[error("{0}")]
    Internal(String),
    /// The request was cancelled or its deadline passed.
    #[error(transparent)]
    Interrupted(#[from] Interruption),
}

impl ControllerError {
    /// Returns the gRPC status code for this error.
    #[must_use]
    pub const fn code(&self) -> Code {
        match self {
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::AlreadyExists(_) => Code::AlreadyExists,
            Self::NotFound(_) => Code::NotFound,
            Self::Unavailable(_) => Code::Unavailable,
            Self::ResourceExhausted(_) => Code::ResourceExhausted,
            Self::FailedPrecondition(_) => Code::FailedPrecondition,
            Self::OutOfRange(_) => Code::OutOfRange,
            Self::Aborted(_) => Code::Aborted,
            Self::Internal(_) => Code::Internal,
            Self::Interrupted(Interruption::Cancelled) => Code::Cancelled,
            Self::Interrupted(Interruption::DeadlineExceeded) => Code::DeadlineExceeded,
        }
    }

    /// Builds [`ControllerError::InvalidArgument`].
    pub fn invalid(message: impl Display) -> Self {
        Self::InvalidArgument(message.to_string())
    }

    /// Builds [`ControllerError::Internal`].
    pub fn internal(message: impl Display) -> Self {
        Self::Internal(message.to_string())
    }

    /// Wraps a backend failure as [`ControllerError::Internal`] with context.
    pub(crate) fn backend(context: impl Display, err: &BackendError) -> Self {
        Self::Internal(format!("{context}: {err}"))
    }

    /// Converts a failed wait. Interruptions keep their own code; every other
    /// outcome is internal.
    pub(crate) fn wait(context: impl Display, err: WaitError<BackendError>) -> Self {
        match err {
            WaitError::Interrupted(interruption) => Self::Interrupted(interruption),
            other => Self::Internal(format!("{context}: {other}")),
        }
    }
}

impl From<ControllerError> for Status {
    fn from(err: ControllerError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}
