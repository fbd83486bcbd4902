//! Pipeline error type.

use crate::app::FlowError;
use crate::domain::UnknownAction;
use crate::providers::directory::DirectoryError;
use crate::providers::mail::ProviderError;

/// Result type alias for pipeline stages.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors surfaced by discovery, classification, provisioning and removal.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The mail session is not signed in or lacks a required scope. The
    /// caller must re-authorize; the stage is not retried.
    #[error("mail access not authorized: {0}")]
    Unauthorized(String),

    /// A mail service call failed.
    #[error("mail service error: {0}")]
    Mail(ProviderError),

    /// A directory service call failed.
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Filters from an earlier run are still in place.
    #[error("account already provisioned with label {0:?}")]
    AlreadyProvisioned(String),

    /// No provisioning label exists, so there is nothing to manage or remove.
    #[error("account has no provisioning label")]
    NotProvisioned,

    /// A provisioning label carries no recognisable action keyword.
    #[error("provisioning label has no valid action: {0}")]
    InvalidLabel(#[from] UnknownAction),

    /// No blocked group has this organization name.
    #[error("no blocked group named {0:?}")]
    UnknownGroup(String),

    /// The session was closed while the stage was running.
    #[error("session closed")]
    SessionClosed,

    /// The setup flow was driven out of order.
    #[error(transparent)]
    Flow(#[from] FlowError),
}

impl From<ProviderError> for PipelineError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Authentication(reason) => Self::Unauthorized(reason),
            other => Self::Mail(other),
        }
    }
}
