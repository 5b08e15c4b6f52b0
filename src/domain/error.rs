//! Error taxonomy for the step companion
//!
//! No error here is fatal to the process: every failure path resets the
//! affected state to a safe substate (unknown step / not connected) and
//! surfaces the error through the view channel.

use thiserror::Error;

/// Failures establishing a session with the step engine endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    #[error("broker rejected the configured credentials")]
    InvalidCredentials,
    #[error("no network route to the car")]
    NoNetwork,
    #[error("step engine endpoint unavailable")]
    ServerError,
    #[error("internal connection failure")]
    InternalError,
}

/// Failures of the short-range identification flow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentificationError {
    /// No reader is configured or the hardware is missing.
    #[error("short-range identification is not available")]
    Unavailable,
    #[error("short-range identification failed: {0}")]
    Failed(String),
}

/// Umbrella error for companion operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompanionError {
    /// Location permission denied; monitoring halted until re-granted.
    #[error("location permission denied")]
    PermissionDenied,
    /// Beacon transport failure; distance observation reset to unknown.
    #[error("beacon ranging failed: {0}")]
    RangingFailure(String),
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    #[error(transparent)]
    Identification(#[from] IdentificationError),
}

impl CompanionError {
    /// True when the condition clears on its own or with a user prompt,
    /// without restarting the session.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CompanionError::PermissionDenied | CompanionError::RangingFailure(_) => true,
            CompanionError::Authentication(e) => {
                matches!(e, AuthenticationError::NoNetwork | AuthenticationError::ServerError)
            }
            CompanionError::Identification(_) => true,
        }
    }
}
