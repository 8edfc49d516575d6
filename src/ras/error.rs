//! Failures reported by the ranging engine and profile

use thiserror::Error;

use super::session::RasSession;

/// All failures are local and recoverable
#[derive(Debug, Error)]
pub enum RasError {
    /// The session handle does not refer to a live session
    #[error("{0:?} does not refer to a live session")]
    InvalidSession(RasSession),
    /// A transport is already attached to the session
    #[error("{0:?} already has a transport attached")]
    AlreadyAttached(RasSession),
    /// The device was already probed
    #[error("device already probed")]
    AlreadyProbed,
    /// The service layout could not be registered against a database
    #[error("failed to register the ranging service: {0}")]
    RegistrationFailed(anyhow::Error),
    /// The transport rejected a notification registration
    #[error("notification registration rejected")]
    SubscriptionFailed,
    /// The operation needs an attached transport
    #[error("{0:?} has no transport attached")]
    NotAttached(RasSession),
    /// The transport could not be cloned
    #[error("transport unavailable")]
    TransportUnavailable,
    /// The transport refused to queue a request
    #[error("request could not be queued")]
    RequestFailed,
    /// No such device or registration
    #[error("not found")]
    NotFound,
    /// The profile is disabled by configuration
    #[error("ranging profile is not enabled")]
    NotSupported,
}
