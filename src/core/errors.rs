// src/core/errors.rs

//! Defines the primary error type for the entire wrapper.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, covering every failure the wrapper can surface.
/// Using `thiserror` allows for clean error definitions and automatic `From`
/// trait implementations.
#[derive(Error, Debug)]
pub enum WrapperError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Unsupported method '{0}'")]
    UnsupportedMethod(String),

    /// Failover installed a new, valid client. The interrupted call did not
    /// complete and must be reissued by the caller.
    #[error(
        "The active database connection has changed due to a connection failure. Please re-configure session state if required."
    )]
    FailoverSuccess,

    /// Failover could not install a new client. Terminal for the user call.
    #[error("Failover failed: {0}")]
    FailoverFailed(String),

    /// Failover succeeded but interrupted an open transaction. The caller must
    /// reconcile application state before continuing.
    #[error(
        "Transaction resolution unknown. Please re-configure session state if required and consider re-applying the transaction."
    )]
    TransactionResolutionUnknown,

    #[error("The operation exceeded its configured time budget")]
    InternalQueryTimeout,

    /// Short-circuit signal that a network-error equivalent should be assumed
    /// for the named host.
    #[error("Host '{0}' is not available")]
    UnavailableHost(String),

    /// A network-class failure reported by the underlying driver.
    #[error("Network error: {0}")]
    Network(String),

    /// An authentication failure reported by the underlying driver.
    #[error("Login failed: {0}")]
    Login(String),

    /// Any other error reported by the underlying driver.
    #[error("Database error: {0}")]
    Database(String),
}

impl WrapperError {
    /// True when this error should be treated as a loss of connectivity to the
    /// current host. Failover triggers on these.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            WrapperError::Io(_) | WrapperError::Network(_) | WrapperError::UnavailableHost(_)
        )
    }

    /// True when this error is an authentication failure. Blue/Green IAM
    /// candidate iteration falls through on these.
    pub fn is_login_error(&self) -> bool {
        matches!(self, WrapperError::Login(_))
    }

    /// True for the advisory failover outcomes: the connection is usable
    /// immediately and the caller only needs to retry the business call.
    pub fn is_failover_outcome(&self) -> bool {
        matches!(
            self,
            WrapperError::FailoverSuccess | WrapperError::TransactionResolutionUnknown
        )
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for WrapperError {
    fn clone(&self) -> Self {
        match self {
            WrapperError::Io(e) => WrapperError::Io(Arc::clone(e)),
            WrapperError::Internal(s) => WrapperError::Internal(s.clone()),
            WrapperError::IllegalArgument(s) => WrapperError::IllegalArgument(s.clone()),
            WrapperError::UnsupportedMethod(s) => WrapperError::UnsupportedMethod(s.clone()),
            WrapperError::FailoverSuccess => WrapperError::FailoverSuccess,
            WrapperError::FailoverFailed(s) => WrapperError::FailoverFailed(s.clone()),
            WrapperError::TransactionResolutionUnknown => {
                WrapperError::TransactionResolutionUnknown
            }
            WrapperError::InternalQueryTimeout => WrapperError::InternalQueryTimeout,
            WrapperError::UnavailableHost(s) => WrapperError::UnavailableHost(s.clone()),
            WrapperError::Network(s) => WrapperError::Network(s.clone()),
            WrapperError::Login(s) => WrapperError::Login(s.clone()),
            WrapperError::Database(s) => WrapperError::Database(s.clone()),
        }
    }
}

impl PartialEq for WrapperError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (WrapperError::Io(e1), WrapperError::Io(e2)) => e1.to_string() == e2.to_string(),
            (WrapperError::Internal(s1), WrapperError::Internal(s2)) => s1 == s2,
            (WrapperError::IllegalArgument(s1), WrapperError::IllegalArgument(s2)) => s1 == s2,
            (WrapperError::UnsupportedMethod(s1), WrapperError::UnsupportedMethod(s2)) => s1 == s2,
            (WrapperError::FailoverFailed(s1), WrapperError::FailoverFailed(s2)) => s1 == s2,
            (WrapperError::UnavailableHost(s1), WrapperError::UnavailableHost(s2)) => s1 == s2,
            (WrapperError::Network(s1), WrapperError::Network(s2)) => s1 == s2,
            (WrapperError::Login(s1), WrapperError::Login(s2)) => s1 == s2,
            (WrapperError::Database(s1), WrapperError::Database(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl From<std::io::Error> for WrapperError {
    fn from(e: std::io::Error) -> Self {
        WrapperError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for WrapperError {
    fn from(e: serde_json::Error) -> Self {
        WrapperError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}
