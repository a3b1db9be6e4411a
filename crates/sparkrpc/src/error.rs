//! # Reply Failures
//!
//! Errors that travel *back to a caller* through a reply context, as opposed to
//! errors returned directly from dispatcher calls.

use std::fmt;

/// The failure side of a reply.
///
/// Cheap to clone so it can be sent over channels and encoded into frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The target endpoint is not registered, has stopped, or the dispatcher is shutting down.
    EndpointUnavailable(String),
    /// The handler failed or panicked while processing the message.
    Handler(String),
    /// The handler finished without producing a reply for a message that expected one.
    NoReply(String),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndpointUnavailable(name) => write!(f, "Endpoint unavailable: {}", name),
            Self::Handler(msg) => write!(f, "Handler failed: {}", msg),
            Self::NoReply(name) => write!(f, "Endpoint '{}' did not reply", name),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<anyhow::Error> for RpcError {
    fn from(e: anyhow::Error) -> Self {
        Self::Handler(format!("{:#}", e))
    }
}
