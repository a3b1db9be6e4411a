//! # Reply Transport Abstraction
//!
//! The dispatcher never touches sockets. When a message arrived from another
//! process, its reply is handed to a [`ReplyTransport`] together with the
//! sender's address, and the network layer takes it from there.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The transport receives an already encoded reply frame.
//!   It does not interpret it.
//! - **Fire-and-Forget**: Delivery failures are reported back to the reply
//!   context only so they can be logged; they never reach the dispatcher.

use std::fmt;

use crate::address::TransportAddress;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A mechanism to push an encoded reply back to a remote caller.
///
/// This trait is designed to be object-safe (`Arc<dyn ReplyTransport>`). It is
/// invoked from dispatcher worker threads, so implementations must not block
/// for long; queueing the bytes onto an outbound connection is the expected shape.
pub trait ReplyTransport: Send + Sync + 'static {
    /// Delivers `frame` to the process listening at `to`.
    ///
    /// # invariants
    /// - Must not interpret the frame content.
    /// - Must return `Err` if the bytes could not be handed to the network.
    fn send_reply(&self, to: &TransportAddress, frame: Vec<u8>) -> Result<()>;
}
