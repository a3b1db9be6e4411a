//! # Endpoints
//!
//! An endpoint is any value implementing [`Endpoint`], registered with the
//! dispatcher under a unique name. The dispatcher only ever talks to it through
//! this trait, one message at a time.

use std::fmt;
use std::sync::Arc;

use crate::address::Address;
use crate::address::TransportAddress;
use crate::message::Payload;

/// The capability a message handler exposes to the dispatcher.
///
/// Hooks for one endpoint are never called concurrently, and always in mailbox
/// order: `on_start` first, `on_stop` last. Handlers that keep state use interior
/// mutability, since they are shared behind an `Arc`.
pub trait Endpoint: Send + Sync + 'static {
    /// Called once, before any other message.
    fn on_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Handles one message.
    ///
    /// Returning `Ok(Some(value))` answers the sender if it asked for a reply.
    /// Returning `Err` fails the sender's reply, or goes to [`Endpoint::on_error`]
    /// when nobody is waiting.
    fn receive(
        &self,
        sender: &TransportAddress,
        payload: Payload,
    ) -> anyhow::Result<Option<Payload>>;

    /// Called once, after every message queued before the stop request.
    fn on_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_connected(&self, _remote: &TransportAddress) {}

    fn on_disconnected(&self, _remote: &TransportAddress) {}

    fn on_network_error(&self, _cause: &str, _remote: &TransportAddress) {}

    /// Receives failures that have no caller to report to.
    fn on_error(&self, error: &anyhow::Error) {
        tracing::error!(error = %format!("{:#}", error), "unhandled endpoint error");
    }
}

/// The externally visible handle of a registered endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointRef {
    address: Address,
}

impl EndpointRef {
    pub fn new(address: Address) -> Self {
        Self { address }
    }

    pub fn name(&self) -> &str {
        self.address.name()
    }

    pub fn address(&self) -> &Address {
        &self.address
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndpointRef({})", self.address)
    }
}

/// Identity of a handler object: the address of its shared allocation.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub(crate) struct HandlerKey(usize);

impl HandlerKey {
    pub(crate) fn of<E: ?Sized>(handler: &Arc<E>) -> Self {
        Self(Arc::as_ptr(handler) as *const () as usize)
    }
}
