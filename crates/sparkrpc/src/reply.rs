//! # Reply Contexts
//!
//! A reply context is how a handler's answer finds its way back to whoever sent
//! the message. Callers choose the route with a [`ReplyChannel`]; the dispatcher
//! turns it into a context when the message is accepted.
//!
//! - **Local**: the caller lives in this process and awaits a oneshot receiver.
//! - **Remote**: the caller lives elsewhere; the outcome is encoded as a
//!   [`ReplyFrame`] and pushed through a [`ReplyTransport`].
//!
//! ## Invariants
//!
//! - At most one of `reply` / `fail` takes effect per context. Later calls are
//!   ignored and logged.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::oneshot;

use crate::address::TransportAddress;
use crate::error::RpcError;
use crate::frame::ReplyFrame;
use crate::message::Payload;
use crate::transport::ReplyTransport;

/// What a local caller eventually receives.
pub type ReplyResult = std::result::Result<Payload, RpcError>;

/// Delivers exactly one outcome back to a message's originator.
pub trait ReplyContext: Send + Sync {
    fn reply(&self, value: Payload);
    fn fail(&self, error: RpcError);
}

/// Resolves an in-process oneshot channel.
pub struct LocalReply {
    tx: Mutex<Option<oneshot::Sender<ReplyResult>>>,
}

impl LocalReply {
    pub fn new(tx: oneshot::Sender<ReplyResult>) -> Self {
        Self { tx: Mutex::new(Some(tx)) }
    }

    fn complete(&self, result: ReplyResult) {
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
        match tx {
            // A dropped receiver means the caller stopped waiting.
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => tracing::warn!(?result, "local reply already completed, ignoring"),
        }
    }
}

impl ReplyContext for LocalReply {
    fn reply(&self, value: Payload) {
        self.complete(Ok(value));
    }

    fn fail(&self, error: RpcError) {
        self.complete(Err(error));
    }
}

/// Sends an encoded reply frame back to a remote sender.
pub struct RemoteReply {
    sender: TransportAddress,
    transport: Arc<dyn ReplyTransport>,
    done: AtomicBool,
}

impl RemoteReply {
    pub fn new(sender: TransportAddress, transport: Arc<dyn ReplyTransport>) -> Self {
        Self {
            sender,
            transport,
            done: AtomicBool::new(false),
        }
    }

    fn complete(&self, frame: ReplyFrame) {
        if self.done.swap(true, Ordering::AcqRel) {
            tracing::warn!(to = %self.sender, "remote reply already completed, ignoring");
            return;
        }

        let bytes = match frame.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(to = %self.sender, error = %e, "failed to encode reply frame");
                return;
            }
        };

        if let Err(e) = self.transport.send_reply(&self.sender, bytes) {
            tracing::warn!(to = %self.sender, error = %e, "failed to deliver remote reply");
        }
    }
}

impl ReplyContext for RemoteReply {
    fn reply(&self, value: Payload) {
        self.complete(ReplyFrame::Ok(value));
    }

    fn fail(&self, error: RpcError) {
        self.complete(ReplyFrame::Err(error));
    }
}

/// How the caller of `post` wants to hear back.
pub enum ReplyChannel {
    Local(oneshot::Sender<ReplyResult>),
    Remote(Arc<dyn ReplyTransport>),
}

impl ReplyChannel {
    /// Creates a local channel together with the receiver the caller awaits.
    pub fn local() -> (Self, oneshot::Receiver<ReplyResult>) {
        let (tx, rx) = oneshot::channel();
        (Self::Local(tx), rx)
    }

    pub(crate) fn into_context(self, sender: &TransportAddress) -> Box<dyn ReplyContext> {
        match self {
            Self::Local(tx) => Box::new(LocalReply::new(tx)),
            Self::Remote(transport) => Box::new(RemoteReply::new(sender.clone(), transport)),
        }
    }
}
