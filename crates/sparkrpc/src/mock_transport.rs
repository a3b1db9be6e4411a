//! Mock reply transports for testing.
//!
//! These are used by the test suites and are not part of the supported API.

use tokio::sync::mpsc;

use crate::address::TransportAddress;
use crate::transport;
use crate::transport::ReplyTransport;
use crate::transport::TransportError;

/// A transport that forwards every frame onto an unbounded channel.
///
/// The receiving half sees `(destination, frame)` pairs in send order.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<(TransportAddress, Vec<u8>)>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(TransportAddress, Vec<u8>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ReplyTransport for ChannelTransport {
    fn send_reply(&self, to: &TransportAddress, frame: Vec<u8>) -> transport::Result<()> {
        self.tx
            .send((to.clone(), frame))
            .map_err(|_| TransportError::ConnectionLost("Channel closed".into()))
    }
}

/// A transport whose every delivery fails.
pub struct FailingTransport;

impl ReplyTransport for FailingTransport {
    fn send_reply(&self, to: &TransportAddress, _frame: Vec<u8>) -> transport::Result<()> {
        Err(TransportError::Io(format!("no route to {}", to)))
    }
}
