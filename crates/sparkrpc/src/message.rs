//! # Messages
//!
//! What callers hand to the dispatcher ([`RequestMessage`], [`Notice`]) and what
//! actually sits in a mailbox ([`InboxMessage`]).

use std::fmt;

use crate::address::Address;
use crate::address::TransportAddress;
use crate::error::RpcError;
use crate::reply::ReplyContext;

/// Message bodies are opaque to the dispatcher.
pub type Payload = Vec<u8>;

/// A request addressed to a single endpoint.
#[derive(Debug, Clone)]
pub struct RequestMessage {
    /// Where the request came from; remote replies are sent back here.
    pub sender: TransportAddress,
    /// The endpoint that should handle it. Only the name is used for routing.
    pub receiver: Address,
    pub content: Payload,
}

impl RequestMessage {
    pub fn new(sender: TransportAddress, receiver: Address, content: impl Into<Payload>) -> Self {
        Self {
            sender,
            receiver,
            content: content.into(),
        }
    }
}

/// Transport lifecycle events, broadcast to every registered endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Connected(TransportAddress),
    Disconnected(TransportAddress),
    NetworkError { cause: String, remote: TransportAddress },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(remote) => write!(f, "connected to {}", remote),
            Self::Disconnected(remote) => write!(f, "disconnected from {}", remote),
            Self::NetworkError { cause, remote } => {
                write!(f, "network error with {}: {}", remote, cause)
            }
        }
    }
}

/// An entry in a mailbox queue.
pub(crate) enum InboxMessage {
    OnStart,
    OnStop,
    Content {
        sender: TransportAddress,
        payload: Payload,
        /// `None` for one-way messages.
        reply: Option<Box<dyn ReplyContext>>,
    },
    Notice(Notice),
}

impl InboxMessage {
    pub(crate) fn needs_reply(&self) -> bool {
        matches!(self, Self::Content { reply: Some(_), .. })
    }

    /// Reports a message that will never reach its handler.
    pub(crate) fn reject(self, endpoint: &str) {
        match self {
            Self::Content { reply: Some(reply), .. } => {
                reply.fail(RpcError::EndpointUnavailable(endpoint.to_string()));
            }
            Self::Content { reply: None, sender, .. } => {
                tracing::warn!(
                    endpoint,
                    %sender,
                    "dropping one-way message for unavailable endpoint",
                );
            }
            Self::Notice(notice) => {
                tracing::warn!(endpoint, %notice, "dropping notice for unavailable endpoint");
            }
            Self::OnStart | Self::OnStop => {}
        }
    }
}

impl fmt::Debug for InboxMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnStart => write!(f, "OnStart"),
            Self::OnStop => write!(f, "OnStop"),
            Self::Content { sender, payload, reply } => f
                .debug_struct("Content")
                .field("sender", sender)
                .field("len", &payload.len())
                .field("needs_reply", &reply.is_some())
                .finish(),
            Self::Notice(notice) => f.debug_tuple("Notice").field(notice).finish(),
        }
    }
}
