//! # sparkrpc
//!
//! Named message endpoints driven by a shared pool of worker threads.
//!
//! Each registered [`Endpoint`] owns a mailbox. Messages posted to it are
//! handled one at a time, in arrival order, bracketed by `on_start` and
//! `on_stop`. Replies flow back through a [`ReplyChannel`]: a oneshot for local
//! callers, or an encoded [`ReplyFrame`] handed to a [`ReplyTransport`] for
//! remote ones.

pub mod address;
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod mailbox;
pub mod message;
pub mod reply;
pub mod transport;

mod worker;

#[doc(hidden)]
pub mod mock_transport;

pub use address::Address;
pub use address::TransportAddress;
pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use dispatcher::DispatcherBuilder;
pub use endpoint::Endpoint;
pub use endpoint::EndpointRef;
pub use error::RpcError;
pub use frame::ReplyFrame;
pub use mailbox::MailboxStatus;
pub use message::Notice;
pub use message::Payload;
pub use message::RequestMessage;
pub use reply::ReplyChannel;
pub use reply::ReplyResult;
pub use transport::ReplyTransport;
