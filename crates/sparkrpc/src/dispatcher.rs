//! # Dispatcher
//!
//! Central registry for endpoints and the scheduler that feeds their mailboxes
//! to a fixed pool of worker threads.
//!
//! Uses DashMap for concurrent lookups without global locking. The only lock on
//! the hot path is the short coordination section around "is the dispatcher
//! stopped? then mutate/enqueue", which keeps a concurrent `shutdown` from
//! slipping between the check and the enqueue of a `post`.
//!
//! ## Flow
//!
//! ```text
//! post ──> Mailbox::post ──> run queue ──> worker ──> Mailbox::process ──> Endpoint
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::address;
use crate::address::Address;
use crate::address::TransportAddress;
use crate::config;
use crate::config::DispatcherConfig;
use crate::endpoint::Endpoint;
use crate::endpoint::EndpointRef;
use crate::endpoint::HandlerKey;
use crate::mailbox::Drain;
use crate::mailbox::Mailbox;
use crate::mailbox::MailboxStatus;
use crate::message::InboxMessage;
use crate::message::Notice;
use crate::message::RequestMessage;
use crate::reply::ReplyChannel;
use crate::reply::ReplyResult;
use crate::transport::ReplyTransport;
use crate::worker;
use crate::worker::Runnable;
use crate::worker::Termination;

#[derive(Debug)]
pub enum Error {
    /// An endpoint with this name is already registered.
    DuplicateEndpoint(String),
    /// `shutdown` has already been called.
    DispatcherStopped,
    /// The endpoint name cannot form a valid address.
    Address(address::Error),
    Config(config::Error),
    /// A worker thread could not be started.
    Spawn(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateEndpoint(name) => {
                write!(f, "There is already an endpoint called {}", name)
            }
            Self::DispatcherStopped => write!(f, "Dispatcher has been stopped"),
            Self::Address(e) => write!(f, "Address error: {}", e),
            Self::Config(e) => write!(f, "Configuration error: {}", e),
            Self::Spawn(e) => write!(f, "Failed to spawn worker: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Address(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<address::Error> for Error {
    fn from(e: address::Error) -> Self {
        Self::Address(e)
    }
}

impl From<config::Error> for Error {
    fn from(e: config::Error) -> Self {
        Self::Config(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One registered endpoint: its name, handler, public reference and mailbox.
pub(crate) struct EndpointRecord {
    name: String,
    handler: Arc<dyn Endpoint>,
    reference: EndpointRef,
    mailbox: Mailbox,
}

impl EndpointRecord {
    fn new(handler: Arc<dyn Endpoint>, reference: EndpointRef) -> Self {
        let name = reference.name().to_string();
        Self {
            mailbox: Mailbox::new(name.clone()),
            name,
            handler,
            reference,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Drains the mailbox; the reverse index entry goes away once it has stopped.
    pub(crate) fn process(&self, inner: &DispatcherInner) -> Drain {
        let drain = self.mailbox.process(&*self.handler, inner.throughput);
        if drain == Drain::Stopped {
            tracing::debug!(endpoint = %self.reference, "endpoint stopped");
            inner.release_reference(&self.handler, &self.reference);
        }
        drain
    }
}

/// State shared by the dispatcher handle and its workers.
pub(crate) struct DispatcherInner {
    address: TransportAddress,
    throughput: Option<usize>,
    endpoints: DashMap<String, Arc<EndpointRecord>>,
    references: DashMap<HandlerKey, EndpointRef>,
    /// The coordination lock; `true` once shutdown has begun.
    stopped: Mutex<bool>,
    runnable: mpsc::UnboundedSender<Runnable>,
    termination: Arc<Termination>,
}

impl DispatcherInner {
    fn lock_stopped(&self) -> MutexGuard<'_, bool> {
        self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.lock_stopped()
    }

    pub(crate) fn enqueue(&self, runnable: Runnable) {
        if self.runnable.send(runnable).is_err() {
            tracing::trace!("run queue closed, dropping entry");
        }
    }

    pub(crate) fn schedule(&self, record: Arc<EndpointRecord>) {
        tracing::trace!(endpoint = %record.name, "scheduling endpoint");
        self.enqueue(Runnable::Record(record));
    }

    fn remove_reference<E: ?Sized>(&self, handler: &Arc<E>) {
        self.references.remove(&HandlerKey::of(handler));
    }

    /// Drops the reverse index entry only while it still points at `reference`.
    fn release_reference<E: ?Sized>(&self, handler: &Arc<E>, reference: &EndpointRef) {
        self.references.remove_if(&HandlerKey::of(handler), |_, current| current == reference);
    }

    fn endpoint_names(&self) -> Vec<String> {
        self.endpoints.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Must be called with the coordination lock held.
    fn unregister_locked(&self, name: &str) {
        if let Some((_, record)) = self.endpoints.remove(name) {
            tracing::debug!(endpoint = name, "unregistering endpoint");
            record.mailbox.stop();
            self.schedule(record);
        }
    }

    /// Routes a message to a mailbox, or fails it if nobody can take it.
    fn post_message(&self, name: &str, message: InboxMessage) {
        let refused = {
            let stopped = self.lock_stopped();
            if *stopped {
                Some(message)
            } else {
                let record = self.endpoints.get(name).map(|entry| Arc::clone(entry.value()));
                match record {
                    None => Some(message),
                    Some(record) => match record.mailbox.post(message) {
                        Ok(()) => {
                            self.schedule(record);
                            None
                        }
                        Err(message) => Some(message),
                    },
                }
            }
        };

        if let Some(message) = refused {
            tracing::trace!(endpoint = name, "message refused");
            message.reject(name);
        }
    }
}

/// A cloneable handle to a running dispatcher.
///
/// Dropping the last handle does not stop the workers; call [`Dispatcher::shutdown`].
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) inner: Arc<DispatcherInner>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("address", &self.inner.address)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Starts a dispatcher and its worker pool.
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let queue: worker::RunQueue = Arc::new(tokio::sync::Mutex::new(rx));

        let inner = Arc::new(DispatcherInner {
            address: TransportAddress::new(config.host.clone(), config.port),
            throughput: config.throughput,
            endpoints: DashMap::new(),
            references: DashMap::new(),
            stopped: Mutex::new(false),
            runnable: tx,
            termination: Termination::new(),
        });
        let dispatcher = Self { inner };

        for id in 0..config.num_threads {
            let live = dispatcher.inner.termination.enter();
            let inner = Arc::clone(&dispatcher.inner);
            let queue = Arc::clone(&queue);

            let spawned = std::thread::Builder::new()
                .name(format!("dispatcher-worker-{}", id))
                .spawn(move || worker::run(id, inner, queue, live));

            if let Err(e) = spawned {
                dispatcher.shutdown();
                return Err(Error::Spawn(e));
            }
        }

        tracing::debug!(
            address = %dispatcher.inner.address,
            threads = config.num_threads,
            "dispatcher started",
        );
        Ok(dispatcher)
    }

    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Host and port used in the addresses of registered endpoints.
    pub fn address(&self) -> &TransportAddress {
        &self.inner.address
    }

    /// Registers `handler` under `name` and schedules its start.
    pub fn register<E: Endpoint>(&self, name: &str, handler: Arc<E>) -> Result<EndpointRef> {
        let address = Address::new(self.inner.address.host(), self.inner.address.port(), name)?;
        let reference = EndpointRef::new(address);
        let handler: Arc<dyn Endpoint> = handler;

        let stopped = self.inner.lock_stopped();
        if *stopped {
            return Err(Error::DispatcherStopped);
        }

        let record = match self.inner.endpoints.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(Error::DuplicateEndpoint(name.to_string())),
            Entry::Vacant(slot) => {
                let record = Arc::new(EndpointRecord::new(Arc::clone(&handler), reference.clone()));
                slot.insert(Arc::clone(&record));
                record
            }
        };
        self.inner.references.insert(HandlerKey::of(&handler), reference.clone());
        self.inner.schedule(record);
        drop(stopped);

        tracing::debug!(endpoint = %reference, "registered endpoint");
        Ok(reference)
    }

    /// The reference of a registered handler, if it is still indexed.
    pub fn lookup_reference<E: ?Sized>(&self, handler: &Arc<E>) -> Option<EndpointRef> {
        self.inner
            .references
            .get(&HandlerKey::of(handler))
            .map(|entry| entry.value().clone())
    }

    /// Drops the handler's reverse index entry; the name registry is untouched.
    pub fn remove_reference<E: ?Sized>(&self, handler: &Arc<E>) {
        self.inner.remove_reference(handler);
    }

    /// Removes `name` and queues its stop. Unknown names are ignored.
    pub fn unregister(&self, name: &str) {
        let _stopped = self.inner.lock_stopped();
        self.inner.unregister_locked(name);
    }

    /// Stops the referenced endpoint, unless the whole dispatcher is already stopping.
    pub fn stop(&self, reference: &EndpointRef) {
        let stopped = self.inner.lock_stopped();
        if *stopped {
            return;
        }
        self.inner.unregister_locked(reference.name());
    }

    /// Delivers a request; the outcome always arrives through `channel`.
    pub fn post(&self, message: RequestMessage, channel: ReplyChannel) {
        let reply = channel.into_context(&message.sender);
        let name = message.receiver.name();
        let content = InboxMessage::Content {
            sender: message.sender.clone(),
            payload: message.content,
            reply: Some(reply),
        };
        self.inner.post_message(name, content);
    }

    /// Posts a request and returns the receiver its reply will arrive on.
    pub fn post_local(&self, message: RequestMessage) -> oneshot::Receiver<ReplyResult> {
        let (channel, rx) = ReplyChannel::local();
        self.post(message, channel);
        rx
    }

    /// Posts a request whose reply goes back over `transport` to `message.sender`.
    pub fn post_remote(&self, message: RequestMessage, transport: Arc<dyn ReplyTransport>) {
        self.post(message, ReplyChannel::Remote(transport));
    }

    /// Posts a message nobody waits on. Refusals are only logged.
    pub fn post_one_way(&self, message: RequestMessage) {
        let name = message.receiver.name();
        let content = InboxMessage::Content {
            sender: message.sender.clone(),
            payload: message.content,
            reply: None,
        };
        self.inner.post_message(name, content);
    }

    /// Sends `notice` to every endpoint registered at the time of the call.
    pub fn broadcast(&self, notice: Notice) {
        let names = self.inner.endpoint_names();
        for name in names {
            self.inner.post_message(&name, InboxMessage::Notice(notice.clone()));
        }
    }

    /// Whether `name` is currently registered.
    pub fn verify(&self, name: &str) -> bool {
        self.inner.endpoints.contains_key(name)
    }

    /// Lifecycle state of a registered endpoint's mailbox.
    pub fn status(&self, name: &str) -> Option<MailboxStatus> {
        self.inner.endpoints.get(name).map(|entry| entry.value().mailbox.status())
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Stops accepting work, stops every endpoint and tells the workers to exit.
    ///
    /// Returns immediately; only the first call has an effect.
    pub fn shutdown(&self) {
        {
            let mut stopped = self.inner.lock_stopped();
            if *stopped {
                return;
            }
            *stopped = true;

            let names = self.inner.endpoint_names();
            for name in names {
                self.inner.unregister_locked(&name);
            }
        }

        self.inner.enqueue(Runnable::Poison);
        tracing::debug!(address = %self.inner.address, "dispatcher shutting down");
    }

    /// Blocks until every worker has exited.
    ///
    /// Never call this from inside an endpoint hook: the calling worker would wait on itself.
    pub fn await_termination(&self) {
        self.inner.termination.wait();
    }

    /// Like [`Dispatcher::await_termination`], giving up after `timeout`.
    /// Returns whether the pool has terminated.
    pub fn await_termination_timeout(&self, timeout: Duration) -> bool {
        self.inner.termination.wait_timeout(timeout)
    }

    /// Number of worker threads still running.
    pub fn live_workers(&self) -> usize {
        self.inner.termination.live()
    }
}

/// Fluent construction of a [`Dispatcher`].
#[derive(Debug, Default)]
pub struct DispatcherBuilder {
    config: DispatcherConfig,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config = self.config.bind(host, port);
        self
    }

    pub fn threads(mut self, num_threads: usize) -> Self {
        self.config = self.config.threads(num_threads);
        self
    }

    pub fn throughput(mut self, limit: usize) -> Self {
        self.config = self.config.throughput(limit);
        self
    }

    pub fn build(self) -> Result<Dispatcher> {
        Dispatcher::new(self.config)
    }
}
