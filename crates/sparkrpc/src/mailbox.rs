//! # Mailbox
//!
//! The private, ordered queue of one endpoint plus its lifecycle state.
//!
//! ## State machine
//!
//! ```text
//! Active --stop()--> Stopping --OnStop processed--> Stopped
//! ```
//!
//! Transitions are monotonic. `stop()` does not discard queued work: it appends
//! an `OnStop` sentinel, so everything posted earlier still reaches the handler.
//!
//! ## Invariants
//!
//! - **Exclusive drain**: a `processing` flag, flipped under the state lock,
//!   keeps a second worker out while one is draining. A worker that finds the
//!   mailbox busy returns immediately; the active worker picks up whatever it
//!   missed before clearing the flag.
//! - **FIFO**: messages reach the handler in the order `post` accepted them.
//! - **Closed when stopped**: once `Stopped`, `post` hands the message back.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use crate::endpoint::Endpoint;
use crate::error::RpcError;
use crate::message::InboxMessage;
use crate::message::Notice;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MailboxStatus {
    Active,
    Stopping,
    Stopped,
}

/// What a call to [`Mailbox::process`] left behind.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Drain {
    /// Nothing left to do, or another worker holds the mailbox.
    Idle,
    /// The throughput limit was hit with messages still queued.
    Yielded,
    /// `OnStop` was processed; the mailbox is closed for good.
    Stopped,
}

struct State {
    queue: VecDeque<InboxMessage>,
    status: MailboxStatus,
    processing: bool,
}

pub(crate) struct Mailbox {
    name: String,
    state: Mutex<State>,
}

impl Mailbox {
    /// Creates an active mailbox with `OnStart` already queued.
    pub(crate) fn new(name: impl Into<String>) -> Self {
        let mut queue = VecDeque::new();
        queue.push_back(InboxMessage::OnStart);
        Self {
            name: name.into(),
            state: Mutex::new(State {
                queue,
                status: MailboxStatus::Active,
                processing: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> MailboxStatus {
        self.lock().status
    }

    /// Appends a message, or hands it back if the mailbox has stopped.
    pub(crate) fn post(&self, message: InboxMessage) -> Result<(), InboxMessage> {
        let mut state = self.lock();
        if state.status == MailboxStatus::Stopped {
            return Err(message);
        }
        tracing::trace!(
            endpoint = %self.name,
            needs_reply = message.needs_reply(),
            "mailbox accepted message",
        );
        state.queue.push_back(message);
        Ok(())
    }

    /// Requests a stop. Only the first call has an effect.
    pub(crate) fn stop(&self) {
        let mut state = self.lock();
        if state.status != MailboxStatus::Active {
            return;
        }
        state.status = MailboxStatus::Stopping;
        state.queue.push_back(InboxMessage::OnStop);
        tracing::debug!(endpoint = %self.name, "mailbox stopping");
    }

    /// Drains queued messages into `handler`, at most `throughput` of them if set.
    pub(crate) fn process(&self, handler: &dyn Endpoint, throughput: Option<usize>) -> Drain {
        let mut message = {
            let mut state = self.lock();
            if state.processing {
                return Drain::Idle;
            }
            match state.queue.pop_front() {
                Some(message) => {
                    state.processing = true;
                    message
                }
                None => return Drain::Idle,
            }
        };

        let mut handled = 0usize;
        loop {
            let stopped = matches!(message, InboxMessage::OnStop);
            self.deliver(message, handler);
            handled += 1;

            let mut state = self.lock();
            if stopped {
                state.status = MailboxStatus::Stopped;
                state.processing = false;
                let leftover: Vec<InboxMessage> = state.queue.drain(..).collect();
                drop(state);
                for message in leftover {
                    message.reject(&self.name);
                }
                tracing::debug!(endpoint = %self.name, "mailbox stopped");
                return Drain::Stopped;
            }

            if throughput.is_some_and(|limit| handled >= limit) && !state.queue.is_empty() {
                state.processing = false;
                return Drain::Yielded;
            }

            match state.queue.pop_front() {
                Some(next) => message = next,
                None => {
                    state.processing = false;
                    return Drain::Idle;
                }
            }
        }
    }

    fn deliver(&self, message: InboxMessage, handler: &dyn Endpoint) {
        match message {
            InboxMessage::OnStart => {
                tracing::debug!(endpoint = %self.name, "starting endpoint");
                self.guarded("on_start", handler, || handler.on_start());
            }
            InboxMessage::OnStop => {
                tracing::debug!(endpoint = %self.name, "stopping endpoint");
                self.guarded("on_stop", handler, || handler.on_stop());
            }
            InboxMessage::Notice(notice) => {
                self.guarded("notice", handler, || {
                    match &notice {
                        Notice::Connected(remote) => handler.on_connected(remote),
                        Notice::Disconnected(remote) => handler.on_disconnected(remote),
                        Notice::NetworkError { cause, remote } => {
                            handler.on_network_error(cause, remote)
                        }
                    }
                    Ok(())
                });
            }
            InboxMessage::Content { sender, payload, reply } => {
                let receive = AssertUnwindSafe(|| handler.receive(&sender, payload));
                let outcome = std::panic::catch_unwind(receive);
                let outcome = match outcome {
                    Ok(result) => result,
                    Err(panic) => {
                        Err(anyhow::anyhow!("handler panicked: {}", panic_message(&*panic)))
                    }
                };

                match (outcome, reply) {
                    (Ok(Some(value)), Some(reply)) => reply.reply(value),
                    (Ok(None), Some(reply)) => reply.fail(RpcError::NoReply(self.name.clone())),
                    (Err(e), Some(reply)) => {
                        tracing::debug!(
                            endpoint = %self.name,
                            error = %format!("{:#}", e),
                            "handler failed, failing reply",
                        );
                        reply.fail(RpcError::from(e));
                    }
                    (Ok(Some(_)), None) => {
                        tracing::trace!(
                            endpoint = %self.name,
                            %sender,
                            "discarding reply to one-way message",
                        );
                    }
                    (Ok(None), None) => {}
                    (Err(e), None) => self.report(handler, e),
                }
            }
        }
    }

    /// Runs a hook, routing errors and panics to `on_error`.
    fn guarded(&self, hook: &str, handler: &dyn Endpoint, f: impl FnOnce() -> anyhow::Result<()>) {
        let result = match std::panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!("{} panicked: {}", hook, panic_message(&*panic))),
        };
        if let Err(e) = result {
            self.report(handler, e.context(format!("{} failed", hook)));
        }
    }

    fn report(&self, handler: &dyn Endpoint, error: anyhow::Error) {
        tracing::debug!(
            endpoint = %self.name,
            error = %format!("{:#}", error),
            "reporting endpoint error",
        );
        let reported = std::panic::catch_unwind(AssertUnwindSafe(|| handler.on_error(&error)));
        if reported.is_err() {
            tracing::error!(endpoint = %self.name, "on_error panicked");
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::oneshot;

    use crate::address::TransportAddress;
    use crate::message::Payload;
    use crate::reply::ReplyChannel;
    use crate::reply::ReplyResult;

    /// Records every hook call in order.
    #[derive(Default)]
    struct Journal {
        events: Mutex<Vec<String>>,
    }

    impl Journal {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Endpoint for Journal {
        fn on_start(&self) -> anyhow::Result<()> {
            self.events.lock().unwrap().push("start".into());
            Ok(())
        }

        fn receive(
            &self,
            _sender: &TransportAddress,
            payload: Payload,
        ) -> anyhow::Result<Option<Payload>> {
            match payload.first() {
                Some(0xEE) => anyhow::bail!("bad input"),
                Some(0xFF) => panic!("exploded"),
                _ => {
                    self.events.lock().unwrap().push(format!("msg {:?}", payload));
                    Ok(Some(payload))
                }
            }
        }

        fn on_stop(&self) -> anyhow::Result<()> {
            self.events.lock().unwrap().push("stop".into());
            Ok(())
        }

        fn on_connected(&self, remote: &TransportAddress) {
            self.events.lock().unwrap().push(format!("connected {}", remote));
        }

        fn on_error(&self, error: &anyhow::Error) {
            self.events.lock().unwrap().push(format!("error {}", error));
        }
    }

    fn sender() -> TransportAddress {
        TransportAddress::new("localhost", 1)
    }

    fn content(payload: Payload) -> (InboxMessage, oneshot::Receiver<ReplyResult>) {
        let (channel, rx) = ReplyChannel::local();
        let message = InboxMessage::Content {
            sender: sender(),
            payload,
            reply: Some(channel.into_context(&sender())),
        };
        (message, rx)
    }

    fn one_way(payload: Payload) -> InboxMessage {
        InboxMessage::Content { sender: sender(), payload, reply: None }
    }

    #[test]
    fn test_start_runs_first_and_messages_in_order() {
        let mailbox = Mailbox::new("journal");
        let journal = Journal::default();

        for i in 1..=3u8 {
            mailbox.post(one_way(vec![i])).unwrap();
        }

        assert_eq!(mailbox.process(&journal, None), Drain::Idle);
        assert_eq!(journal.events(), vec!["start", "msg [1]", "msg [2]", "msg [3]"]);
    }

    #[test]
    fn test_reply_delivered_through_context() {
        let mailbox = Mailbox::new("journal");
        let journal = Journal::default();

        let (message, mut rx) = content(vec![42]);
        mailbox.post(message).unwrap();
        mailbox.process(&journal, None);

        assert_eq!(rx.try_recv().unwrap(), Ok(vec![42]));
    }

    #[test]
    fn test_handler_error_fails_reply() {
        let mailbox = Mailbox::new("journal");
        let journal = Journal::default();

        let (message, mut rx) = content(vec![0xEE]);
        mailbox.post(message).unwrap();
        mailbox.process(&journal, None);

        match rx.try_recv().unwrap() {
            Err(RpcError::Handler(msg)) => assert!(msg.contains("bad input")),
            other => panic!("Expected Handler error, got {:?}", other),
        }
    }

    #[test]
    fn test_one_way_error_goes_to_on_error() {
        let mailbox = Mailbox::new("journal");
        let journal = Journal::default();

        mailbox.post(one_way(vec![0xEE])).unwrap();
        mailbox.post(one_way(vec![7])).unwrap();
        mailbox.process(&journal, None);

        assert_eq!(journal.events(), vec!["start", "error bad input", "msg [7]"]);
    }

    #[test]
    fn test_panic_is_contained() {
        let mailbox = Mailbox::new("journal");
        let journal = Journal::default();

        let (message, mut rx) = content(vec![0xFF]);
        mailbox.post(message).unwrap();
        mailbox.post(one_way(vec![8])).unwrap();
        mailbox.process(&journal, None);

        match rx.try_recv().unwrap() {
            Err(RpcError::Handler(msg)) => assert!(msg.contains("exploded")),
            other => panic!("Expected Handler error, got {:?}", other),
        }
        assert!(journal.events().contains(&"msg [8]".to_string()));
    }

    #[test]
    fn test_stop_drains_pending_then_closes() {
        let mailbox = Mailbox::new("journal");
        let journal = Journal::default();

        mailbox.post(one_way(vec![1])).unwrap();
        mailbox.stop();
        mailbox.stop();
        assert_eq!(mailbox.status(), MailboxStatus::Stopping);

        assert_eq!(mailbox.process(&journal, None), Drain::Stopped);
        assert_eq!(mailbox.status(), MailboxStatus::Stopped);
        assert_eq!(journal.events(), vec!["start", "msg [1]", "stop"]);

        assert!(mailbox.post(one_way(vec![2])).is_err());
        assert_eq!(mailbox.process(&journal, None), Drain::Idle);
    }

    #[test]
    fn test_messages_behind_stop_are_failed() {
        let mailbox = Mailbox::new("journal");
        let journal = Journal::default();

        mailbox.stop();
        let (message, mut rx) = content(vec![5]);
        mailbox.post(message).unwrap();

        assert_eq!(mailbox.process(&journal, None), Drain::Stopped);
        assert_eq!(rx.try_recv().unwrap(), Err(RpcError::EndpointUnavailable("journal".into())));
        assert_eq!(journal.events(), vec!["start", "stop"]);
    }

    #[test]
    fn test_throughput_yields() {
        let mailbox = Mailbox::new("journal");
        let journal = Journal::default();

        for i in 1..=4u8 {
            mailbox.post(one_way(vec![i])).unwrap();
        }

        assert_eq!(mailbox.process(&journal, Some(2)), Drain::Yielded);
        assert_eq!(journal.events(), vec!["start", "msg [1]"]);
        assert_eq!(mailbox.process(&journal, Some(2)), Drain::Yielded);
        assert_eq!(mailbox.process(&journal, Some(2)), Drain::Idle);
        assert_eq!(journal.events().len(), 5);
    }

    #[test]
    fn test_busy_mailbox_is_skipped() {
        let mailbox = Mailbox::new("journal");
        let journal = Journal::default();

        mailbox.lock().processing = true;
        assert_eq!(mailbox.process(&journal, None), Drain::Idle);
        assert!(journal.events().is_empty());

        mailbox.lock().processing = false;
        assert_eq!(mailbox.process(&journal, None), Drain::Idle);
        assert_eq!(journal.events(), vec!["start"]);
    }

    #[test]
    fn test_notice_reaches_hook() {
        let mailbox = Mailbox::new("journal");
        let journal = Journal::default();

        let peer = TransportAddress::new("peer", 9);
        mailbox.post(InboxMessage::Notice(Notice::Connected(peer))).unwrap();
        mailbox.process(&journal, None);

        assert_eq!(journal.events(), vec!["start", "connected peer:9"]);
    }
}
