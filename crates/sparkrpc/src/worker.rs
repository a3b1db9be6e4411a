//! # Worker Loop
//!
//! Every worker thread runs [`run`]: pull a runnable record off the shared
//! queue, drain its mailbox, repeat. Workers pull *records*, not messages, which
//! is what lets a handful of threads serve many endpoints without interleaving
//! any single endpoint's messages.
//!
//! ## Shutdown
//!
//! One [`Runnable::Poison`] is pushed when the dispatcher stops. A worker that
//! takes it puts it back before exiting, so every sibling sees it too. A closed
//! queue also ends the loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;

use crate::dispatcher::DispatcherInner;
use crate::dispatcher::EndpointRecord;
use crate::mailbox::Drain;
use crate::mailbox::panic_message;

/// An entry in the shared work queue. The same record may be queued many times.
pub(crate) enum Runnable {
    Record(Arc<EndpointRecord>),
    Poison,
}

pub(crate) type RunQueue = Arc<AsyncMutex<mpsc::UnboundedReceiver<Runnable>>>;

pub(crate) fn run(id: usize, inner: Arc<DispatcherInner>, queue: RunQueue, _live: LiveWorker) {
    tracing::debug!(worker = id, "worker started");

    loop {
        // Holding the lock while waiting hands the queue to one worker at a time.
        let next = queue.blocking_lock().blocking_recv();

        match next {
            None => {
                tracing::debug!(worker = id, "run queue closed");
                break;
            }
            Some(Runnable::Poison) => {
                inner.enqueue(Runnable::Poison);
                break;
            }
            Some(Runnable::Record(record)) => {
                let drained = std::panic::catch_unwind(AssertUnwindSafe(|| drain(&inner, &record)));
                if let Err(panic) = drained {
                    tracing::error!(
                        worker = id,
                        endpoint = %record.name(),
                        panic = %panic_message(&*panic),
                        "worker recovered from panic",
                    );
                }
            }
        }
    }

    tracing::debug!(worker = id, "worker exited");
}

fn drain(inner: &DispatcherInner, record: &Arc<EndpointRecord>) {
    loop {
        match record.process(inner) {
            // Nothing may be left stranded behind the poison sentinel.
            Drain::Yielded if inner.is_stopped() => continue,
            Drain::Yielded => {
                inner.schedule(Arc::clone(record));
                return;
            }
            Drain::Idle | Drain::Stopped => return,
        }
    }
}

/// Counts live workers so callers can wait for the pool to wind down.
pub(crate) struct Termination {
    live: Mutex<usize>,
    exited: Condvar,
}

impl Termination {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            live: Mutex::new(0),
            exited: Condvar::new(),
        })
    }

    /// Registers one worker; it counts as live until the guard drops.
    pub(crate) fn enter(self: &Arc<Self>) -> LiveWorker {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        LiveWorker { termination: Arc::clone(self) }
    }

    pub(crate) fn live(&self) -> usize {
        *self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait(&self) {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let _live = self
            .exited
            .wait_while(live, |live| *live > 0)
            .unwrap_or_else(PoisonError::into_inner);
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        let (live, _) = self
            .exited
            .wait_timeout_while(live, timeout, |live| *live > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *live == 0
    }
}

pub(crate) struct LiveWorker {
    termination: Arc<Termination>,
}

impl Drop for LiveWorker {
    fn drop(&mut self) {
        let mut live = self.termination.live.lock().unwrap_or_else(PoisonError::into_inner);
        *live -= 1;
        if *live == 0 {
            self.termination.exited.notify_all();
        }
    }
}
