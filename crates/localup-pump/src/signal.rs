//! Level-triggered one-shot signals
//!
//! A [`Signal`] is raised by dropping the only sender of a zero-capacity
//! channel. Every receiver then observes disconnection forever, which makes
//! the signal usable inside `crossbeam_channel::select!` next to queue
//! operations.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
pub(crate) struct Signal {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
    observer: Receiver<()>,
}

impl Signal {
    pub(crate) fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            observer: rx,
        }
    }

    /// Raise the signal. Returns `true` only for the call that raised it.
    pub(crate) fn raise(&self) -> bool {
        let sender = self
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        sender.is_some()
    }

    pub(crate) fn is_raised(&self) -> bool {
        matches!(self.observer.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block until the signal is raised
    pub(crate) fn wait(&self) {
        // Nothing is ever sent, so this only returns on disconnect
        let _ = self.observer.recv();
    }

    /// Block until the signal is raised or `timeout` elapses. Returns whether it was raised.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.observer.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Receiver that becomes ready (disconnected) once the signal is raised
    pub(crate) fn observer(&self) -> &Receiver<()> {
        &self.observer
    }
}
