//! Lifecycle shared by the reader and writer workers

use crate::error::{PumpError, PumpResult};
use crate::signal::Signal;
use crossbeam_channel::Receiver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Stop/completion state of one worker thread
pub(crate) struct WorkerControl {
    role: &'static str,
    stop: Signal,
    done: Signal,
    report_done: AtomicBool,
    last_error: OnceLock<PumpError>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerControl {
    pub(crate) fn new(role: &'static str) -> Self {
        Self {
            role,
            stop: Signal::new(),
            done: Signal::new(),
            report_done: AtomicBool::new(false),
            last_error: OnceLock::new(),
            thread: Mutex::new(None),
        }
    }

    /// Spawn the worker thread and keep its handle for joining at stop time.
    ///
    /// `body` must own whatever finishes the worker on drop, so a failed
    /// spawn still raises completion.
    pub(crate) fn spawn<F>(&self, body: F) -> PumpResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("pump-{}", self.role))
            .spawn(body)
            .map_err(PumpError::SpawnError)?;

        *self.thread.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        debug!(worker = self.role, "Worker started");
        Ok(())
    }

    pub(crate) fn set_report_done(&self, report: bool) {
        self.report_done.store(report, Ordering::SeqCst);
    }

    pub(crate) fn reports_done(&self) -> bool {
        self.report_done.load(Ordering::SeqCst)
    }

    pub(crate) fn request_stop(&self) {
        if self.stop.raise() {
            debug!(worker = self.role, "Stop requested");
        }
    }

    pub(crate) fn is_stop_requested(&self) -> bool {
        self.stop.is_raised()
    }

    pub(crate) fn stop_observer(&self) -> &Receiver<()> {
        self.stop.observer()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.is_raised()
    }

    /// Accessors hand out queue endpoints only while this is true
    pub(crate) fn is_active(&self) -> bool {
        !self.is_stop_requested() && !self.is_done()
    }

    /// Record the error that terminates the worker. Only the first one is kept.
    pub(crate) fn record_error(&self, err: PumpError) {
        if err.is_invariant_violation() {
            error!(worker = self.role, error = %err, "Socket broke its contract, terminating worker");
        } else {
            debug!(worker = self.role, error = %err, "Worker terminating on error");
        }
        let _ = self.last_error.set(err);
    }

    pub(crate) fn last_error(&self) -> Option<&PumpError> {
        self.last_error.get()
    }

    /// Common termination sequence: raise stop, close the queue, notify, raise completion.
    pub(crate) fn finish(&self, close_queue: impl FnOnce(), notify: impl FnOnce()) {
        self.stop.raise();
        close_queue();
        if self.reports_done() {
            notify();
        }
        self.done.raise();
        debug!(worker = self.role, "Worker finished");
    }

    /// Block until completion, then reap the thread if nobody has yet
    pub(crate) fn wait(&self) {
        self.done.wait();

        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(worker = self.role, "Worker thread panicked");
            }
        }
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.done.wait_timeout(timeout) {
            self.wait();
            true
        } else {
            false
        }
    }
}
