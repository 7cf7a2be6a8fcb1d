//! Queue → socket worker
//!
//! A [`StreamWriter`] owns a dedicated thread that takes chunks off its
//! inbound queue and writes each one to the socket in full. Writes are
//! bounded by a deadline only so the worker can notice stop requests; a
//! timeout with partial progress is retried with the unwritten remainder
//! until the chunk is delivered, the socket fails or a stop is requested.

use crate::config::DEFAULT_WRITE_POLL_INTERVAL;
use crate::error::{PumpError, PumpResult};
use crate::socket::{is_timeout, DuplexSocket};
use crate::worker::WorkerControl;
use crate::{ChunkReceiver, ChunkSender};
use bytes::{Buf, Bytes};
use crossbeam_channel::{select, Sender};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Sink receiving a handle to a writer once it has fully stopped
pub type WriterNotifier = Sender<StreamWriter>;

/// Writes chunks from a bounded queue to a socket on its own thread.
///
/// Cloning yields another handle to the same worker.
#[derive(Clone)]
pub struct StreamWriter {
    inner: Arc<WriterInner>,
}

struct WriterInner {
    socket: Arc<dyn DuplexSocket>,
    poll_interval: Duration,
    control: WorkerControl,

    /// Producer end handed out to collaborators
    inbound: ChunkSender,
    /// Consumer end, moved into the worker thread at start
    consumer: Mutex<Option<ChunkReceiver>>,

    notify: Option<WriterNotifier>,
    bytes_written: AtomicU64,
    chunks_written: AtomicU64,
}

/// What happened to one chunk
enum Delivery {
    Delivered,
    /// The worker has to terminate; the rest of the chunk is dropped
    Abandoned,
}

impl StreamWriter {
    pub fn new(
        socket: Arc<dyn DuplexSocket>,
        queue: (ChunkSender, ChunkReceiver),
        notify: Option<WriterNotifier>,
    ) -> Self {
        Self::with_poll_interval(socket, queue, DEFAULT_WRITE_POLL_INTERVAL, notify)
    }

    pub fn with_poll_interval(
        socket: Arc<dyn DuplexSocket>,
        (inbound, consumer): (ChunkSender, ChunkReceiver),
        poll_interval: Duration,
        notify: Option<WriterNotifier>,
    ) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                socket,
                poll_interval,
                control: WorkerControl::new("writer"),
                inbound,
                consumer: Mutex::new(Some(consumer)),
                notify,
                bytes_written: AtomicU64::new(0),
                chunks_written: AtomicU64::new(0),
            }),
        }
    }

    /// Spawn the worker thread. Fails if the writer was already started or stopped.
    pub fn start(&self) -> PumpResult<()> {
        let mut consumer = self
            .inner
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let queue = consumer.take().ok_or(PumpError::AlreadyStarted)?;

        let guard = FinishGuard {
            writer: self.clone(),
            queue: Some(queue),
        };
        self.inner.control.spawn(move || {
            if let Some(queue) = guard.queue.as_ref() {
                guard.writer.run(queue);
            }
        })
    }

    /// Sending end of the inbound queue, or `None` once stopping or stopped.
    pub fn inbound(&self) -> Option<ChunkSender> {
        if self.inner.control.is_active() {
            Some(self.inner.inbound.clone())
        } else {
            None
        }
    }

    /// Ask the worker to stop without waiting for it. Idempotent.
    pub fn request_stop(&self) {
        self.inner.control.request_stop();
    }

    /// Stop the worker and wait until it has exited.
    ///
    /// Chunks still queued are dropped. With `notify`, the notification sink
    /// receives this writer once it is done.
    pub fn stop(&self, notify: bool) {
        self.inner.control.set_report_done(notify);
        self.inner.control.request_stop();

        let idle = self
            .inner
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(queue) = idle {
            self.finish(queue);
        }

        self.inner.control.wait();
    }

    pub fn stop_and_notify(&self) {
        self.stop(true);
    }

    pub fn stop_without_notify(&self) {
        self.stop(false);
    }

    /// Also report to the notification sink when the worker ends on its own
    pub fn notify_on_finish(&self, notify: bool) {
        self.inner.control.set_report_done(notify);
    }

    pub fn wait(&self) {
        self.inner.control.wait();
    }

    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.inner.control.wait_timeout(timeout)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.control.is_stop_requested()
    }

    pub fn is_done(&self) -> bool {
        self.inner.control.is_done()
    }

    pub fn last_error(&self) -> Option<&PumpError> {
        self.inner.control.last_error()
    }

    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written.load(Ordering::Relaxed)
    }

    pub fn chunks_written(&self) -> u64 {
        self.inner.chunks_written.load(Ordering::Relaxed)
    }

    fn run(&self, queue: &ChunkReceiver) {
        let inner = &self.inner;

        loop {
            // `inner.inbound` outlives this loop, so the queue never disconnects
            let chunk = select! {
                recv(queue) -> chunk => match chunk {
                    Ok(chunk) => chunk,
                    Err(_) => return,
                },
                recv(inner.control.stop_observer()) -> _ => return,
            };

            if chunk.is_empty() {
                continue;
            }

            match self.deliver(chunk) {
                Delivery::Delivered => {
                    inner.chunks_written.fetch_add(1, Ordering::Relaxed);
                }
                Delivery::Abandoned => return,
            }
        }
    }

    /// Write `chunk` in full, retrying the remainder after each timeout
    fn deliver(&self, mut chunk: Bytes) -> Delivery {
        let inner = &self.inner;

        loop {
            if let Err(source) = inner.socket.set_write_deadline(inner.poll_interval) {
                inner.control.record_error(PumpError::DeadlineError {
                    direction: "write",
                    source,
                });
                return Delivery::Abandoned;
            }

            let expected = chunk.len();
            let transfer = inner.socket.write(&chunk);
            let written = transfer.bytes;
            if written > expected {
                inner.control.record_error(PumpError::OverReport {
                    direction: "write",
                    reported: written,
                    requested: expected,
                });
                return Delivery::Abandoned;
            }
            inner
                .bytes_written
                .fetch_add(written as u64, Ordering::Relaxed);

            match transfer.error {
                None if written == expected => return Delivery::Delivered,
                None => {
                    inner.control.record_error(PumpError::ShortWrite { written, expected });
                    return Delivery::Abandoned;
                }
                Some(err) if is_timeout(&err) => {
                    chunk.advance(written);
                    if chunk.is_empty() {
                        return Delivery::Delivered;
                    }
                    if inner.control.is_stop_requested() {
                        debug!(
                            unwritten = chunk.len(),
                            "Stop requested mid-chunk, dropping remainder"
                        );
                        return Delivery::Abandoned;
                    }
                }
                // Peer-closed is routine during teardown; the pump closes the socket
                Some(err) => {
                    inner.control.record_error(PumpError::IoError(err));
                    return Delivery::Abandoned;
                }
            }
        }
    }

    fn finish(&self, queue: ChunkReceiver) {
        self.inner.control.finish(
            || drop(queue),
            || {
                if let Some(sink) = &self.inner.notify {
                    if sink.send(self.clone()).is_err() {
                        debug!("Writer notification sink disconnected");
                    }
                }
            },
        );
    }
}

impl fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamWriter")
            .field("stop_requested", &self.is_stop_requested())
            .field("done", &self.is_done())
            .field("last_error", &self.last_error())
            .finish()
    }
}

struct FinishGuard {
    writer: StreamWriter,
    queue: Option<ChunkReceiver>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            self.writer.finish(queue);
        }
    }
}
