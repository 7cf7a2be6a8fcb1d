//! Socket → queue worker
//!
//! A [`StreamReader`] owns a dedicated thread that reads from the socket and
//! publishes every non-empty read as one [`Bytes`] chunk on its outbound
//! queue. Reads are bounded by a short deadline so a stop request is noticed
//! within one poll interval even when the peer is silent.

use crate::config::{DEFAULT_BUFFER_SIZE, DEFAULT_READ_POLL_INTERVAL};
use crate::error::{PumpError, PumpResult};
use crate::socket::{is_timeout, DuplexSocket};
use crate::worker::WorkerControl;
use crate::{ChunkReceiver, ChunkSender};
use bytes::{Bytes, BytesMut};
use crossbeam_channel::{select, Sender};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Sink receiving a handle to a reader once it has fully stopped
pub type ReaderNotifier = Sender<StreamReader>;

/// Reads from a socket into a bounded queue on its own thread.
///
/// Cloning yields another handle to the same worker.
#[derive(Clone)]
pub struct StreamReader {
    inner: Arc<ReaderInner>,
}

struct ReaderInner {
    socket: Arc<dyn DuplexSocket>,
    buffer_size: usize,
    poll_interval: Duration,
    control: WorkerControl,

    /// Producer end, moved into the worker thread at start
    producer: Mutex<Option<ChunkSender>>,
    /// Consumer end handed out to collaborators
    outbound: ChunkReceiver,

    notify: Option<ReaderNotifier>,
    bytes_read: AtomicU64,
    chunks_read: AtomicU64,
}

impl StreamReader {
    /// Create a reader. A `buffer_size` of zero means [`DEFAULT_BUFFER_SIZE`].
    pub fn new(
        socket: Arc<dyn DuplexSocket>,
        queue: (ChunkSender, ChunkReceiver),
        buffer_size: usize,
        notify: Option<ReaderNotifier>,
    ) -> Self {
        Self::with_poll_interval(
            socket,
            queue,
            buffer_size,
            DEFAULT_READ_POLL_INTERVAL,
            notify,
        )
    }

    pub fn with_poll_interval(
        socket: Arc<dyn DuplexSocket>,
        (producer, outbound): (ChunkSender, ChunkReceiver),
        buffer_size: usize,
        poll_interval: Duration,
        notify: Option<ReaderNotifier>,
    ) -> Self {
        let buffer_size = if buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            buffer_size
        };

        Self {
            inner: Arc::new(ReaderInner {
                socket,
                buffer_size,
                poll_interval,
                control: WorkerControl::new("reader"),
                producer: Mutex::new(Some(producer)),
                outbound,
                notify,
                bytes_read: AtomicU64::new(0),
                chunks_read: AtomicU64::new(0),
            }),
        }
    }

    /// Spawn the worker thread. Fails if the reader was already started or stopped.
    pub fn start(&self) -> PumpResult<()> {
        let mut producer = self
            .inner
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let queue = producer.take().ok_or(PumpError::AlreadyStarted)?;

        let guard = FinishGuard {
            reader: self.clone(),
            queue: Some(queue),
        };
        self.inner.control.spawn(move || {
            if let Some(queue) = guard.queue.as_ref() {
                guard.reader.run(queue);
            }
        })
    }

    /// Receiving end of the outbound queue, or `None` once stopping or stopped.
    pub fn outbound(&self) -> Option<ChunkReceiver> {
        if self.inner.control.is_active() {
            Some(self.inner.outbound.clone())
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
    /// With `notify`, the notification sink given at construction receives
    /// this reader once it is done. Stopping a reader that was never started
    /// finishes it in place.
    pub fn stop(&self, notify: bool) {
        self.inner.control.set_report_done(notify);
        self.inner.control.request_stop();

        let idle = self
            .inner
            .producer
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

    /// Wait for completion without requesting a stop
    pub fn wait(&self) {
        self.inner.control.wait();
    }

    /// Wait up to `timeout` for completion. Returns whether the worker is done.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.inner.control.wait_timeout(timeout)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.inner.control.is_stop_requested()
    }

    pub fn is_done(&self) -> bool {
        self.inner.control.is_done()
    }

    /// The error that terminated the worker, if it ended on one
    pub fn last_error(&self) -> Option<&PumpError> {
        self.inner.control.last_error()
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    pub fn bytes_read(&self) -> u64 {
        self.inner.bytes_read.load(Ordering::Relaxed)
    }

    pub fn chunks_read(&self) -> u64 {
        self.inner.chunks_read.load(Ordering::Relaxed)
    }

    fn run(&self, queue: &ChunkSender) {
        let inner = &self.inner;
        let mut buf = BytesMut::zeroed(inner.buffer_size);

        loop {
            if inner.control.is_stop_requested() {
                return;
            }

            if let Err(source) = inner.socket.set_read_deadline(inner.poll_interval) {
                inner.control.record_error(PumpError::DeadlineError {
                    direction: "read",
                    source,
                });
                return;
            }

            let transfer = inner.socket.read(&mut buf);
            if let Some(err) = transfer.error {
                if is_timeout(&err) {
                    if transfer.bytes != 0 {
                        inner.control.record_error(PumpError::TimeoutWithData {
                            bytes: transfer.bytes,
                        });
                        return;
                    }
                    continue;
                }
                inner.control.record_error(PumpError::IoError(err));
                return;
            }

            if transfer.bytes == 0 {
                continue;
            }
            if transfer.bytes > buf.len() {
                inner.control.record_error(PumpError::OverReport {
                    direction: "read",
                    reported: transfer.bytes,
                    requested: buf.len(),
                });
                return;
            }

            buf.truncate(transfer.bytes);
            let chunk: Bytes = buf.freeze();

            // Backpressure: blocks while the queue is full, unless a stop arrives first.
            // `inner.outbound` keeps a receiver alive, so sending only fails after teardown.
            select! {
                send(queue, chunk) -> sent => {
                    if sent.is_err() {
                        return;
                    }
                }
                recv(inner.control.stop_observer()) -> _ => return,
            }

            inner
                .bytes_read
                .fetch_add(transfer.bytes as u64, Ordering::Relaxed);
            inner.chunks_read.fetch_add(1, Ordering::Relaxed);

            // The sent chunk now belongs to the consumer
            buf = BytesMut::zeroed(inner.buffer_size);
        }
    }

    fn finish(&self, queue: ChunkSender) {
        self.inner.control.finish(
            || drop(queue),
            || {
                if let Some(sink) = &self.inner.notify {
                    if sink.send(self.clone()).is_err() {
                        debug!("Reader notification sink disconnected");
                    }
                }
            },
        );
    }
}

impl fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("buffer_size", &self.inner.buffer_size)
            .field("stop_requested", &self.is_stop_requested())
            .field("done", &self.is_done())
            .field("last_error", &self.last_error())
            .finish()
    }
}

/// Runs the finish sequence when the worker body returns or unwinds
struct FinishGuard {
    reader: StreamReader,
    queue: Option<ChunkSender>,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if let Some(queue) = self.queue.take() {
            self.reader.finish(queue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_queue;
    use crate::socket::{MockDuplexSocket, Transfer};
    use crate::tests::{init_tracing, ReadStep, ScriptedSocket};
    use std::io;

    const WAIT: Duration = Duration::from_secs(5);

    fn reader_over(socket: Arc<dyn DuplexSocket>, capacity: usize) -> StreamReader {
        StreamReader::new(socket, chunk_queue(capacity), 64, None)
    }

    #[test]
    fn test_reads_become_chunks_in_order() {
        init_tracing();
        let socket = ScriptedSocket::with_reads(vec![
            ReadStep::Data(b"XY".to_vec()),
            ReadStep::Timeout,
            ReadStep::Data(b"Z".to_vec()),
        ]);
        let reader = reader_over(socket.clone(), 16);
        let outbound = reader.outbound().unwrap();
        reader.start().unwrap();

        assert_eq!(outbound.recv_timeout(WAIT).unwrap(), Bytes::from_static(b"XY"));
        assert_eq!(outbound.recv_timeout(WAIT).unwrap(), Bytes::from_static(b"Z"));

        reader.stop_without_notify();
        assert!(reader.is_done());
        assert!(reader.last_error().is_none());
        assert_eq!(reader.bytes_read(), 3);
        assert_eq!(reader.chunks_read(), 2);

        // Nothing else was queued and the producer is gone
        assert!(outbound.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_empty_reads_emit_nothing() {
        let socket = ScriptedSocket::with_reads(vec![
            ReadStep::Data(Vec::new()),
            ReadStep::Data(b"A".to_vec()),
        ]);
        let reader = reader_over(socket, 16);
        let outbound = reader.outbound().unwrap();
        reader.start().unwrap();

        assert_eq!(outbound.recv_timeout(WAIT).unwrap(), Bytes::from_static(b"A"));
        reader.stop_without_notify();
        assert_eq!(reader.chunks_read(), 1);
    }

    #[test]
    fn test_read_error_terminates_worker() {
        let socket = ScriptedSocket::with_reads(vec![
            ReadStep::Data(b"last".to_vec()),
            ReadStep::Fail(io::ErrorKind::ConnectionReset),
        ]);
        let reader = reader_over(socket.clone(), 16);
        let outbound = reader.outbound().unwrap();
        reader.start().unwrap();

        assert!(reader.wait_timeout(WAIT));
        assert!(reader.is_stop_requested());
        match reader.last_error() {
            Some(PumpError::IoError(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
            other => panic!("unexpected last error: {:?}", other),
        }

        // Data read before the error is still delivered, then the queue is closed
        assert_eq!(outbound.recv().unwrap(), Bytes::from_static(b"last"));
        assert!(outbound.recv().is_err());

        // The worker never closes the socket itself
        assert_eq!(socket.close_count(), 0);
    }

    #[test]
    fn test_stop_after_self_termination_does_not_block() {
        let socket = ScriptedSocket::with_reads(vec![ReadStep::Fail(io::ErrorKind::BrokenPipe)]);
        let reader = reader_over(socket, 16);
        reader.start().unwrap();
        assert!(reader.wait_timeout(WAIT));

        reader.stop_without_notify();
        reader.stop_and_notify();
        assert!(reader.is_done());
        assert!(reader.last_error().unwrap().is_peer_closed());
    }

    #[test]
    fn test_stop_abandons_chunk_when_queue_is_full() {
        init_tracing();
        let socket = ScriptedSocket::endless(b"fill");
        let reader = reader_over(socket, 2);
        let outbound = reader.outbound().unwrap();
        reader.start().unwrap();

        // Let the queue fill up with nobody consuming
        while outbound.len() < 2 {
            std::thread::sleep(Duration::from_millis(5));
        }

        reader.stop_without_notify();
        assert!(reader.is_done());
        assert!(reader.last_error().is_none());
        assert_eq!(outbound.len(), 2);
    }

    #[test]
    fn test_outbound_disabled_once_stop_requested() {
        let socket = ScriptedSocket::with_reads(Vec::new());
        let reader = reader_over(socket, 16);
        reader.start().unwrap();
        assert!(reader.outbound().is_some());

        reader.request_stop();
        assert!(reader.outbound().is_none());

        reader.wait();
        assert!(reader.outbound().is_none());
    }

    #[test]
    fn test_double_stop_is_harmless() {
        let socket = ScriptedSocket::with_reads(Vec::new());
        let reader = reader_over(socket, 16);
        reader.start().unwrap();

        reader.request_stop();
        reader.request_stop();
        reader.stop_without_notify();
        reader.stop_without_notify();
        assert!(reader.is_done());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let socket = ScriptedSocket::with_reads(Vec::new());
        let reader = reader_over(socket, 16);
        reader.start().unwrap();
        assert!(matches!(reader.start(), Err(PumpError::AlreadyStarted)));
        reader.stop_without_notify();
    }

    #[test]
    fn test_stop_before_start_finishes_in_place() {
        let socket = ScriptedSocket::with_reads(Vec::new());
        let reader = reader_over(socket, 16);
        let outbound = reader.outbound().unwrap();

        reader.stop_without_notify();
        assert!(reader.is_done());
        assert!(outbound.recv().is_err());
        assert!(matches!(reader.start(), Err(PumpError::AlreadyStarted)));
    }

    #[test]
    fn test_stop_and_notify_reports_to_sink() {
        let (sink_tx, sink_rx) = crossbeam_channel::unbounded();
        let socket = ScriptedSocket::with_reads(Vec::new());
        let reader = StreamReader::new(socket, chunk_queue(4), 0, Some(sink_tx));
        assert_eq!(reader.buffer_size(), DEFAULT_BUFFER_SIZE);
        reader.start().unwrap();

        reader.stop_and_notify();
        let notified = sink_rx.try_recv().unwrap();
        assert!(notified.is_done());
        assert!(Arc::ptr_eq(&notified.inner, &reader.inner));
    }

    #[test]
    fn test_stop_without_notify_bypasses_sink() {
        let (sink_tx, sink_rx) = crossbeam_channel::unbounded();
        let socket = ScriptedSocket::with_reads(Vec::new());
        let reader = StreamReader::new(socket, chunk_queue(4), 0, Some(sink_tx));
        reader.start().unwrap();

        reader.stop_without_notify();
        assert!(sink_rx.try_recv().is_err());
    }

    #[test]
    fn test_notify_on_finish_reports_self_termination() {
        let (sink_tx, sink_rx) = crossbeam_channel::unbounded();
        let socket = ScriptedSocket::with_reads(vec![ReadStep::Fail(io::ErrorKind::UnexpectedEof)]);
        let reader = StreamReader::new(socket, chunk_queue(4), 0, Some(sink_tx));
        reader.notify_on_finish(true);
        reader.start().unwrap();

        let notified = sink_rx.recv_timeout(WAIT).unwrap();
        assert!(notified.last_error().unwrap().is_peer_closed());
    }

    #[test]
    fn test_timeout_with_data_is_an_invariant_violation() {
        let mut socket = MockDuplexSocket::new();
        socket.expect_set_read_deadline().returning(|_| Ok(()));
        socket.expect_read().times(1).returning(|_| Transfer::timeout(3));
        socket.expect_close().never();

        let reader = reader_over(Arc::new(socket), 16);
        let outbound = reader.outbound().unwrap();
        reader.start().unwrap();

        assert!(reader.wait_timeout(WAIT));
        let err = reader.last_error().unwrap();
        assert!(err.is_invariant_violation());
        assert!(matches!(err, PumpError::TimeoutWithData { bytes: 3 }));
        assert!(outbound.recv().is_err());
    }

    #[test]
    fn test_over_reported_read_is_an_invariant_violation() {
        let mut socket = MockDuplexSocket::new();
        socket.expect_set_read_deadline().returning(|_| Ok(()));
        socket
            .expect_read()
            .times(1)
            .returning(|buf| Transfer::complete(buf.len() + 1));

        let reader = reader_over(Arc::new(socket), 16);
        let outbound = reader.outbound().unwrap();
        reader.start().unwrap();

        assert!(reader.wait_timeout(WAIT));
        assert!(matches!(
            reader.last_error(),
            Some(PumpError::OverReport {
                direction: "read",
                reported: 65,
                requested: 64
            })
        ));
        assert!(outbound.recv().is_err());
        assert_eq!(reader.chunks_read(), 0);
    }

    #[test]
    fn test_deadline_failure_terminates_worker() {
        let mut socket = MockDuplexSocket::new();
        socket
            .expect_set_read_deadline()
            .returning(|_| Err(io::Error::from(io::ErrorKind::InvalidInput)));
        socket.expect_read().never();

        let reader = reader_over(Arc::new(socket), 16);
        reader.start().unwrap();

        assert!(reader.wait_timeout(WAIT));
        assert!(matches!(
            reader.last_error(),
            Some(PumpError::DeadlineError {
                direction: "read",
                ..
            })
        ));
    }
}
