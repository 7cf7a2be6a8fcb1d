//! One connection, two workers

use crate::config::PumpConfig;
use crate::error::{PumpError, PumpResult};
use crate::reader::{ReaderNotifier, StreamReader};
use crate::socket::DuplexSocket;
use crate::writer::{StreamWriter, WriterNotifier};
use crate::{chunk_queue, ChunkReceiver, ChunkSender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Byte counters for both directions of a pump
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Bytes read from the socket and queued
    pub bytes_read: u64,
    /// Chunks queued from the socket
    pub chunks_read: u64,
    /// Bytes written to the socket
    pub bytes_written: u64,
    /// Chunks fully delivered to the socket
    pub chunks_written: u64,
}

/// Moves bytes between one connected socket and two bounded queues.
///
/// Data pushed into [`to_socket`](Self::to_socket) is written to the socket
/// in order; data read from the socket shows up on
/// [`from_socket`](Self::from_socket). [`start`](Self::start) spawns one
/// reader and one writer thread, [`stop`](Self::stop) halts both and then
/// closes the socket.
pub struct DuplexPump {
    socket: Arc<dyn DuplexSocket>,
    reader: StreamReader,
    writer: StreamWriter,
    started: AtomicBool,
    socket_closed: AtomicBool,
}

impl DuplexPump {
    /// Build a pump with default settings and the given read buffer size
    pub fn new<S>(
        socket: S,
        buffer_size: usize,
        reader_notify: Option<ReaderNotifier>,
        writer_notify: Option<WriterNotifier>,
    ) -> Self
    where
        S: DuplexSocket + 'static,
    {
        let config = PumpConfig {
            buffer_size,
            ..PumpConfig::default()
        };
        Self::build(Arc::new(socket), &config, reader_notify, writer_notify)
    }

    /// Build a pump from a validated configuration
    pub fn with_config(
        socket: Arc<dyn DuplexSocket>,
        config: &PumpConfig,
        reader_notify: Option<ReaderNotifier>,
        writer_notify: Option<WriterNotifier>,
    ) -> PumpResult<Self> {
        config.validate()?;
        Ok(Self::build(socket, config, reader_notify, writer_notify))
    }

    fn build(
        socket: Arc<dyn DuplexSocket>,
        config: &PumpConfig,
        reader_notify: Option<ReaderNotifier>,
        writer_notify: Option<WriterNotifier>,
    ) -> Self {
        let reader = StreamReader::with_poll_interval(
            socket.clone(),
            chunk_queue(config.queue_capacity),
            config.effective_buffer_size(),
            config.read_poll_interval,
            reader_notify,
        );
        let writer = StreamWriter::with_poll_interval(
            socket.clone(),
            chunk_queue(config.queue_capacity),
            config.write_poll_interval,
            writer_notify,
        );

        Self {
            socket,
            reader,
            writer,
            started: AtomicBool::new(false),
            socket_closed: AtomicBool::new(false),
        }
    }

    /// Start both workers. A pump can only be started once.
    pub fn start(&self) -> PumpResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(PumpError::AlreadyStarted);
        }

        self.reader.start()?;
        if let Err(e) = self.writer.start() {
            self.reader.stop_without_notify();
            return Err(e);
        }

        debug!("Pump started");
        Ok(())
    }

    /// Stop both workers, then close the socket
    pub fn stop(&self) {
        self.shutdown(false);
    }

    /// Same as [`stop`](Self::stop)
    pub fn close(&self) {
        self.stop();
    }

    /// Stop, reporting each worker to its notification sink
    pub fn stop_and_notify(&self) {
        self.shutdown(true);
    }

    pub fn stop_without_notify(&self) {
        self.shutdown(false);
    }

    fn shutdown(&self, notify: bool) {
        // Both workers wind down concurrently before we wait on either
        self.reader.notify_on_finish(notify);
        self.writer.notify_on_finish(notify);
        self.reader.request_stop();
        self.writer.request_stop();

        self.reader.stop(notify);
        self.writer.stop(notify);

        self.close_socket();
    }

    fn close_socket(&self) {
        if self.socket_closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.socket.close() {
            Ok(()) => debug!("Pump socket closed"),
            Err(e) => warn!("Failed to close pump socket: {}", e),
        }
    }

    /// Queue feeding the socket, or `None` once the pump is stopping
    pub fn to_socket(&self) -> Option<ChunkSender> {
        self.writer.inbound()
    }

    /// Queue of chunks read from the socket, or `None` once the pump is stopping
    pub fn from_socket(&self) -> Option<ChunkReceiver> {
        self.reader.outbound()
    }

    /// True once both workers have completed
    pub fn is_done(&self) -> bool {
        self.reader.is_done() && self.writer.is_done()
    }

    pub fn reader(&self) -> &StreamReader {
        &self.reader
    }

    pub fn writer(&self) -> &StreamWriter {
        &self.writer
    }

    pub fn stats(&self) -> PumpStats {
        PumpStats {
            bytes_read: self.reader.bytes_read(),
            chunks_read: self.reader.chunks_read(),
            bytes_written: self.writer.bytes_written(),
            chunks_written: self.writer.chunks_written(),
        }
    }
}

impl Drop for DuplexPump {
    fn drop(&mut self) {
        if self.started.load(Ordering::SeqCst) && !self.socket_closed.load(Ordering::SeqCst) {
            debug!("Pump dropped while running, stopping");
            self.stop_without_notify();
        }
    }
}
