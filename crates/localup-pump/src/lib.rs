//! Byte pump between a connected socket and bounded in-process queues
//!
//! This crate is the data plane of a single proxied TCP connection. A
//! [`DuplexPump`] takes an already connected [`DuplexSocket`] and runs two
//! dedicated threads over it:
//!
//! ```text
//!   collaborator ──to_socket()──▶ [queue] ──▶ StreamWriter ──▶ socket
//!   collaborator ◀─from_socket()── [queue] ◀── StreamReader ◀── socket
//! ```
//!
//! Each queue holds up to [`DEFAULT_QUEUE_CAPACITY`] chunks; a full queue
//! blocks its producer, which is the only flow control. Shutdown is
//! cooperative: socket reads and writes carry short deadlines so a stop
//! request is observed within one poll interval.
//!
//! Listening, dialing, framing and wiring two pumps together are left to the
//! caller.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use localup_pump::DuplexPump;
//! use std::net::TcpStream;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let stream = TcpStream::connect("127.0.0.1:8080")?;
//! let pump = DuplexPump::new(stream, 0, None, None);
//! pump.start()?;
//!
//! if let Some(tx) = pump.to_socket() {
//!     tx.send(Bytes::from_static(b"ping"))?;
//! }
//! if let Some(rx) = pump.from_socket() {
//!     let reply = rx.recv()?;
//!     println!("received {} bytes", reply.len());
//! }
//!
//! pump.stop();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod pump;
pub mod reader;
pub mod socket;
pub mod writer;

mod signal;
mod worker;


pub use config::{
    PumpConfig, PumpConfigBuilder, DEFAULT_BUFFER_SIZE, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_READ_POLL_INTERVAL, DEFAULT_WRITE_POLL_INTERVAL,
};
pub use error::{PumpError, PumpResult};
pub use pump::{DuplexPump, PumpStats};
pub use reader::{ReaderNotifier, StreamReader};
pub use socket::{is_timeout, DuplexSocket, Transfer};
pub use writer::{StreamWriter, WriterNotifier};

use bytes::Bytes;

/// Producer end of a chunk queue
pub type ChunkSender = crossbeam_channel::Sender<Bytes>;

/// Consumer end of a chunk queue
pub type ChunkReceiver = crossbeam_channel::Receiver<Bytes>;

/// Create a bounded, FIFO queue of byte chunks
pub fn chunk_queue(capacity: usize) -> (ChunkSender, ChunkReceiver) {
    crossbeam_channel::bounded(capacity)
}
