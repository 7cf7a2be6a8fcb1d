//! Pump error types

use thiserror::Error;

/// Errors recorded by the pump workers or returned by lifecycle calls
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to set {direction} deadline: {source}")]
    DeadlineError {
        direction: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The socket reported a timeout together with data. Unrecoverable.
    #[error("Read timed out but reported {bytes} bytes read")]
    TimeoutWithData { bytes: usize },

    /// The socket returned success without writing the whole buffer. Unrecoverable.
    #[error("Short write of {written} bytes when expected full {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// The socket claimed to move more bytes than it was handed. Unrecoverable.
    #[error("Socket reported {reported} bytes for a {direction} of {requested} bytes")]
    OverReport {
        direction: &'static str,
        reported: usize,
        requested: usize,
    },

    #[error("Worker already started")]
    AlreadyStarted,

    #[error("Failed to spawn worker thread: {0}")]
    SpawnError(std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl PumpError {
    /// True for errors that mean the socket implementation broke its contract.
    ///
    /// These never happen with a correct transport and are not retried.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            PumpError::TimeoutWithData { .. }
                | PumpError::ShortWrite { .. }
                | PumpError::OverReport { .. }
        )
    }

    /// True when the peer went away (EOF, reset, broken pipe).
    pub fn is_peer_closed(&self) -> bool {
        use std::io::ErrorKind;

        match self {
            PumpError::IoError(e) => matches!(
                e.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Result type for pump operations
pub type PumpResult<T> = Result<T, PumpError>;
