//! Pump configuration

use crate::error::{PumpError, PumpResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default read buffer size, used when a buffer size of zero is given.
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;

/// Default capacity of each direction's queue, in chunks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// How long a single socket read may block before the reader checks for a stop request.
pub const DEFAULT_READ_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long a single socket write may block before the writer checks for a stop request.
pub const DEFAULT_WRITE_POLL_INTERVAL: Duration = Duration::from_millis(40);

/// Tunables for one [`DuplexPump`](crate::DuplexPump)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Size of each read buffer. Zero means [`DEFAULT_BUFFER_SIZE`].
    pub buffer_size: usize,

    /// Capacity of each bounded queue, in chunks
    pub queue_capacity: usize,

    /// Read deadline, i.e. the reader's stop-polling interval
    #[serde(with = "duration_millis")]
    pub read_poll_interval: Duration,

    /// Write deadline, i.e. the writer's stop-polling interval
    #[serde(with = "duration_millis")]
    pub write_poll_interval: Duration,
}

/// Helper module for serializing Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_poll_interval: DEFAULT_READ_POLL_INTERVAL,
            write_poll_interval: DEFAULT_WRITE_POLL_INTERVAL,
        }
    }
}

impl PumpConfig {
    pub fn builder() -> PumpConfigBuilder {
        PumpConfigBuilder::default()
    }

    /// Buffer size actually used by the reader
    pub fn effective_buffer_size(&self) -> usize {
        if self.buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            self.buffer_size
        }
    }

    /// Reject settings the workers cannot run with.
    ///
    /// A zero poll interval would disable socket timeouts entirely and make
    /// stop requests unobservable while blocked in I/O.
    pub fn validate(&self) -> PumpResult<()> {
        if self.queue_capacity == 0 {
            return Err(PumpError::ConfigurationError(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.read_poll_interval.is_zero() {
            return Err(PumpError::ConfigurationError(
                "read_poll_interval must be non-zero".to_string(),
            ));
        }
        if self.write_poll_interval.is_zero() {
            return Err(PumpError::ConfigurationError(
                "write_poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for PumpConfig
#[derive(Default)]
pub struct PumpConfigBuilder {
    config: PumpConfig,
}

impl PumpConfigBuilder {
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn read_poll_interval(mut self, interval: Duration) -> Self {
        self.config.read_poll_interval = interval;
        self
    }

    pub fn write_poll_interval(mut self, interval: Duration) -> Self {
        self.config.write_poll_interval = interval;
        self
    }

    pub fn build(self) -> PumpResult<PumpConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
