use std::time::Duration;

use crate::error::RingError;
use crate::frame::HEADER_LEN;

/// Default logical capacity of a segment's data block (1 MiB).
pub const DEFAULT_CAPACITY: usize = 1024 * 1024;

/// Bytes the reader drains before it yields to other work.
pub const DEFAULT_YIELD_LEN: u64 = 256 * 1024;

/// Upper bound on a single writer wait before it re-checks the reader.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest capacity whose offsets and padding fit in a frame header.
pub const MAX_CAPACITY: usize = i32::MAX as usize;

/// Configuration for a segment and the peers attached to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingConfig {
    /// Logical size of the data block in bytes.
    pub capacity: usize,
    /// Bytes drained between forced reader yields.
    pub yield_len: u64,
    /// Bound on each writer wait for reader progress. A timeout is retried,
    /// never reported.
    pub wait_timeout: Duration,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            yield_len: DEFAULT_YIELD_LEN,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

impl RingConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_yield_len(mut self, yield_len: u64) -> Self {
        self.yield_len = yield_len;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), RingError> {
        if self.capacity <= HEADER_LEN || self.capacity > MAX_CAPACITY {
            return Err(RingError::InvalidCapacity {
                capacity: self.capacity,
            });
        }
        if self.yield_len == 0 {
            return Err(RingError::InvalidConfig("yield_len must be > 0"));
        }
        Ok(())
    }
}
