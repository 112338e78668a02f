//! Producer side of a segment.
//!
//! The writer reserves room with [`Writer::wait`], fills it with
//! [`Writer::write`], and publishes its position with [`Writer::flush`].
//! Writes only mark the position dirty; one publish covers a whole batch.
//! Pending writes are also published before the writer sleeps, on close and
//! on drop.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::RingError;
use crate::frame::{FrameHeader, HEADER_LEN};
use crate::futex::{self, Observation, WaitOutcome};
use crate::segment::{Segment, Side};

/// What [`Writer::poll_space`] found.
enum Space {
    /// A `len` byte record fits contiguously at the tail.
    Ready,
    /// Not enough free space; sleep on the reader's wake word.
    Blocked { wake: u32 },
}

/// The single producer of a segment.
pub struct Writer {
    segment: Arc<Segment>,
    write_pos: u64,
    /// Last reader position we saw. Only ever lags the real one.
    read_pos: u64,
    dirty: bool,
    closed: bool,
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("write_pos", &self.write_pos)
            .field("read_pos", &self.read_pos)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl Writer {
    /// Attach as the segment's writer.
    pub fn new(segment: &Arc<Segment>) -> Result<Self, RingError> {
        segment.attach(Side::Writer)?;
        Ok(Self {
            segment: Arc::clone(segment),
            write_pos: segment.signal(Side::Writer).load(),
            read_pos: segment.signal(Side::Reader).load(),
            dirty: false,
            closed: false,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.segment.capacity()
    }

    /// Bytes committed so far, including unpublished ones.
    #[inline]
    pub fn position(&self) -> u64 {
        self.write_pos
    }

    #[inline]
    fn tail_offset(&self) -> usize {
        (self.write_pos % self.segment.capacity() as u64) as usize
    }

    fn required(&self, len: usize) -> Result<u64, RingError> {
        let capacity = self.segment.capacity();
        match len.checked_add(HEADER_LEN) {
            Some(required) if required <= capacity => Ok(required as u64),
            _ => Err(RingError::RecordTooLarge {
                len,
                max: capacity - HEADER_LEN,
            }),
        }
    }

    fn poll_space(&mut self, len: usize) -> Result<Space, RingError> {
        let required = self.required(len)?;
        let capacity = self.segment.capacity() as u64;

        loop {
            let available = capacity - (self.write_pos - self.read_pos);

            if available >= required {
                let tail = self.tail_offset();
                let contiguous = capacity - tail as u64;
                if contiguous >= required {
                    return Ok(Space::Ready);
                }

                // Burn the tail so the record starts at offset 0. Free space
                // is unchanged; only contiguity is.
                // SAFETY: `available >= contiguous`, so the tail is ours.
                unsafe {
                    self.segment.write_header(
                        tail,
                        FrameHeader::Padding {
                            skip: contiguous as u32,
                        },
                    )
                };
                self.write_pos += contiguous;
                self.dirty = true;
                trace!(position = self.write_pos, skip = contiguous, "padded ring tail");
                continue;
            }

            match self.segment.signal(Side::Reader).observe(self.read_pos) {
                Observation::Changed(read_pos) => self.read_pos = read_pos,
                Observation::Unchanged { wake } => {
                    if self.segment.is_closed(Side::Reader) {
                        return Err(RingError::Closed);
                    }
                    return Ok(Space::Blocked { wake });
                }
            }
        }
    }

    /// Reserve contiguous room for a record of `len` payload bytes without
    /// blocking. Returns `false` if the reader has to free space first.
    pub fn try_wait(&mut self, len: usize) -> Result<bool, RingError> {
        Ok(matches!(self.poll_space(len)?, Space::Ready))
    }

    /// Wait until a record of `len` payload bytes fits contiguously.
    ///
    /// Fails at once with [`RingError::RecordTooLarge`] if it never can, and
    /// with [`RingError::Closed`] if the reader is gone while we need space.
    pub async fn wait(&mut self, len: usize) -> Result<(), RingError> {
        loop {
            let Space::Blocked { wake } = self.poll_space(len)? else {
                return Ok(());
            };
            self.flush();
            trace!(len, position = self.write_pos, "wait started");
            let timeout = self.segment.config().wait_timeout;
            let outcome = futex::wait_async(&self.segment, Side::Reader, wake, Some(timeout)).await;
            self.wait_completed(outcome);
        }
    }

    /// Blocking form of [`Writer::wait`] for plain threads.
    pub fn wait_blocking(&mut self, len: usize) -> Result<(), RingError> {
        loop {
            let Space::Blocked { wake } = self.poll_space(len)? else {
                return Ok(());
            };
            self.flush();
            trace!(len, position = self.write_pos, "wait started");
            let timeout = self.segment.config().wait_timeout;
            let outcome = self.segment.signal(Side::Reader).wait(wake, Some(timeout));
            self.wait_completed(outcome);
        }
    }

    fn wait_completed(&self, outcome: WaitOutcome) {
        trace!(?outcome, "wait completed");
        if outcome == WaitOutcome::TimedOut {
            // Not an error: re-check the reader and sleep again.
            debug!(
                position = self.write_pos,
                read_pos = self.read_pos,
                "wait timed out, re-checking reader progress"
            );
        }
    }

    /// Write one record into room reserved by a successful wait.
    ///
    /// `encode` gets the `len` byte payload window and returns how many bytes
    /// it filled. Returns that count.
    ///
    /// The record stays invisible to the reader until the next publish. A
    /// wait publishes only when it has to sleep, so call [`Writer::flush`]
    /// at the end of each batch.
    pub fn write<F>(&mut self, len: usize, encode: F) -> Result<usize, RingError>
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        let required = self.required(len)?;
        let capacity = self.segment.capacity() as u64;
        let tail = self.tail_offset();
        let available = capacity - (self.write_pos - self.read_pos);
        if available < required || capacity - (tail as u64) < required {
            return Err(RingError::NotReserved { len });
        }

        // SAFETY: the window is free and contiguous per the checks above.
        let window = unsafe { self.segment.payload_mut(tail + HEADER_LEN, len) };
        let written = encode(window);
        if written > len {
            return Err(RingError::InvalidLength { written, len });
        }

        // SAFETY: `tail` is inside the reserved room.
        unsafe {
            self.segment.write_header(
                tail,
                FrameHeader::Record {
                    len: written as u32,
                },
            )
        };
        self.write_pos += (HEADER_LEN + written) as u64;
        self.dirty = true;
        Ok(written)
    }

    /// Publish every write since the last flush with one store and one wake.
    pub fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        self.segment.signal(Side::Writer).publish(self.write_pos);
        self.dirty = false;
    }

    /// Publish pending writes and tell the reader no more will come.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.flush();
        self.segment.close(Side::Writer);
        self.closed = true;
        debug!(position = self.write_pos, "writer closed");
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
