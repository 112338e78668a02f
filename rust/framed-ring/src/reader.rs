//! Consumer side of a segment.
//!
//! The reader walks frames from its position up to the writer's published
//! position, skipping padding and handing each record to a callback, strictly
//! in order and one at a time. It publishes its own position whenever it
//! runs dry, every `yield_len` bytes, and before awaiting a pending delivery,
//! so the writer can reuse the space.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::error::RingError;
use crate::frame::{FrameHeader, HEADER_LEN};
use crate::futex::{self, Observation};
use crate::segment::{Segment, Side};
use crate::sync::thread;

/// What a record callback hands back to the reader.
pub enum Delivery {
    /// The record is fully handled.
    Done,
    /// Handling continues asynchronously. The reader publishes its position,
    /// then awaits this before decoding the next record.
    Pending(Pin<Box<dyn Future<Output = ()> + Send + 'static>>),
}

impl Delivery {
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }
}

impl From<()> for Delivery {
    fn from((): ()) -> Self {
        Self::Done
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("Done"),
            Self::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

/// Counts accumulated by a reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Records delivered to the callback.
    pub records: u64,
    /// Padding markers skipped.
    pub padding: u64,
    /// Payload bytes delivered.
    pub bytes: u64,
}

enum Step {
    Record { offset: usize, len: usize },
    Yield,
    Idle { wake: u32 },
    Finished,
}

/// The single consumer of a segment.
pub struct Reader {
    segment: Arc<Segment>,
    read_pos: u64,
    /// Last writer position we saw.
    write_pos: u64,
    yield_pos: u64,
    published: u64,
    summary: DrainSummary,
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("read_pos", &self.read_pos)
            .field("write_pos", &self.write_pos)
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

impl Reader {
    /// Attach as the segment's reader.
    pub fn new(segment: &Arc<Segment>) -> Result<Self, RingError> {
        segment.attach(Side::Reader)?;
        let read_pos = segment.signal(Side::Reader).load();
        Ok(Self {
            segment: Arc::clone(segment),
            read_pos,
            write_pos: read_pos,
            yield_pos: read_pos + segment.config().yield_len,
            published: read_pos,
            summary: DrainSummary::default(),
        })
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn position(&self) -> u64 {
        self.read_pos
    }

    #[inline]
    pub fn summary(&self) -> DrainSummary {
        self.summary
    }

    /// Drain records until the writer closes and everything it committed has
    /// been delivered.
    ///
    /// `callback` may return `()` or a [`Delivery`]. A pending delivery is
    /// awaited before the next record is decoded.
    pub async fn run<F, D>(mut self, mut callback: F) -> Result<DrainSummary, RingError>
    where
        F: FnMut(&[u8]) -> D,
        D: Into<Delivery>,
    {
        loop {
            match self.next_step()? {
                Step::Record { offset, len } => {
                    // SAFETY: committed by the writer, not yet released.
                    let delivery: Delivery =
                        callback(unsafe { self.segment.payload(offset, len) }).into();
                    if let Delivery::Pending(pending) = delivery {
                        // Let the writer reclaim everything before this record
                        // while the callback finishes.
                        self.publish();
                        pending.await;
                    }
                    self.consume(len);
                }
                Step::Yield => tokio::task::yield_now().await,
                Step::Idle { wake } => {
                    trace!(position = self.read_pos, "reader idle");
                    futex::wait_async(&self.segment, Side::Writer, wake, None).await;
                }
                Step::Finished => return Ok(self.finish()),
            }
        }
    }

    /// Blocking form of [`Reader::run`] for plain threads.
    pub fn run_blocking<F>(mut self, mut callback: F) -> Result<DrainSummary, RingError>
    where
        F: FnMut(&[u8]),
    {
        loop {
            match self.next_step()? {
                Step::Record { offset, len } => {
                    // SAFETY: committed by the writer, not yet released.
                    callback(unsafe { self.segment.payload(offset, len) });
                    self.consume(len);
                }
                Step::Yield => thread::yield_now(),
                Step::Idle { wake } => {
                    trace!(position = self.read_pos, "reader idle");
                    self.segment.signal(Side::Writer).wait(wake, None);
                }
                Step::Finished => return Ok(self.finish()),
            }
        }
    }

    /// Deliver every record published so far, then return without waiting.
    ///
    /// Returns the counts for this call only.
    pub fn drain_available<F>(&mut self, mut callback: F) -> Result<DrainSummary, RingError>
    where
        F: FnMut(&[u8]),
    {
        let before = self.summary;
        loop {
            match self.next_step()? {
                Step::Record { offset, len } => {
                    // SAFETY: committed by the writer, not yet released.
                    callback(unsafe { self.segment.payload(offset, len) });
                    self.consume(len);
                }
                Step::Yield => {}
                Step::Idle { .. } | Step::Finished => break,
            }
        }
        Ok(DrainSummary {
            records: self.summary.records - before.records,
            padding: self.summary.padding - before.padding,
            bytes: self.summary.bytes - before.bytes,
        })
    }

    fn next_step(&mut self) -> Result<Step, RingError> {
        loop {
            if self.read_pos >= self.yield_pos {
                self.yield_pos = self.read_pos + self.segment.config().yield_len;
                self.publish();
                trace!(position = self.read_pos, "forced yield");
                return Ok(Step::Yield);
            }

            if self.read_pos < self.write_pos {
                match self.decode()? {
                    FrameHeader::Padding { skip } => {
                        self.read_pos += skip as u64;
                        self.summary.padding += 1;
                    }
                    FrameHeader::Record { len } => {
                        return Ok(Step::Record {
                            offset: self.offset() + HEADER_LEN,
                            len: len as usize,
                        });
                    }
                }
                continue;
            }

            self.publish();

            let signal = self.segment.signal(Side::Writer);
            match signal.observe(self.write_pos) {
                Observation::Changed(write_pos) => self.write_pos = write_pos,
                Observation::Unchanged { wake } => {
                    if !self.segment.is_closed(Side::Writer) {
                        return Ok(Step::Idle { wake });
                    }
                    // The close may have raced our load of the counter.
                    let write_pos = signal.load();
                    if write_pos == self.write_pos {
                        return Ok(Step::Finished);
                    }
                    self.write_pos = write_pos;
                }
            }
        }
    }

    #[inline]
    fn offset(&self) -> usize {
        (self.read_pos % self.segment.capacity() as u64) as usize
    }

    fn decode(&self) -> Result<FrameHeader, RingError> {
        let offset = self.offset();
        let remaining = (self.segment.capacity() - offset) as u64;
        // SAFETY: `read_pos < write_pos`, so a frame starts here.
        let header = unsafe { self.segment.read_header(offset) };
        let valid = match header {
            FrameHeader::Padding { skip } => skip as u64 == remaining,
            FrameHeader::Record { .. } => header.frame_len() <= remaining,
        };
        if !valid || self.read_pos + header.frame_len() > self.write_pos {
            return Err(RingError::CorruptFrame {
                position: self.read_pos,
                header: header.to_wire(),
            });
        }
        Ok(header)
    }

    fn consume(&mut self, len: usize) {
        self.read_pos += (HEADER_LEN + len) as u64;
        self.summary.records += 1;
        self.summary.bytes += len as u64;
    }

    fn publish(&mut self) {
        if self.read_pos == self.published {
            return;
        }
        self.segment.signal(Side::Reader).publish(self.read_pos);
        self.published = self.read_pos;
    }

    fn finish(&mut self) -> DrainSummary {
        self.publish();
        debug!(
            records = self.summary.records,
            padding = self.summary.padding,
            bytes = self.summary.bytes,
            "drain complete"
        );
        self.summary
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.publish();
        self.segment.close(Side::Reader);
        // A cancelled `run` may leave its idle wait parked on the blocking
        // pool; kick it so the thread returns.
        self.segment.signal(Side::Writer).notify();
    }
}
