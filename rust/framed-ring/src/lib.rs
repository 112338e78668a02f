//! Single-producer single-consumer byte ring over a shared region.
//!
//! A [`Segment`] holds two position counters and a circular data block.
//! One [`Writer`] appends length-framed records; one [`Reader`] drains them
//! in order and hands each to a callback. Neither side polls: when the ring
//! is full or empty the blocked side sleeps on the other side's counter.
//!
//! # Framing
//!
//! Each record is a 4-byte little-endian signed length followed by the
//! payload. A record never wraps around the end of the data block; when it
//! would, the writer emits a negative length (padding) covering the tail and
//! starts the record at offset 0. See [`FrameHeader`].
//!
//! # Positions
//!
//! `write_index` and `read_index` count bytes since creation and only grow.
//! Used space is `write_index - read_index`; the physical offset is
//! `index % capacity`.
//!
//! # Example
//!
//! ```
//! # async fn demo() -> Result<(), framed_ring::RingError> {
//! let segment = framed_ring::allocate(1024)?;
//! let mut writer = framed_ring::writer(&segment)?;
//!
//! writer.wait(5).await?;
//! writer.write(5, |buf| {
//!     buf.copy_from_slice(b"hello");
//!     5
//! })?;
//! writer.close();
//!
//! let mut seen = Vec::new();
//! framed_ring::reader(&segment, |payload: &[u8]| seen.push(payload.to_vec())).await?;
//! assert_eq!(seen, vec![b"hello".to_vec()]);
//! # Ok(())
//! # }
//! ```
//!
//! # Loom Testing
//!
//! Enable the `loom` feature to model the writer/reader protocol under all
//! thread interleavings. The models cap preemptions at two; raise the cap
//! with `LOOM_MAX_PREEMPTIONS` for a longer run.
//!
//! ```text
//! cargo test -p framed-ring --features loom --release loom
//! ```

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod frame;
pub mod futex;
pub mod reader;
pub mod region;
pub mod segment;
pub mod sync;
pub mod writer;


pub use config::RingConfig;
pub use error::RingError;
pub use frame::{FrameHeader, HEADER_LEN};
pub use futex::{Observation, Signal, WaitOutcome};
pub use reader::{Delivery, DrainSummary, Reader};
pub use region::{HeapRegion, Region};
pub use segment::{PeerState, Segment, SegmentStatus, Side};
pub use writer::Writer;

/// Allocate a zeroed segment with `capacity` data bytes.
pub fn allocate(capacity: usize) -> Result<Arc<Segment>, RingError> {
    Segment::allocate(capacity)
}

/// Attach the writer of `segment`.
pub fn writer(segment: &Arc<Segment>) -> Result<Writer, RingError> {
    Writer::new(segment)
}

/// Attach the reader of `segment` and drain it until the writer closes.
pub async fn reader<F, D>(segment: &Arc<Segment>, callback: F) -> Result<DrainSummary, RingError>
where
    F: FnMut(&[u8]) -> D,
    D: Into<Delivery>,
{
    Reader::new(segment)?.run(callback).await
}
