//! Segment layout: a state block followed by the data block.
//!
//! ```text
//! offset 0    SegmentState (128 bytes, one cache line per peer)
//! offset 128  data block: capacity bytes of ring + 4 bytes of slack
//! ```
//!
//! The slack lets the writer drop a padding header at any offset, even when
//! fewer than four bytes remain before the end of the ring. Records never
//! reach into it.

use std::fmt;
use std::mem::size_of;
use std::ptr;
use std::slice;
use std::sync::Arc;

use crate::config::RingConfig;
use crate::error::RingError;
use crate::frame::{FrameHeader, HEADER_LEN};
use crate::futex::Signal;
use crate::region::{HeapRegion, REGION_ALIGN};
use crate::sync::{AtomicU32, AtomicU64, Ordering};

/// Shared state block.
///
/// Counters are byte totals since creation and are never reduced modulo the
/// capacity; the physical offset is `index % capacity`.
#[repr(C)]
pub struct SegmentState {
    /// Bytes committed by the writer.
    pub write_index: AtomicU64,
    /// Bumped after every `write_index` publish; the reader sleeps on it.
    pub write_wake: AtomicU32,
    /// [`PeerState`] of the writer.
    pub writer_state: AtomicU32,
    _pad1: [u8; 48],

    /// Bytes consumed by the reader.
    pub read_index: AtomicU64,
    /// Bumped after every `read_index` publish; the writer sleeps on it.
    pub read_wake: AtomicU32,
    /// [`PeerState`] of the reader.
    pub reader_state: AtomicU32,
    _pad2: [u8; 48],
}

#[cfg(not(feature = "loom"))]
const _: () = assert!(size_of::<SegmentState>() == 128);

impl SegmentState {
    fn new() -> Self {
        Self {
            write_index: AtomicU64::new(0),
            write_wake: AtomicU32::new(0),
            writer_state: AtomicU32::new(PeerState::Detached as u32),
            _pad1: [0; 48],
            read_index: AtomicU64::new(0),
            read_wake: AtomicU32::new(0),
            reader_state: AtomicU32::new(PeerState::Detached as u32),
            _pad2: [0; 48],
        }
    }
}

/// Lifecycle of one side of a segment.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Detached = 0,
    Attached = 1,
    Closed = 2,
}

impl PeerState {
    fn from_u32(raw: u32) -> Self {
        match raw {
            0 => Self::Detached,
            1 => Self::Attached,
            _ => Self::Closed,
        }
    }
}

/// The two peers of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Writer,
    Reader,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Writer => f.write_str("writer"),
            Self::Reader => f.write_str("reader"),
        }
    }
}

/// Snapshot of a segment's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentStatus {
    pub write_index: u64,
    pub read_index: u64,
    pub capacity: usize,
    /// Bytes committed but not yet consumed.
    pub len: u64,
}

/// A shared ring segment: one writer, one reader.
pub struct Segment {
    region: HeapRegion,
    data_offset: usize,
    capacity: usize,
    config: RingConfig,
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("capacity", &self.capacity)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl Segment {
    /// Allocate a segment with `capacity` data bytes and default tuning.
    pub fn allocate(capacity: usize) -> Result<Arc<Self>, RingError> {
        Self::with_config(RingConfig::default().with_capacity(capacity))
    }

    /// Allocate a segment described by `config`.
    pub fn with_config(config: RingConfig) -> Result<Arc<Self>, RingError> {
        config.validate()?;

        let capacity = config.capacity;
        let data_offset = size_of::<SegmentState>().next_multiple_of(REGION_ALIGN);
        let region = HeapRegion::new_zeroed(data_offset + capacity + HEADER_LEN);
        // SAFETY: fresh allocation, nobody else can see it yet.
        unsafe { region.region().put(0, SegmentState::new()) };

        tracing::debug!(capacity, "segment allocated");
        Ok(Arc::new(Self {
            region,
            data_offset,
            capacity,
            config,
        }))
    }

    /// Logical size of the data block.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn state(&self) -> &SegmentState {
        // SAFETY: initialized in `with_config`, dropped only in `Drop`; the
        // heap region lives as long as `self`.
        unsafe { self.region.region().get::<SegmentState>(0) }
    }

    /// The counter published by `side`.
    #[inline]
    pub fn signal(&self, side: Side) -> Signal<'_> {
        let state = self.state();
        match side {
            Side::Writer => Signal::new(&state.write_index, &state.write_wake),
            Side::Reader => Signal::new(&state.read_index, &state.read_wake),
        }
    }

    fn peer_state(&self, side: Side) -> &AtomicU32 {
        let state = self.state();
        match side {
            Side::Writer => &state.writer_state,
            Side::Reader => &state.reader_state,
        }
    }

    pub(crate) fn attach(&self, side: Side) -> Result<(), RingError> {
        self.peer_state(side)
            .compare_exchange(
                PeerState::Detached as u32,
                PeerState::Attached as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| RingError::AlreadyAttached { side })?;
        tracing::debug!(%side, "attached to segment");
        Ok(())
    }

    /// Mark `side` closed and wake whoever waits on its counter.
    pub(crate) fn close(&self, side: Side) {
        self.peer_state(side)
            .store(PeerState::Closed as u32, Ordering::Release);
        self.signal(side).notify();
        tracing::debug!(%side, "closed");
    }

    #[inline]
    pub fn peer(&self, side: Side) -> PeerState {
        PeerState::from_u32(self.peer_state(side).load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn is_closed(&self, side: Side) -> bool {
        self.peer(side) == PeerState::Closed
    }

    pub fn status(&self) -> SegmentStatus {
        let write_index = self.signal(Side::Writer).load();
        let read_index = self.signal(Side::Reader).load();
        SegmentStatus {
            write_index,
            read_index,
            capacity: self.capacity,
            len: write_index.saturating_sub(read_index),
        }
    }

    #[inline]
    fn data_ptr(&self, offset: usize, len: usize) -> *mut u8 {
        assert!(
            offset + len <= self.capacity + HEADER_LEN,
            "data access {offset}+{len} past segment end"
        );
        self.region.region().offset(self.data_offset + offset)
    }

    /// # Safety
    ///
    /// `offset` must be the start of a frame the caller owns under the
    /// ring protocol.
    pub(crate) unsafe fn read_header(&self, offset: usize) -> FrameHeader {
        let mut raw = [0u8; HEADER_LEN];
        unsafe {
            ptr::copy_nonoverlapping(
                self.data_ptr(offset, HEADER_LEN),
                raw.as_mut_ptr(),
                HEADER_LEN,
            )
        };
        FrameHeader::decode(raw)
    }

    /// # Safety
    ///
    /// Only the writer may call this, and only ahead of its last published
    /// position.
    pub(crate) unsafe fn write_header(&self, offset: usize, header: FrameHeader) {
        let raw = header.encode();
        unsafe {
            ptr::copy_nonoverlapping(
                raw.as_ptr(),
                self.data_ptr(offset, HEADER_LEN),
                HEADER_LEN,
            )
        };
    }

    /// # Safety
    ///
    /// The bytes must be committed by the writer and not yet released by the
    /// reader.
    pub(crate) unsafe fn payload(&self, offset: usize, len: usize) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data_ptr(offset, len), len) }
    }

    /// # Safety
    ///
    /// Only the writer may call this, on bytes it has reserved and not yet
    /// published.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn payload_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.data_ptr(offset, len), len) }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        // SAFETY: last owner; the state was written in `with_config`.
        unsafe {
            ptr::drop_in_place(self.region.region().offset(0) as *mut SegmentState);
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn test_segment_state_size() {
        assert_eq!(size_of::<SegmentState>(), 128);
    }

    #[test]
    fn test_allocate_starts_empty() {
        let segment = Segment::allocate(39).unwrap();
        assert_eq!(segment.capacity(), 39);
        assert_eq!(
            segment.status(),
            SegmentStatus {
                write_index: 0,
                read_index: 0,
                capacity: 39,
                len: 0,
            }
        );
        assert_eq!(segment.peer(Side::Writer), PeerState::Detached);
        assert_eq!(segment.peer(Side::Reader), PeerState::Detached);
        let data = unsafe { segment.payload(0, 39) };
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_allocate_rejects_bad_capacity() {
        assert_eq!(
            Segment::allocate(4).unwrap_err(),
            RingError::InvalidCapacity { capacity: 4 }
        );
        assert_eq!(
            Segment::allocate(0).unwrap_err(),
            RingError::InvalidCapacity { capacity: 0 }
        );
    }

    #[test]
    fn test_attach_once_per_side() {
        let segment = Segment::allocate(16).unwrap();
        segment.attach(Side::Writer).unwrap();
        assert_eq!(
            segment.attach(Side::Writer),
            Err(RingError::AlreadyAttached { side: Side::Writer })
        );
        segment.attach(Side::Reader).unwrap();
        assert_eq!(segment.peer(Side::Reader), PeerState::Attached);
    }

    #[test]
    fn test_close_bumps_wake_word() {
        let segment = Segment::allocate(16).unwrap();
        segment.attach(Side::Reader).unwrap();
        segment.close(Side::Reader);
        assert!(segment.is_closed(Side::Reader));
        assert_eq!(segment.state().read_wake.load(Ordering::Acquire), 1);
        assert_eq!(segment.status().read_index, 0);
    }

    #[test]
    fn test_padding_header_fits_in_slack() {
        let segment = Segment::allocate(10).unwrap();
        unsafe {
            segment.write_header(8, FrameHeader::Padding { skip: 2 });
            assert_eq!(segment.read_header(8), FrameHeader::Padding { skip: 2 });
        }
    }

    #[test]
    #[should_panic(expected = "past segment end")]
    fn test_data_access_is_bounded() {
        let segment = Segment::allocate(10).unwrap();
        unsafe {
            segment.payload(8, 10);
        }
    }
}
