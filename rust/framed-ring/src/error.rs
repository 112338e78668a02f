use std::fmt;

use crate::segment::Side;

/// Errors surfaced by the segment, writer and reader.
///
/// Every variant is a caller or encoder defect, or a closed peer. A full or
/// empty ring is never an error: it is handled by waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Segment capacity outside `(4, i32::MAX]`.
    InvalidCapacity { capacity: usize },
    /// A configuration value is out of range.
    InvalidConfig(&'static str),
    /// Header plus payload can never fit in the ring.
    RecordTooLarge { len: usize, max: usize },
    /// `write` was called without room reserved by a prior `wait`.
    NotReserved { len: usize },
    /// The encoder reported more bytes than the reserved length.
    InvalidLength { written: usize, len: usize },
    /// The reader decoded a header that cannot have been written by a writer.
    CorruptFrame { position: u64, header: i32 },
    /// The segment already has a peer on this side.
    AlreadyAttached { side: Side },
    /// The other peer closed.
    Closed,
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCapacity { capacity } => {
                write!(f, "invalid capacity {capacity}: must be > 4 and <= {}", i32::MAX)
            }
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::RecordTooLarge { len, max } => {
                write!(f, "record of {len} bytes exceeds maximum payload of {max} bytes")
            }
            Self::NotReserved { len } => {
                write!(f, "no room reserved for a {len} byte record; call wait first")
            }
            Self::InvalidLength { written, len } => {
                write!(f, "invalid data size: encoder wrote {written} bytes into {len}")
            }
            Self::CorruptFrame { position, header } => {
                write!(f, "corrupt frame header {header} at position {position}")
            }
            Self::AlreadyAttached { side } => write!(f, "segment already has a {side}"),
            Self::Closed => write!(f, "peer closed"),
        }
    }
}

impl std::error::Error for RingError {}
