//! Record framing.
//!
//! Every frame starts with a 4-byte little-endian signed header. A
//! non-negative header `n` is a record followed by `n` payload bytes. A
//! negative header `-k` is padding: no payload, skip `k` bytes. Padding is
//! only ever written to consume the tail of the data block so that no record
//! straddles the wrap point.

/// Size of a frame header in bytes.
pub const HEADER_LEN: usize = 4;

/// A decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    /// A record with `len` payload bytes after the header.
    Record { len: u32 },
    /// A wrap marker; the reader skips `skip` bytes (header included).
    Padding { skip: u32 },
}

impl FrameHeader {
    /// The signed value stored on the wire.
    ///
    /// Lengths are bounded by the segment capacity, which never exceeds
    /// `i32::MAX`. A decoded `i32::MIN` maps back to itself.
    #[inline]
    pub fn to_wire(self) -> i32 {
        match self {
            Self::Record { len } => len as i32,
            Self::Padding { skip } => (skip as i32).wrapping_neg(),
        }
    }

    #[inline]
    pub fn from_wire(raw: i32) -> Self {
        if raw < 0 {
            Self::Padding {
                skip: raw.unsigned_abs(),
            }
        } else {
            Self::Record { len: raw as u32 }
        }
    }

    #[inline]
    pub fn encode(self) -> [u8; HEADER_LEN] {
        self.to_wire().to_le_bytes()
    }

    #[inline]
    pub fn decode(bytes: [u8; HEADER_LEN]) -> Self {
        Self::from_wire(i32::from_le_bytes(bytes))
    }

    /// Bytes this frame occupies in the stream.
    #[inline]
    pub fn frame_len(self) -> u64 {
        match self {
            Self::Record { len } => HEADER_LEN as u64 + len as u64,
            Self::Padding { skip } => skip as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_header_is_little_endian_length() {
        assert_eq!(FrameHeader::Record { len: 0x0102 }.encode(), [0x02, 0x01, 0, 0]);
        assert_eq!(
            FrameHeader::decode([0x02, 0x01, 0, 0]),
            FrameHeader::Record { len: 0x0102 }
        );
    }

    #[test]
    fn padding_is_negative_on_the_wire() {
        let header = FrameHeader::Padding { skip: 7 };
        assert_eq!(header.to_wire(), -7);
        assert_eq!(header.encode(), (-7i32).to_le_bytes());
        assert_eq!(FrameHeader::decode((-7i32).to_le_bytes()), header);
    }

    #[test]
    fn zero_is_an_empty_record() {
        assert_eq!(FrameHeader::from_wire(0), FrameHeader::Record { len: 0 });
        assert_eq!(FrameHeader::Record { len: 0 }.frame_len(), 4);
    }

    #[test]
    fn most_negative_header_does_not_overflow() {
        assert_eq!(
            FrameHeader::from_wire(i32::MIN),
            FrameHeader::Padding { skip: 1 << 31 }
        );
        assert_eq!(FrameHeader::from_wire(i32::MIN).to_wire(), i32::MIN);
    }

    #[test]
    fn frame_len_counts_header_for_records_only() {
        assert_eq!(FrameHeader::Record { len: 10 }.frame_len(), 14);
        assert_eq!(FrameHeader::Padding { skip: 3 }.frame_len(), 3);
    }
}
