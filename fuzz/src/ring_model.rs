//! Sequential model of a writer and a reader sharing one segment.

use std::collections::VecDeque;

use framed_ring::{HEADER_LEN, Reader, RingError, Segment, Writer};

/// Smallest data block worth fuzzing.
pub const MIN_CAPACITY: usize = 5;
/// Keep rings small so wrap-around and padding happen constantly.
pub const MAX_CAPACITY: usize = 96;

/// Operations the fuzzer can sequence.
#[derive(Clone, Copy, Debug)]
pub enum RingOp {
    /// Reserve and write a record of this many payload bytes.
    Write(usize),
    /// Publish pending writes.
    Flush,
    /// Deliver everything published so far.
    Drain,
}

struct Model {
    segment: std::sync::Arc<Segment>,
    writer: Writer,
    reader: Reader,
    /// Written but not yet flushed.
    pending: Vec<Vec<u8>>,
    /// Flushed but not yet delivered.
    published: VecDeque<Vec<u8>>,
    next_id: u8,
}

impl Model {
    fn new(capacity: usize) -> Result<Self, String> {
        let segment = Segment::allocate(capacity).map_err(|e| e.to_string())?;
        let writer = Writer::new(&segment).map_err(|e| e.to_string())?;
        let reader = Reader::new(&segment).map_err(|e| e.to_string())?;
        Ok(Self {
            segment,
            writer,
            reader,
            pending: Vec::new(),
            published: VecDeque::new(),
            next_id: 0,
        })
    }

    fn write(&mut self, op_idx: usize, len: usize) -> Result<(), String> {
        let capacity = self.segment.capacity();
        let ready = match self.writer.try_wait(len) {
            Ok(ready) => ready,
            Err(RingError::RecordTooLarge { .. }) if len + HEADER_LEN > capacity => return Ok(()),
            Err(e) => return Err(format!("op {op_idx}: try_wait({len}) failed: {e}")),
        };

        if !ready {
            // Blocked is only legal when the unread bytes leave too little room.
            let unread = self.writer.position() - self.segment.status().read_index;
            if unread as usize + len + HEADER_LEN <= capacity {
                return Err(format!(
                    "op {op_idx}: blocked with {unread} unread bytes, len {len}, capacity {capacity}"
                ));
            }
            return Ok(());
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let payload: Vec<u8> = (0..len).map(|i| id.wrapping_add(i as u8)).collect();
        let written = self
            .writer
            .write(len, |buf| {
                buf.copy_from_slice(&payload);
                len
            })
            .map_err(|e| format!("op {op_idx}: write after successful wait failed: {e}"))?;
        if written != len {
            return Err(format!("op {op_idx}: wrote {written} of {len} bytes"));
        }
        self.pending.push(payload);
        Ok(())
    }

    fn flush(&mut self) {
        self.writer.flush();
        self.published.extend(self.pending.drain(..));
    }

    fn drain(&mut self, op_idx: usize) -> Result<(), String> {
        let mut delivered = Vec::new();
        self.reader
            .drain_available(|payload| delivered.push(payload.to_vec()))
            .map_err(|e| format!("op {op_idx}: drain failed: {e}"))?;

        for payload in delivered {
            match self.published.pop_front() {
                Some(expected) if expected == payload => {}
                Some(expected) => {
                    return Err(format!(
                        "op {op_idx}: delivered {payload:?} but expected {expected:?}"
                    ));
                }
                None => {
                    return Err(format!("op {op_idx}: delivered unpublished {payload:?}"));
                }
            }
        }
        if !self.published.is_empty() {
            return Err(format!(
                "op {op_idx}: {} published records were not delivered",
                self.published.len()
            ));
        }
        Ok(())
    }

    fn verify(&self, op_idx: usize) -> Result<(), String> {
        let status = self.segment.status();
        if status.read_index > status.write_index {
            return Err(format!(
                "after op {op_idx}: read_index {} passed write_index {}",
                status.read_index, status.write_index
            ));
        }
        if status.len > status.capacity as u64 {
            return Err(format!(
                "after op {op_idx}: {} bytes in use exceeds capacity {}",
                status.len, status.capacity
            ));
        }
        if self.writer.position() - status.read_index > status.capacity as u64 {
            return Err(format!(
                "after op {op_idx}: writer ran {} bytes ahead of the reader",
                self.writer.position() - status.read_index
            ));
        }
        Ok(())
    }
}

/// Execute a sequence of operations and verify invariants after each one.
pub fn execute_and_verify(capacity: usize, ops: &[RingOp]) -> Result<(), String> {
    let mut model = Model::new(capacity)?;

    for (i, op) in ops.iter().enumerate() {
        match *op {
            RingOp::Write(len) => model.write(i, len)?,
            RingOp::Flush => model.flush(),
            RingOp::Drain => model.drain(i)?,
        }
        model.verify(i)?;
    }

    // Everything written must come out once flushed.
    model.flush();
    model.drain(ops.len())
}
