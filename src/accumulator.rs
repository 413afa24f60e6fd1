//! Reassembly buffer shared by the section and PES decoders.

use bytes::{Bytes, BytesMut};

/// Outcome of offering one packet to a section or PES decoder.
///
/// `NotApplicable` and `Pending` both mean "no units", but a caller routing packets needs to
/// know which decoder actually owns the packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Reassembly {
    /// The packet belongs to some other PID, and was not looked at
    NotApplicable,
    /// The packet was consumed, but did not complete a unit
    Pending,
    /// The packet completed one or more units, given here in stream order
    Units(Vec<Bytes>),
}

impl Reassembly {
    pub(crate) fn from_units(units: Vec<Bytes>) -> Reassembly {
        if units.is_empty() {
            Reassembly::Pending
        } else {
            Reassembly::Units(units)
        }
    }

    /// `false` only for `NotApplicable`
    pub fn is_applicable(&self) -> bool {
        !matches!(self, Reassembly::NotApplicable)
    }

    /// The completed units, if any
    pub fn into_units(self) -> Vec<Bytes> {
        match self {
            Reassembly::Units(units) => units,
            Reassembly::NotApplicable | Reassembly::Pending => Vec::new(),
        }
    }
}

/// Collects the fragments of one PSI section or PES packet until `expected` bytes have arrived.
///
/// An `expected` length of `0` means the total is not known in advance (an unbounded PES
/// packet); such an accumulator is never `is_full()` and is flushed by the caller when the next
/// unit starts.
#[derive(Debug)]
pub struct ChunkAccumulator {
    buf: BytesMut,
    expected: usize,
}

impl ChunkAccumulator {
    pub fn new(expected: usize) -> ChunkAccumulator {
        ChunkAccumulator {
            buf: BytesMut::with_capacity(expected),
            expected,
        }
    }

    pub fn push(&mut self, fragment: &[u8]) {
        self.buf.extend_from_slice(fragment);
    }

    /// Total bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn is_unbounded(&self) -> bool {
        self.expected == 0
    }

    /// Fix the expected length once it becomes known, for units whose length field was split
    /// across packets.
    pub fn set_expected(&mut self, expected: usize) {
        self.expected = expected;
    }

    /// Number of bytes still needed, or `None` if the length is unknown.
    pub fn remaining(&self) -> Option<usize> {
        if self.is_unbounded() {
            None
        } else {
            Some(self.expected.saturating_sub(self.buf.len()))
        }
    }

    /// The bytes accumulated so far.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..]
    }

    /// `true` once exactly the expected number of bytes has arrived.
    pub fn is_full(&self) -> bool {
        self.expected != 0 && self.buf.len() == self.expected
    }

    /// `true` if more bytes arrived than were expected, meaning the data is corrupt.
    pub fn is_over(&self) -> bool {
        self.expected != 0 && self.buf.len() > self.expected
    }

    /// Consume the accumulator, producing a single contiguous buffer.
    pub fn concat(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fill_exactly() {
        let mut acc = ChunkAccumulator::new(5);
        acc.push(b"ab");
        assert!(!acc.is_full());
        assert!(!acc.is_over());
        acc.push(b"cde");
        assert!(acc.is_full());
        assert_eq!(&acc.concat()[..], b"abcde");
    }

    #[test]
    fn overflow() {
        let mut acc = ChunkAccumulator::new(3);
        acc.push(b"abcd");
        assert!(acc.is_over());
        assert!(!acc.is_full());
    }

    #[test]
    fn unbounded_never_full() {
        let mut acc = ChunkAccumulator::new(0);
        assert!(acc.is_unbounded());
        acc.push(&[0; 1000]);
        assert!(!acc.is_full());
        assert!(!acc.is_over());
        assert_eq!(acc.len(), 1000);
    }
}
