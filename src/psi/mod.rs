//! Reassembly of *Program Specific Information* sections, and the header syntax common to them.
//!
//! # Concepts
//!
//! * The *Program Association Table* and *Program Map Table* are the two tables needed to find
//!   the elementary streams within a transport stream.
//! * A table is carried as one or more *Sections*.
//! * A section can be split across a small number of transport stream *Packets*, and one packet
//!   can hold the end of one section and the start of several more.
//!
//! [`SectionDecoder`](struct.SectionDecoder.html) turns the packets of one PID into complete
//! sections.  The table-specific views live in the [`pat`](pat/index.html) and
//! [`pmt`](pmt/index.html) modules.

pub mod pat;
pub mod pmt;

use crate::accumulator::{ChunkAccumulator, Reassembly};
use crate::packet;
use bytes::Bytes;
use log::warn;
use serde::Deserialize;

/// What to do with a section whose CRC_32 does not match its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CrcPolicy {
    /// Do not compute the CRC at all
    Ignore,
    /// Log mismatches, but still use the section
    #[default]
    Warn,
    /// Drop sections failing the check
    Reject,
}

/// The 3 bytes that start every PSI section.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SectionCommonHeader {
    pub table_id: u8,
    pub section_syntax_indicator: bool,
    pub private_indicator: bool,
    /// number of bytes in the section following the `section_length` field
    pub section_length: usize,
}

impl SectionCommonHeader {
    pub const SIZE: usize = 3;

    /// Panics if fewer than 3 bytes are given
    pub fn new(buf: &[u8]) -> SectionCommonHeader {
        assert!(buf.len() >= Self::SIZE);
        SectionCommonHeader {
            table_id: buf[0],
            section_syntax_indicator: buf[1] & 0b1000_0000 != 0,
            private_indicator: buf[1] & 0b0100_0000 != 0,
            section_length: ((u16::from(buf[1] & 0b0000_1111) << 8) | u16::from(buf[2])) as usize,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CurrentNext {
    Current,
    Next,
}

impl CurrentNext {
    fn from(v: u8) -> CurrentNext {
        if v & 1 == 0 {
            CurrentNext::Next
        } else {
            CurrentNext::Current
        }
    }
}

/// The 5 bytes following the common header in sections using the long 'section syntax'.
#[derive(Debug)]
pub struct TableSyntaxHeader<'buf> {
    buf: &'buf [u8],
}

impl<'buf> TableSyntaxHeader<'buf> {
    pub const SIZE: usize = 5;

    /// Panics if fewer than 5 bytes are given
    pub fn new(buf: &'buf [u8]) -> TableSyntaxHeader<'buf> {
        assert!(buf.len() >= Self::SIZE);
        TableSyntaxHeader { buf }
    }
    /// `transport_stream_id` in a PAT section, `program_number` in a PMT section.
    pub fn id(&self) -> u16 {
        u16::from(self.buf[0]) << 8 | u16::from(self.buf[1])
    }
    pub fn version(&self) -> u8 {
        (self.buf[2] >> 1) & 0b0001_1111
    }
    pub fn current_next_indicator(&self) -> CurrentNext {
        CurrentNext::from(self.buf[2])
    }
    pub fn section_number(&self) -> u8 {
        self.buf[3]
    }
    pub fn last_section_number(&self) -> u8 {
        self.buf[4]
    }
}

/// Problems with the syntax of a complete section.
#[derive(Debug, PartialEq, Eq)]
pub enum SectionError {
    NotEnoughData {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    /// The table uses the short syntax, but a long syntax table was expected
    NoSectionSyntax { table_id: u8 },
    UnexpectedTableId { expected: u8, actual: u8 },
}

/// A complete section using the long 'section syntax', split into its parts.
#[derive(Debug)]
pub struct SyntaxSection<'buf> {
    pub header: SectionCommonHeader,
    pub syntax: TableSyntaxHeader<'buf>,
    /// the table-specific bytes between the syntax header and the CRC
    pub body: &'buf [u8],
}

impl<'buf> SyntaxSection<'buf> {
    const CRC_SIZE: usize = 4;

    pub fn from_bytes(buf: &'buf [u8]) -> Result<SyntaxSection<'buf>, SectionError> {
        let min = SectionCommonHeader::SIZE + TableSyntaxHeader::SIZE + Self::CRC_SIZE;
        if buf.len() < min {
            return Err(SectionError::NotEnoughData {
                field: "section_syntax",
                expected: min,
                actual: buf.len(),
            });
        }
        let header = SectionCommonHeader::new(buf);
        if !header.section_syntax_indicator {
            return Err(SectionError::NoSectionSyntax {
                table_id: header.table_id,
            });
        }
        let end = (SectionCommonHeader::SIZE + header.section_length).min(buf.len());
        let body_start = SectionCommonHeader::SIZE + TableSyntaxHeader::SIZE;
        if end < body_start + Self::CRC_SIZE {
            return Err(SectionError::NotEnoughData {
                field: "section_length",
                expected: body_start + Self::CRC_SIZE,
                actual: end,
            });
        }
        Ok(SyntaxSection {
            header,
            syntax: TableSyntaxHeader::new(&buf[SectionCommonHeader::SIZE..]),
            body: &buf[body_start..end - Self::CRC_SIZE],
        })
    }

    pub fn expect_table_id(&self, expected: u8) -> Result<(), SectionError> {
        if self.header.table_id == expected {
            Ok(())
        } else {
            Err(SectionError::UnexpectedTableId {
                expected,
                actual: self.header.table_id,
            })
        }
    }
}

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ 0x04c1_1db7
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// The CRC-32/MPEG-2 of the given data (polynomial `0x04C11DB7`, MSB-first, initial value
/// `0xFFFFFFFF`, no final XOR).
///
/// Computed over a whole section *including* its trailing `CRC_32` field, the result is `0` if
/// the section is intact.
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    data.iter().fold(0xffff_ffff, |crc, &b| {
        (crc << 8) ^ CRC_TABLE[((crc >> 24) as u8 ^ b) as usize]
    })
}

/// Reassembles the PSI sections carried in the packets of a single PID.
pub struct SectionDecoder {
    pid: packet::Pid,
    crc_policy: CrcPolicy,
    acc: Option<ChunkAccumulator>,
    continuity: packet::ContinuityTracker,
}

impl SectionDecoder {
    /// `section_length` is a 12-bit field, but values above this are forbidden for PSI tables.
    const MAX_SECTION_LENGTH: usize = 1021;

    pub fn new(pid: packet::Pid, crc_policy: CrcPolicy) -> SectionDecoder {
        SectionDecoder {
            pid,
            crc_policy,
            acc: None,
            continuity: packet::ContinuityTracker::default(),
        }
    }

    pub fn pid(&self) -> packet::Pid {
        self.pid
    }

    /// Offer a packet, getting back any sections it completed.
    pub fn add(&mut self, pk: &packet::Packet<'_>) -> Reassembly {
        if pk.pid() != self.pid {
            return Reassembly::NotApplicable;
        }
        if pk.transport_error_indicator() {
            return Reassembly::Pending;
        }
        match self.continuity.check(pk) {
            packet::Continuity::Duplicate => return Reassembly::Pending,
            packet::Continuity::Discontinuous => {
                if self.acc.take().is_some() {
                    warn!("{:?}: continuity error, dropping partial section", self.pid);
                }
            }
            packet::Continuity::Continuous => (),
        }
        let payload = match pk.payload() {
            Some(payload) => payload,
            None => return Reassembly::Pending,
        };
        let mut units = vec![];
        if pk.payload_unit_start_indicator() {
            self.start(payload, &mut units);
        } else if let Some(acc) = self.acc.as_mut() {
            Self::fill(acc, payload);
            self.take_if_complete(&mut units);
        }
        Reassembly::from_units(units)
    }

    fn start(&mut self, payload: &[u8], units: &mut Vec<Bytes>) {
        let pointer_field = payload[0] as usize;
        let section_start = 1 + pointer_field;
        if section_start > payload.len() {
            warn!(
                "{:?}: pointer_field {} beyond end of payload of {} bytes",
                self.pid,
                pointer_field,
                payload.len()
            );
            self.acc = None;
            return;
        }
        // the bytes before the pointed-to position finish the previous section
        if let Some(mut acc) = self.acc.take() {
            Self::fill(&mut acc, &payload[1..section_start]);
            self.acc = Some(acc);
            self.take_if_complete(units);
            if let Some(acc) = self.acc.take() {
                warn!(
                    "{:?}: section incomplete at {} of {} bytes when next section started",
                    self.pid,
                    acc.len(),
                    acc.expected()
                );
            }
        }
        let mut pos = section_start;
        while pos < payload.len() {
            if payload[pos] == packet::Packet::STUFFING_BYTE {
                break;
            }
            let mut acc = ChunkAccumulator::new(0);
            let consumed = Self::fill(&mut acc, &payload[pos..]);
            pos += consumed;
            self.acc = Some(acc);
            if !self.take_if_complete(units) {
                break;
            }
        }
    }

    /// Pushes as much of `data` as belongs to the section under construction, returning the
    /// number of bytes used.
    fn fill(acc: &mut ChunkAccumulator, data: &[u8]) -> usize {
        let mut used = 0;
        if acc.is_unbounded() {
            // section_length not yet known
            let need = SectionCommonHeader::SIZE - acc.len();
            let take = need.min(data.len());
            acc.push(&data[..take]);
            used = take;
            if acc.len() < SectionCommonHeader::SIZE {
                return used;
            }
            let header = SectionCommonHeader::new(acc.bytes());
            acc.set_expected(SectionCommonHeader::SIZE + header.section_length);
        }
        let rest = &data[used..];
        let take = acc.remaining().unwrap_or(0).min(rest.len());
        acc.push(&rest[..take]);
        used + take
    }

    fn take_if_complete(&mut self, units: &mut Vec<Bytes>) -> bool {
        let complete = self.acc.as_ref().map(|a| a.is_full()).unwrap_or(false);
        if !complete {
            return false;
        }
        if let Some(acc) = self.acc.take() {
            let section = acc.concat();
            if self.accept(&section) {
                units.push(section);
            }
        }
        true
    }

    fn accept(&self, section: &[u8]) -> bool {
        let header = SectionCommonHeader::new(section);
        if header.section_length > Self::MAX_SECTION_LENGTH {
            warn!(
                "{:?}: section_length {} too large for table_id {:#04x}",
                self.pid, header.section_length, header.table_id
            );
            return false;
        }
        if !header.section_syntax_indicator || self.crc_policy == CrcPolicy::Ignore {
            return true;
        }
        let crc = crc32_mpeg2(section);
        if crc == 0 {
            return true;
        }
        warn!(
            "{:?}: CRC mismatch in section with table_id {:#04x} (residue {:#010x})",
            self.pid, header.table_id, crc
        );
        self.crc_policy != CrcPolicy::Reject
    }

    /// Forget any partially reassembled section.
    pub fn reset(&mut self) {
        self.acc = None;
        self.continuity.reset();
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::packet::{Packet, Pid};
    use assert_matches::assert_matches;
    use hex_literal::*;

    /// Prepend the 3-byte common header and append a valid CRC to the given syntax-section
    /// contents (table syntax header + body).
    pub(crate) fn make_section(table_id: u8, contents: &[u8]) -> Vec<u8> {
        let section_length = contents.len() + 4;
        let mut data = vec![
            table_id,
            0b1011_0000 | (section_length >> 8) as u8,
            (section_length & 0xff) as u8,
        ];
        data.extend_from_slice(contents);
        let crc = crc32_mpeg2(&data);
        data.extend_from_slice(&crc.to_be_bytes());
        data
    }

    /// Lay the given payload bytes out in consecutive packets of `pid`, the first having
    /// `payload_unit_start_indicator` set, padding the last with stuffing bytes.
    pub(crate) fn packetize(pid: u16, first_cc: u8, payload: &[u8]) -> Vec<[u8; Packet::SIZE]> {
        let mut result = vec![];
        let mut cc = first_cc;
        for (i, chunk) in payload.chunks(Packet::SIZE - 4).enumerate() {
            let mut buf = [0xffu8; Packet::SIZE];
            buf[0] = Packet::SYNC_BYTE;
            buf[1] = if i == 0 { 0x40 } else { 0 } | (pid >> 8) as u8;
            buf[2] = (pid & 0xff) as u8;
            buf[3] = 0x10 | (cc & 0xf);
            buf[4..4 + chunk.len()].copy_from_slice(chunk);
            result.push(buf);
            cc = (cc + 1) & 0xf;
        }
        result
    }

    fn pat_section() -> Vec<u8> {
        make_section(0, &hex!("0001 c1 00 00  0001 e100"))
    }

    #[test]
    fn crc() {
        assert_eq!(crc32_mpeg2(b"123456789"), 0x0376_e6e7);
        let sect = pat_section();
        assert_eq!(crc32_mpeg2(&sect), 0);
    }

    #[test]
    fn wrong_pid_not_applicable() {
        let mut payload = vec![0];
        payload.extend(pat_section());
        let packets = packetize(0x20, 0, &payload);
        let mut dec = SectionDecoder::new(Pid::PAT, CrcPolicy::Warn);
        assert_eq!(
            dec.add(&Packet::new(&packets[0][..])),
            Reassembly::NotApplicable
        );
    }

    #[test]
    fn small_section() {
        let sect = pat_section();
        let mut payload = vec![0];
        payload.extend_from_slice(&sect);
        let packets = packetize(0, 0, &payload);
        let mut dec = SectionDecoder::new(Pid::PAT, CrcPolicy::Reject);
        assert_matches!(dec.add(&Packet::new(&packets[0][..])), Reassembly::Units(units) => {
            assert_eq!(units.len(), 1);
            assert_eq!(&units[0][..], &sect[..]);
        });
    }

    #[test]
    fn continuation_outside_section() {
        let mut buf = [0xffu8; Packet::SIZE];
        buf[..4].copy_from_slice(&hex!("47 00 00 10"));
        let mut dec = SectionDecoder::new(Pid::PAT, CrcPolicy::Warn);
        assert_eq!(dec.add(&Packet::new(&buf[..])), Reassembly::Pending);
    }

    #[test]
    fn section_spanning_packets() {
        // one large PMT-like section
        let mut contents = hex!("0001 c1 00 00 e101 f000").to_vec();
        for i in 0..60u16 {
            contents.extend_from_slice(&[0x1b, 0xe1, i as u8, 0xf0, 0x00]);
        }
        let sect = make_section(2, &contents);
        assert!(sect.len() > Packet::SIZE);
        let mut payload = vec![0];
        payload.extend_from_slice(&sect);
        let packets = packetize(0x100, 3, &payload);
        assert_eq!(packets.len(), 2);
        let mut dec = SectionDecoder::new(Pid::new(0x100), CrcPolicy::Reject);
        assert_eq!(dec.add(&Packet::new(&packets[0][..])), Reassembly::Pending);
        assert_matches!(dec.add(&Packet::new(&packets[1][..])), Reassembly::Units(units) => {
            assert_eq!(&units[0][..], &sect[..]);
        });
    }

    #[test]
    fn multiple_sections_in_one_packet() {
        let a = pat_section();
        let b = make_section(0, &hex!("0002 c3 00 00  0001 e200"));
        let mut payload = vec![0];
        payload.extend_from_slice(&a);
        payload.extend_from_slice(&b);
        let packets = packetize(0, 0, &payload);
        let mut dec = SectionDecoder::new(Pid::PAT, CrcPolicy::Reject);
        assert_matches!(dec.add(&Packet::new(&packets[0][..])), Reassembly::Units(units) => {
            assert_eq!(units.len(), 2);
            assert_eq!(&units[0][..], &a[..]);
            assert_eq!(&units[1][..], &b[..]);
        });
    }

    #[test]
    fn pointer_field_completes_previous_section() {
        let mut contents = hex!("0001 c1 00 00 e101 f000").to_vec();
        for i in 0..40u16 {
            contents.extend_from_slice(&[0x0f, 0xe2, i as u8, 0xf0, 0x00]);
        }
        let first = make_section(2, &contents);
        let second = make_section(2, &hex!("0001 c3 00 00 e101 f000"));
        // first packet: pointer_field 0, then the first 183 bytes of the first section
        let (head, tail) = first.split_at(Packet::SIZE - 5);
        let mut p1 = vec![0];
        p1.extend_from_slice(head);
        // second packet: pointer_field covering the tail of the first section, then the second
        let mut p2 = vec![tail.len() as u8];
        p2.extend_from_slice(tail);
        p2.extend_from_slice(&second);
        let mut packets = packetize(0x100, 0, &p1);
        packets.append(&mut packetize(0x100, 1, &p2));
        let mut dec = SectionDecoder::new(Pid::new(0x100), CrcPolicy::Reject);
        assert_eq!(dec.add(&Packet::new(&packets[0][..])), Reassembly::Pending);
        assert_matches!(dec.add(&Packet::new(&packets[1][..])), Reassembly::Units(units) => {
            assert_eq!(units.len(), 2);
            assert_eq!(&units[0][..], &first[..]);
            assert_eq!(&units[1][..], &second[..]);
        });
    }

    #[test]
    fn crc_policy() {
        let mut sect = pat_section();
        sect[9] ^= 0x01; // corrupt the body
        let mut payload = vec![0];
        payload.extend_from_slice(&sect);
        let packets = packetize(0, 0, &payload);
        let mut dec = SectionDecoder::new(Pid::PAT, CrcPolicy::Reject);
        assert_eq!(dec.add(&Packet::new(&packets[0][..])), Reassembly::Pending);
        let mut dec = SectionDecoder::new(Pid::PAT, CrcPolicy::Warn);
        assert_matches!(
            dec.add(&Packet::new(&packets[0][..])),
            Reassembly::Units(_)
        );
    }

    #[test]
    fn discontinuity_drops_partial_section() {
        let mut contents = hex!("0001 c1 00 00 e101 f000").to_vec();
        for i in 0..60u16 {
            contents.extend_from_slice(&[0x1b, 0xe1, i as u8, 0xf0, 0x00]);
        }
        let sect = make_section(2, &contents);
        let mut payload = vec![0];
        payload.extend_from_slice(&sect);
        let mut packets = packetize(0x100, 3, &payload);
        packets[1][3] = 0x10 | 9; // skip some counter values
        let mut dec = SectionDecoder::new(Pid::new(0x100), CrcPolicy::Reject);
        assert_eq!(dec.add(&Packet::new(&packets[0][..])), Reassembly::Pending);
        assert_eq!(dec.add(&Packet::new(&packets[1][..])), Reassembly::Pending);
    }

    #[test]
    fn syntax_section() {
        let sect = pat_section();
        let s = SyntaxSection::from_bytes(&sect).unwrap();
        assert_eq!(s.header.table_id, 0);
        assert_eq!(s.syntax.id(), 1);
        assert_eq!(s.syntax.current_next_indicator(), CurrentNext::Current);
        assert_eq!(s.body, &hex!("0001 e100")[..]);
        assert!(s.expect_table_id(0).is_ok());
        assert_matches!(
            s.expect_table_id(2),
            Err(SectionError::UnexpectedTableId { .. })
        );
        assert_matches!(
            SyntaxSection::from_bytes(&sect[..6]),
            Err(SectionError::NotEnoughData { .. })
        );
    }
}
