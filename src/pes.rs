//! Support for Packetised Elementary Stream syntax within Transport Stream packet payloads.
//!
//! Elementary streams are split into 'elementary stream packets', which are then further split into
//! the payloads of transport stream packets.  [`PesDecoder`](struct.PesDecoder.html) collects
//! the pieces back together, and [`PesPacket`](struct.PesPacket.html) parses the result.

use crate::accumulator::{ChunkAccumulator, Reassembly};
use crate::packet;
use bytes::Bytes;
use log::warn;
use std::{fmt, num};

/// Reassembles the PES packets carried in the transport stream packets of a single PID.
///
/// A bounded PES packet is produced as soon as its last byte arrives.  An unbounded one (with
/// `PES_packet_length` of `0`) is produced when the next packet with
/// `payload_unit_start_indicator` shows that it has ended, or by `flush()`.
pub struct PesDecoder {
    pid: packet::Pid,
    acc: Option<ChunkAccumulator>,
    continuity: packet::ContinuityTracker,
}

impl PesDecoder {
    pub fn new(pid: packet::Pid) -> PesDecoder {
        PesDecoder {
            pid,
            acc: None,
            continuity: packet::ContinuityTracker::default(),
        }
    }

    pub fn pid(&self) -> packet::Pid {
        self.pid
    }

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
                    warn!("{:?}: continuity error, dropping partial PES packet", self.pid);
                }
            }
            packet::Continuity::Continuous => (),
        }
        let mut units = vec![];
        if pk.payload_unit_start_indicator() {
            if let Some(acc) = self.acc.take() {
                if acc.is_unbounded() {
                    self.emit(acc, &mut units);
                } else {
                    warn!(
                        "{:?}: PES packet incomplete at {} of {} bytes when next packet started",
                        self.pid,
                        acc.len(),
                        acc.expected()
                    );
                }
            }
            if let Some(payload) = pk.payload() {
                let expected = PesPacket::expected_len(payload);
                let mut acc = ChunkAccumulator::new(expected);
                acc.push(payload);
                self.acc = Some(acc);
            }
        } else if let Some(acc) = self.acc.as_mut() {
            if let Some(payload) = pk.payload() {
                acc.push(payload);
            }
        }
        if let Some(acc) = self.acc.take() {
            if acc.is_full() {
                self.emit(acc, &mut units);
            } else if acc.is_over() {
                warn!(
                    "{:?}: PES packet overflowed to {} bytes, expected {}",
                    self.pid,
                    acc.len(),
                    acc.expected()
                );
            } else {
                self.acc = Some(acc);
            }
        }
        Reassembly::from_units(units)
    }

    fn emit(&self, acc: ChunkAccumulator, units: &mut Vec<Bytes>) {
        let data = acc.concat();
        if PesPacket::has_start_code_prefix(&data) {
            units.push(data);
        } else {
            warn!(
                "{:?}: dropping {} byte PES packet without packet_start_code_prefix",
                self.pid,
                data.len()
            );
        }
    }

    /// Produce any unbounded PES packet still being collected, at the end of the stream.
    pub fn flush(&mut self) -> Option<Bytes> {
        let acc = self.acc.take()?;
        if !acc.is_unbounded() {
            return None;
        }
        let mut units = vec![];
        self.emit(acc, &mut units);
        units.pop()
    }

    pub fn reset(&mut self) {
        self.acc = None;
        self.continuity.reset();
    }
}

/// Type for the length of a PES packet
#[derive(Debug, PartialEq, Eq)]
pub enum PesLength {
    /// The PES packet continues until the next TS packet that has `payload_unit_start_indicator`
    /// set.  ISO/IEC 13818-1 only allows this for video streams (but really, it is needed in
    /// case the size of the pes packet will exceed the 16 bits of this field -- around 65k bytes).
    Unbounded,
    /// The number of bytes following the `PES_packet_length` field.
    Bounded(num::NonZeroU16),
}

/// Values which may be returned by
/// [`PesPacket::stream_id()`](struct.PesPacket.html#method.stream_id) to identify the kind of
/// content within the Packetized Elementary Stream.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamId {
    /// `program_stream_map`
    ProgramStreamMap,
    /// `private_stream_1`
    PrivateStream1,
    /// `padding_stream`
    PaddingStream,
    /// `private_stream_2`
    PrivateStream2,
    /// ISO/IEC 13818-3 or ISO/IEC 11172-3 or ISO/IEC 13818-7 or ISO/IEC 14496-3 audio stream
    Audio(u8),
    /// Rec. ITU-T H.262 | ISO/IEC 13818-2, ISO/IEC 11172-2, ISO/IEC 14496-2, Rec. ITU-T H.264 |
    /// ISO/IEC 14496-10 or Rec. ITU-T H.265 | ISO/IEC 23008-2 video stream
    Video(u8),
    /// `ECM_stream`
    EcmStream,
    /// `EMM_stream`
    EmmStream,
    /// Rec. ITU-T H.222.0 | ISO/IEC 13818-1 Annex B or ISO/IEC 13818-6_DSMCC_stream
    DsmCc,
    /// Rec. ITU-T H.222.1 type E
    H2221TypeE,
    /// metadata stream
    MetadataStream,
    /// `program_stream_directory`
    ProgramStreamDirectory,
    /// Any other stream_id value
    Other(u8),
}
impl StreamId {
    /// `false` for the stream types whose PES packets have no optional header (and so no
    /// timestamps), just payload following `PES_packet_length`.
    pub fn has_optional_header(&self) -> bool {
        !matches!(
            self,
            StreamId::ProgramStreamMap
                | StreamId::PaddingStream
                | StreamId::PrivateStream2
                | StreamId::EcmStream
                | StreamId::EmmStream
                | StreamId::ProgramStreamDirectory
                | StreamId::DsmCc
                | StreamId::H2221TypeE
        )
    }
}
impl From<u8> for StreamId {
    fn from(v: u8) -> Self {
        match v {
            0b1011_1100 => StreamId::ProgramStreamMap,
            0b1011_1101 => StreamId::PrivateStream1,
            0b1011_1110 => StreamId::PaddingStream,
            0b1011_1111 => StreamId::PrivateStream2,
            0b1100_0000..=0b1101_1111 => StreamId::Audio(v & 0b0001_1111),
            0b1110_0000..=0b1110_1111 => StreamId::Video(v & 0b0000_1111),
            0b1111_0000 => StreamId::EcmStream,
            0b1111_0001 => StreamId::EmmStream,
            0b1111_0010 => StreamId::DsmCc,
            0b1111_1000 => StreamId::H2221TypeE,
            0b1111_1100 => StreamId::MetadataStream,
            0b1111_1111 => StreamId::ProgramStreamDirectory,
            _ => StreamId::Other(v),
        }
    }
}

/// Errors which may be encountered while processing PES data.
#[derive(Debug, PartialEq, Eq)]
pub enum PesError {
    /// The value of an optional field was requested, but the field is not actually present in the
    /// given PES data
    FieldNotPresent,
    /// The `pts_dts_flags` field of the PES packet signals that DTS is present and PTS is not,
    /// which not a valid combination
    PtsDtsFlagsInvalid,
    /// There is not enough data in the buffer to hold the expected syntax element
    NotEnoughData {
        /// the number of bytes required to hold the requested syntax element
        requested: usize,
        /// the number of bytes actually remaining in the buffer
        available: usize,
    },
    /// The first three bytes were not `00 00 01`
    NoStartCodePrefix,
    /// The '10' bits expected at the start of the optional header were missing
    CheckBitsInvalid(u8),
    Timestamp(TimestampError),
}
impl From<TimestampError> for PesError {
    fn from(e: TimestampError) -> Self {
        PesError::Timestamp(e)
    }
}

/// A complete PES packet, as produced by a `PesDecoder`.
///
/// ```text
/// 00 00 01 | stream_id | PES_packet_length (2) | 10.. flags (2) | PES_header_data_length | ...
/// ```
pub struct PesPacket<'buf> {
    buf: &'buf [u8],
}
impl<'buf> PesPacket<'buf> {
    const FIXED_HEADER_SIZE: usize = 6;
    /// size of the fixed header plus the three bytes at the start of the optional header
    const OPTIONAL_HEADER_START: usize = 9;
    const TIMESTAMP_SIZE: usize = 5;

    pub fn from_bytes(buf: &'buf [u8]) -> Result<PesPacket<'buf>, PesError> {
        if buf.len() < Self::FIXED_HEADER_SIZE {
            return Err(PesError::NotEnoughData {
                requested: Self::FIXED_HEADER_SIZE,
                available: buf.len(),
            });
        }
        if !Self::has_start_code_prefix(buf) {
            return Err(PesError::NoStartCodePrefix);
        }
        let pes = PesPacket { buf };
        if pes.stream_id().has_optional_header() {
            if buf.len() < Self::OPTIONAL_HEADER_START {
                return Err(PesError::NotEnoughData {
                    requested: Self::OPTIONAL_HEADER_START,
                    available: buf.len(),
                });
            }
            let check_bits = buf[6] >> 6;
            if check_bits != 0b10 {
                return Err(PesError::CheckBitsInvalid(check_bits));
            }
            let header_end = Self::OPTIONAL_HEADER_START + pes.pes_header_data_length();
            if header_end > buf.len() {
                return Err(PesError::NotEnoughData {
                    requested: header_end,
                    available: buf.len(),
                });
            }
        }
        Ok(pes)
    }

    fn has_start_code_prefix(buf: &[u8]) -> bool {
        buf.len() >= 3 && buf[0] == 0 && buf[1] == 0 && buf[2] == 1
    }

    /// Total size of the PES packet starting in the given payload, or `0` if unbounded or if the
    /// header is too short to tell.
    fn expected_len(payload: &[u8]) -> usize {
        if payload.len() < Self::FIXED_HEADER_SIZE {
            return 0;
        }
        let len = usize::from(payload[4]) << 8 | usize::from(payload[5]);
        if len == 0 {
            0
        } else {
            Self::FIXED_HEADER_SIZE + len
        }
    }

    /// Indicator of the type of stream per _ISO/IEC 13818-1_, _Table 2-18_.
    pub fn stream_id(&self) -> StreamId {
        self.buf[3].into()
    }

    /// The value of the header's `PES_packet_length` field.
    pub fn pes_packet_length(&self) -> PesLength {
        let len = u16::from(self.buf[4]) << 8 | u16::from(self.buf[5]);
        match num::NonZeroU16::new(len) {
            None => PesLength::Unbounded,
            Some(l) => PesLength::Bounded(l),
        }
    }

    pub fn has_optional_header(&self) -> bool {
        self.stream_id().has_optional_header()
    }

    fn pts_dts_flags(&self) -> u8 {
        self.buf[7] >> 6
    }

    fn pes_header_data_length(&self) -> usize {
        self.buf[8] as usize
    }

    fn header_slice(&self, from: usize, to: usize) -> Result<&'buf [u8], PesError> {
        let header_end = Self::OPTIONAL_HEADER_START + self.pes_header_data_length();
        if to > header_end {
            Err(PesError::NotEnoughData {
                requested: to,
                available: header_end,
            })
        } else {
            Ok(&self.buf[from..to])
        }
    }

    /// Returns the timestamps present in this PES header.
    ///
    /// If no timestamp fields are present, then `Err(PesError::FieldNotPresent)` is produced.
    ///
    /// If the value of the _pts_dts_flags_ field in the header is invalid then
    /// `Err(PesError::PtsDtsFlagsInvalid)` is produced.
    pub fn pts_dts(&self) -> Result<PtsDts, PesError> {
        if !self.has_optional_header() {
            return Err(PesError::FieldNotPresent);
        }
        let start = Self::OPTIONAL_HEADER_START;
        match self.pts_dts_flags() {
            0b00 => Err(PesError::FieldNotPresent),
            0b01 => Err(PesError::PtsDtsFlagsInvalid),
            0b10 => self
                .header_slice(start, start + Self::TIMESTAMP_SIZE)
                .map(|s| PtsDts::PtsOnly(Timestamp::from_pts_bytes(s))),
            _ => self
                .header_slice(start, start + Self::TIMESTAMP_SIZE * 2)
                .map(|s| PtsDts::Both {
                    pts: Timestamp::from_bytes(&s[..Self::TIMESTAMP_SIZE]),
                    dts: Timestamp::from_dts_bytes(&s[Self::TIMESTAMP_SIZE..]),
                }),
        }
    }

    pub fn pts(&self) -> Result<Timestamp, PesError> {
        match self.pts_dts()? {
            PtsDts::PtsOnly(pts) => Ok(pts?),
            PtsDts::Both { pts, .. } => Ok(pts?),
        }
    }

    /// The decode timestamp, falling back to the presentation timestamp when no DTS is given
    pub fn dts(&self) -> Result<Timestamp, PesError> {
        match self.pts_dts()? {
            PtsDts::PtsOnly(pts) => Ok(pts?),
            PtsDts::Both { dts, .. } => Ok(dts?),
        }
    }

    /// The elementary stream data following the header
    pub fn payload(&self) -> &'buf [u8] {
        let start = if self.has_optional_header() {
            Self::OPTIONAL_HEADER_START + self.pes_header_data_length()
        } else {
            Self::FIXED_HEADER_SIZE
        };
        let end = match self.pes_packet_length() {
            PesLength::Bounded(len) => {
                (Self::FIXED_HEADER_SIZE + usize::from(len.get())).min(self.buf.len())
            }
            PesLength::Unbounded => self.buf.len(),
        };
        &self.buf[start.min(end)..end]
    }
}
impl<'buf> fmt::Debug for PesPacket<'buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("PesPacket")
            .field("stream_id", &self.stream_id())
            .field("pes_packet_length", &self.pes_packet_length())
            .field("pts_dts", &self.pts_dts())
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

/// Detail about the formatting problem which prevented a [`Timestamp`](struct.Timestamp.html)
/// value being parsed.
#[derive(PartialEq, Eq, Debug)]
pub enum TimestampError {
    /// Parsing the timestamp failed because the 'prefix-bit' values within the timestamp did not
    /// have the expected values
    IncorrectPrefixBits {
        /// expected prefix-bits for this timestamp
        expected: u8,
        /// the actual, incorrect bits that were present
        actual: u8,
    },
    /// Parsing the timestamp failed because a 'marker-bit' value within the timestamp did not
    /// have the expected value
    MarkerBitNotSet {
        /// the bit-index of the bit which should have been 1, but was found to be 0
        bit_number: u8,
    },
}

/// A 33-bit Elementary Stream timestamp, used to represent PTS and DTS values which may appear in
/// an Elementary Stream header.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct Timestamp {
    val: u64,
}
impl Timestamp {
    /// The largest representable timestamp value before the timestamp wraps back around to zero.
    pub const MAX: Timestamp = Timestamp { val: (1 << 33) - 1 };

    /// 90kHz timebase in which PTS and DTS values are measured.
    pub const TIMEBASE: u64 = 90_000;

    /// Parse a Presentation Time Stamp value from the 5 bytes at the start of the given slice
    ///
    /// Panics if fewer than 5 bytes given
    pub fn from_pts_bytes(buf: &[u8]) -> Result<Timestamp, TimestampError> {
        Timestamp::check_prefix(buf, 0b0010)?;
        Timestamp::from_bytes(buf)
    }
    /// Parse a Decode Time Stamp value from the 5 bytes at the start of the given slice
    ///
    /// Panics if fewer than 5 bytes given
    pub fn from_dts_bytes(buf: &[u8]) -> Result<Timestamp, TimestampError> {
        Timestamp::check_prefix(buf, 0b0001)?;
        Timestamp::from_bytes(buf)
    }
    fn check_prefix(buf: &[u8], expected: u8) -> Result<(), TimestampError> {
        let actual = buf[0] >> 4;
        if actual == expected {
            Ok(())
        } else {
            Err(TimestampError::IncorrectPrefixBits { expected, actual })
        }
    }
    fn check_marker_bit(buf: &[u8], bit_number: u8) -> Result<(), TimestampError> {
        let byte_index = bit_number / 8;
        let bit_index = bit_number % 8;
        let bit_mask = 1 << (7 - bit_index);
        if buf[byte_index as usize] & bit_mask != 0 {
            Ok(())
        } else {
            Err(TimestampError::MarkerBitNotSet { bit_number })
        }
    }
    /// Parse a Time Stamp value from the 5 bytes at the start of the given slice, without checking
    /// the 4-bit prefix for any particular value (the `from_pts_bytes()` and `from_dts_bytes()`
    /// methods, in contrast, do check that the expected prefix bits are present).
    ///
    /// Panics if fewer than 5 bytes given
    pub fn from_bytes(buf: &[u8]) -> Result<Timestamp, TimestampError> {
        Timestamp::check_marker_bit(buf, 7)?;
        Timestamp::check_marker_bit(buf, 23)?;
        Timestamp::check_marker_bit(buf, 39)?;
        Ok(Timestamp {
            val: (u64::from(buf[0] & 0b0000_1110) << 29)
                | u64::from(buf[1]) << 22
                | (u64::from(buf[2] & 0b1111_1110) << 14)
                | u64::from(buf[3]) << 7
                | u64::from(buf[4]) >> 1,
        })
    }
    /// Panics if the given val is greater than 2^33-1
    pub fn from_u64(val: u64) -> Timestamp {
        assert!(val <= Self::MAX.val);
        Timestamp { val }
    }
    /// produces the timestamp's value (only the low 33 bits are used)
    pub fn value(self) -> u64 {
        self.val
    }

    /// Ticks from `origin` until `self`, assuming `self` is later, so that a timestamp which has
    /// wrapped around past zero still yields a small positive offset.
    pub fn wrapping_offset_from(self, origin: Timestamp) -> u64 {
        (self.val + (Self::MAX.val + 1) - origin.val) & Self::MAX.val
    }

    /// `wrapping_offset_from()` converted to seconds
    pub fn seconds_since(self, origin: Timestamp) -> f64 {
        self.wrapping_offset_from(origin) as f64 / Self::TIMEBASE as f64
    }

    /// returns true if timestamps are likely to have wrapped around since `other`, given a curent
    /// timestamp of `self`, and given the two timestamp values were taken no more than about
    /// _13.3 hours_ apart (i.e. no more than half the 26.5-ish hours it takes for the wrap around
    /// to occur).
    pub fn likely_wrapped_since(self, other: Self) -> bool {
        other.val > self.val && other.val - self.val > Self::MAX.val / 2
    }
}

/// Contains some combination of PTS and DTS timestamps.
///
/// The timestamps will be wrapped in `Result`, in case an error in the stored timestamp syntax
/// means that it can't be decoded.
#[derive(PartialEq, Eq, Debug)]
pub enum PtsDts {
    /// Only Presentation Time Stamp is present
    PtsOnly(Result<Timestamp, TimestampError>),
    /// Both Presentation and Decode Time Stamps are present
    Both {
        /// Presentation Time Stamp
        pts: Result<Timestamp, TimestampError>,
        /// Decode Time Stamp
        dts: Result<Timestamp, TimestampError>,
    },
}
