//! A [`Packet`](./struct.Packet.html) view over the 188 bytes of one transport stream packet, and
//! the small value types derived from its header fields.
//!
//! Nothing here copies the packet data; every accessor masks bits out of the borrowed buffer.

use log::warn;
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt;

/// the different values indicating whether a `Packet`'s `adaptation_field()` and `payload()`
/// methods will return `Some` or `None`.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub enum AdaptationControl {
    /// The `adaptation_control` field uses the value `0b00`, which is not defined by the standard.
    Reserved,
    /// this packet contains a payload, but not an adaptation field
    PayloadOnly,
    /// this packet contains an adaptation field, but not a payload
    AdaptationFieldOnly,
    /// this packet contains both an adaptation field and a payload
    AdaptationFieldAndPayload,
}

impl AdaptationControl {
    #[inline(always)]
    fn from_bits(val: u8) -> AdaptationControl {
        match val & 0b11 {
            0 => AdaptationControl::Reserved,
            1 => AdaptationControl::PayloadOnly,
            2 => AdaptationControl::AdaptationFieldOnly,
            _ => AdaptationControl::AdaptationFieldAndPayload,
        }
    }

    /// True if this variant indicates that the packet will have a payload
    #[inline(always)]
    pub fn has_payload(self) -> bool {
        matches!(
            self,
            AdaptationControl::PayloadOnly | AdaptationControl::AdaptationFieldAndPayload
        )
    }

    /// True if this variant indicates that the packet will have an adaptation field
    #[inline(always)]
    pub fn has_adaptation_field(self) -> bool {
        matches!(
            self,
            AdaptationControl::AdaptationFieldOnly | AdaptationControl::AdaptationFieldAndPayload
        )
    }
}

/// A _Program Clock Reference_ value: a 33-bit, 90kHz `base` together with a 9-bit, 27MHz
/// `extension`.
///
/// At 90kHz the 33-bit base wraps around roughly every 26.5 hours, so any arithmetic comparing
/// two values has to be done modulo `ClockRef::CYCLE`.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ClockRef {
    base: u64,
    extension: u16,
}

impl From<ClockRef> for u64 {
    fn from(pcr: ClockRef) -> u64 {
        pcr.base * 300 + u64::from(pcr.extension)
    }
}

impl fmt::Debug for ClockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "PCR{{{:09x}:{:03x}}}", self.base, self.extension)
    }
}
impl ClockRef {
    /// Number of distinct values of the 33-bit `base` component.
    pub const CYCLE: u64 = 1 << 33;

    /// Panics if `data` is shorter than 6 bytes
    pub fn from_slice(data: &[u8]) -> ClockRef {
        ClockRef {
            base: u64::from(data[0]) << 25
                | u64::from(data[1]) << 17
                | u64::from(data[2]) << 9
                | u64::from(data[3]) << 1
                | u64::from(data[4]) >> 7,
            extension: (u16::from(data[4]) & 0b1) << 8 | u16::from(data[5]),
        }
    }
    /// Panics if the `base` is greater than 2^33-1 or the `extension` is greater than 2^9-1
    pub fn from_parts(base: u64, extension: u16) -> ClockRef {
        assert!(base < Self::CYCLE);
        assert!(extension < (1 << 9));
        ClockRef { base, extension }
    }

    /// the 33-bit, 90kHz component, which shares its timebase with PTS and DTS values
    pub fn base(&self) -> u64 {
        self.base
    }

    /// the 9-bit component, in 300ths of the 90kHz base clock rate
    pub fn extension(&self) -> u16 {
        self.extension
    }
}

/// Problems found reading the adaptation field of a packet
#[derive(Debug, PartialEq, Eq)]
pub enum AdaptationFieldError {
    /// The optional field requested is not flagged as present
    FieldNotPresent,
    /// The field is flagged as present but the adaptation field is too short to hold it
    NotEnoughData,
}

/// The optional header fields that may follow the fixed 4-byte header of a `Packet`.
pub struct AdaptationField<'buf> {
    buf: &'buf [u8],
}

impl<'buf> AdaptationField<'buf> {
    const PCR_SIZE: usize = 6;

    /// Panics if the slice is empty.
    pub fn new(buf: &'buf [u8]) -> AdaptationField<'buf> {
        assert!(!buf.is_empty());
        AdaptationField { buf }
    }

    /// Set by some upstream processor to signal a break in the data.
    pub fn discontinuity_indicator(&self) -> bool {
        self.buf[0] & 0b1000_0000 != 0
    }
    /// Set when the next PES packet in this PID is a good place to start decoding.
    pub fn random_access_indicator(&self) -> bool {
        self.buf[0] & 0b0100_0000 != 0
    }
    fn pcr_flag(&self) -> bool {
        self.buf[0] & 0b1_0000 != 0
    }
    /// Get the _Program Clock Reference_ field,
    /// or `AdaptationFieldError::FieldNotPresent` if absent
    pub fn pcr(&self) -> Result<ClockRef, AdaptationFieldError> {
        if !self.pcr_flag() {
            return Err(AdaptationFieldError::FieldNotPresent);
        }
        let end = 1 + Self::PCR_SIZE;
        if end > self.buf.len() {
            return Err(AdaptationFieldError::NotEnoughData);
        }
        Ok(ClockRef::from_slice(&self.buf[1..end]))
    }
}

impl<'buf> fmt::Debug for AdaptationField<'buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdaptationField")
            .field("discontinuity_indicator", &self.discontinuity_indicator())
            .field("random_access_indicator", &self.random_access_indicator())
            .field("pcr", &self.pcr())
            .finish()
    }
}

/// The 4-bit per-PID counter which increments on every packet carrying a payload, and which lets
/// a receiver notice when packets went missing.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct ContinuityCounter {
    val: u8,
}

impl ContinuityCounter {
    /// Panics if the given value is greater than 15.
    #[inline]
    pub fn new(count: u8) -> ContinuityCounter {
        assert!(count < 0b10000);
        ContinuityCounter { val: count }
    }

    /// Returns this counter's value, which will be between 0 and 15 inclusive.
    #[inline]
    pub fn count(self) -> u8 {
        self.val
    }

    /// true iff this counter is the one expected to come straight after `other`.
    ///
    /// ```rust
    /// # use mpeg2ts_pipeline::packet::ContinuityCounter;
    /// let a = ContinuityCounter::new(0);
    /// let b = ContinuityCounter::new(15);
    /// assert!(a.follows(b));  // after 15, counter wraps around to 0
    /// ```
    #[inline]
    pub fn follows(self, other: ContinuityCounter) -> bool {
        (other.val + 1) & 0b1111 == self.val
    }
}

/// How a packet's continuity counter relates to the previous payload-carrying packet of the same
/// PID, as judged by `ContinuityTracker::check()`.
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum Continuity {
    /// First packet seen, or counter followed on as expected
    Continuous,
    /// Same counter as the last packet; the standard allows one duplicate to be sent
    Duplicate,
    /// Packets were lost (or the stream was spliced without signalling it)
    Discontinuous,
}

/// Per-PID state for checking `ContinuityCounter` values.
#[derive(Default, Debug)]
pub struct ContinuityTracker {
    last: Option<ContinuityCounter>,
}

impl ContinuityTracker {
    /// Packets without a payload do not advance the counter, and always report `Continuous`.
    pub fn check(&mut self, pk: &Packet<'_>) -> Continuity {
        if !pk.adaptation_control().has_payload() {
            return Continuity::Continuous;
        }
        let this = pk.continuity_counter();
        let signalled = pk
            .adaptation_field()
            .map(|af| af.discontinuity_indicator())
            .unwrap_or(false);
        let result = match self.last {
            None => Continuity::Continuous,
            Some(_) if signalled => Continuity::Continuous,
            Some(last) if last == this => Continuity::Duplicate,
            Some(last) if this.follows(last) => Continuity::Continuous,
            Some(_) => Continuity::Discontinuous,
        };
        self.last = Some(this);
        result
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// A Packet Identifier value, between `0x0000` and `0x1fff`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(u16);
impl Pid {
    /// The largest possible PID value, `0x1fff`.
    pub const MAX_VALUE: u16 = 0x1fff;

    /// The total number of distinct PID values, `0x2000`
    pub const PID_COUNT: usize = (Self::MAX_VALUE + 1) as usize;

    /// The Program Association Table is always carried on PID `0`.
    pub const PAT: Pid = Pid::new(0);
    /// Null packets, used to pad a stream up to a constant bitrate.
    pub const STUFFING: Pid = Pid::new(0x1fff);

    /// Panics if the given value is greater than `Pid::MAX_VALUE`.
    pub const fn new(pid: u16) -> Pid {
        assert!(pid <= Self::MAX_VALUE);
        Pid(pid)
    }

    /// Build from the 13 low-order bits of the two given bytes, as laid out in packet headers and
    /// PSI tables.
    #[inline]
    pub fn from_bytes(hi: u8, lo: u8) -> Pid {
        Pid(u16::from(hi & 0b0001_1111) << 8 | u16::from(lo))
    }
}
impl TryFrom<u16> for Pid {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        if value <= Pid::MAX_VALUE {
            Ok(Pid(value))
        } else {
            Err(())
        }
    }
}
impl From<Pid> for u16 {
    #[inline]
    fn from(pid: Pid) -> Self {
        pid.0
    }
}
impl From<Pid> for usize {
    #[inline]
    fn from(pid: Pid) -> Self {
        pid.0 as usize
    }
}
impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "Pid({:04x})", self.0)
    }
}

/// A transport stream `Packet` is a wrapper around a byte slice which allows the bytes to be
/// interpreted as a packet structure per _ISO/IEC 13818-1, Section 2.4.3.3_.
pub struct Packet<'buf> {
    buf: &'buf [u8],
}

const FIXED_HEADER_SIZE: usize = 4;
// when AF present, a 1-byte 'length' field precedes the content,
const ADAPTATION_FIELD_OFFSET: usize = FIXED_HEADER_SIZE + 1;

impl<'buf> Packet<'buf> {
    /// The value `0x47`, which must appear in the first byte of every transport stream packet.
    pub const SYNC_BYTE: u8 = 0x47;

    /// The fixed 188 byte size of a transport stream packet.
    pub const SIZE: usize = 188;

    /// The byte value used to pad out packet payloads and PSI tables.
    pub const STUFFING_BYTE: u8 = 0xff;

    /// returns `true` if the given value is `Packet::SYNC_BYTE`
    #[inline(always)]
    pub fn is_sync_byte(b: u8) -> bool {
        b == Self::SYNC_BYTE
    }

    /// Panics if the buffer size is not exactly `Packet::SIZE` (188) bytes, or if the first
    /// byte value is not equal to `Packet::SYNC_BYTE` (0x47).  The `PacketChunker` only ever
    /// produces buffers meeting both conditions.
    #[inline(always)]
    pub fn new(buf: &'buf [u8]) -> Packet<'buf> {
        assert_eq!(buf.len(), Self::SIZE);
        assert!(Packet::is_sync_byte(buf[0]));
        Packet { buf }
    }

    /// Like `new()`, but returns `None` rather than panicking if the buffer has the wrong size
    /// or does not start with the sync byte.
    #[inline(always)]
    pub fn try_new(buf: &'buf [u8]) -> Option<Packet<'buf>> {
        if buf.len() == Self::SIZE && Packet::is_sync_byte(buf[0]) {
            Some(Packet { buf })
        } else {
            None
        }
    }

    /// *May* have been set if some previous processing of this TS data detected at least
    /// 1 uncorrectable bit error in this TS packet.
    #[inline]
    pub fn transport_error_indicator(&self) -> bool {
        self.buf[1] & 0b1000_0000 != 0
    }

    /// `true` if this packet's payload holds the first byte of a PES packet, or (for PSI) a
    /// `pointer_field` leading to the start of a section.
    #[inline]
    pub fn payload_unit_start_indicator(&self) -> bool {
        self.buf[1] & 0b0100_0000 != 0
    }

    /// The sub-stream to which this packet belongs.
    #[inline]
    pub fn pid(&self) -> Pid {
        Pid::from_bytes(self.buf[1], self.buf[2])
    }

    /// Indicates if `adaptation_field()`, `payload()` or both will return something.
    #[inline]
    pub fn adaptation_control(&self) -> AdaptationControl {
        AdaptationControl::from_bits(self.buf[3] >> 4)
    }

    #[inline]
    pub fn continuity_counter(&self) -> ContinuityCounter {
        ContinuityCounter::new(self.buf[3] & 0b0000_1111)
    }

    fn adaptation_field_length(&self) -> usize {
        self.buf[4] as usize
    }

    /// An `AdaptationField` contains additional packet headers that may be present in the packet.
    pub fn adaptation_field(&self) -> Option<AdaptationField<'buf>> {
        match self.adaptation_control() {
            AdaptationControl::Reserved | AdaptationControl::PayloadOnly => None,
            AdaptationControl::AdaptationFieldOnly => {
                let len = self.adaptation_field_length();
                if len != (Self::SIZE - ADAPTATION_FIELD_OFFSET) {
                    warn!(
                        "invalid adaptation_field_length for AdaptationFieldOnly: {}",
                        len
                    );
                    return None;
                }
                Some(self.mk_af(len))
            }
            AdaptationControl::AdaptationFieldAndPayload => {
                let len = self.adaptation_field_length();
                if len > 182 {
                    warn!(
                        "invalid adaptation_field_length for AdaptationFieldAndPayload: {}",
                        len
                    );
                    return None;
                }
                if len == 0 {
                    return None;
                }
                Some(self.mk_af(len))
            }
        }
    }

    fn mk_af(&self, len: usize) -> AdaptationField<'buf> {
        AdaptationField::new(&self.buf[ADAPTATION_FIELD_OFFSET..ADAPTATION_FIELD_OFFSET + len])
    }

    /// Shorthand for the PCR carried in the adaptation field, if any.
    pub fn pcr(&self) -> Option<ClockRef> {
        self.adaptation_field().and_then(|af| af.pcr().ok())
    }

    /// The data following the packet headers, or `None` if `adaptation_control()` says there is
    /// no payload or if the adaptation field claims to fill the whole packet.  A returned
    /// payload is never an empty slice.
    #[inline(always)]
    pub fn payload(&self) -> Option<&'buf [u8]> {
        if !self.adaptation_control().has_payload() {
            return None;
        }
        let offset = self.content_offset();
        match offset.cmp(&self.buf.len()) {
            Ordering::Equal => {
                warn!("no payload data present");
                None
            }
            Ordering::Greater => {
                warn!(
                    "adaptation_field_length {} too large",
                    self.adaptation_field_length()
                );
                None
            }
            Ordering::Less => Some(&self.buf[offset..]),
        }
    }

    /// borrow a reference to the underlying buffer of this packet
    pub fn buffer(&self) -> &'buf [u8] {
        self.buf
    }

    #[inline]
    fn content_offset(&self) -> usize {
        if self.adaptation_control().has_adaptation_field() {
            ADAPTATION_FIELD_OFFSET + self.adaptation_field_length()
        } else {
            FIXED_HEADER_SIZE
        }
    }
}

impl<'buf> fmt::Debug for Packet<'buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("pid", &self.pid())
            .field(
                "payload_unit_start_indicator",
                &self.payload_unit_start_indicator(),
            )
            .field("continuity_counter", &self.continuity_counter().count())
            .field("adaptation_control", &self.adaptation_control())
            .finish()
    }
}
