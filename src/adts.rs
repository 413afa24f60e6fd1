//! ADTS (_Audio Data Transport Stream_) framing of AAC audio, per ISO/IEC 13818-7.
//!
//! Each frame starts with a 7 byte header (9 with CRC) giving the sampling frequency, which is
//! what's needed to know how much playback time an AAC access unit represents.

use std::fmt;

#[derive(Debug, PartialEq, Eq)]
pub enum AdtsError {
    NotEnoughData { expected: usize, actual: usize },
    /// The 12-bit `0xFFF` syncword was not found at the expected position
    BadSyncword,
    /// `frame_length` smaller than the header itself
    BadFrameLength(usize),
}

/// Sampling rates in Hz, indexed by `sampling_frequency_index`.
const SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Number of PCM samples per channel in one AAC frame.
pub const SAMPLES_PER_FRAME: u32 = 1024;

/// Sample rate assumed when a header can't be read, or its `sampling_frequency_index` is reserved.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// A view over the fixed and variable ADTS header fields at the start of a frame.
#[derive(Clone, Copy)]
pub struct AdtsHeader<'buf> {
    buf: &'buf [u8],
}

impl<'buf> AdtsHeader<'buf> {
    const SIZE: usize = 7;

    pub fn from_bytes(buf: &'buf [u8]) -> Result<AdtsHeader<'buf>, AdtsError> {
        if buf.len() < Self::SIZE {
            return Err(AdtsError::NotEnoughData {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        if buf[0] != 0xff || buf[1] & 0xf0 != 0xf0 {
            return Err(AdtsError::BadSyncword);
        }
        let header = AdtsHeader { buf };
        if header.frame_length() < header.header_length() {
            return Err(AdtsError::BadFrameLength(header.frame_length()));
        }
        Ok(header)
    }

    pub fn protection_absent(&self) -> bool {
        self.buf[1] & 1 != 0
    }
    /// `profile_ObjectType`; add 1 for the MPEG-4 Audio Object Type (2 = AAC LC)
    pub fn profile(&self) -> u8 {
        self.buf[2] >> 6
    }
    pub fn sampling_frequency_index(&self) -> u8 {
        (self.buf[2] >> 2) & 0b1111
    }
    /// `None` for the reserved and explicit-frequency index values
    pub fn sample_rate(&self) -> Option<u32> {
        SAMPLE_RATES
            .get(self.sampling_frequency_index() as usize)
            .copied()
    }
    pub fn channel_configuration(&self) -> u8 {
        (self.buf[2] & 1) << 2 | self.buf[3] >> 6
    }
    /// Channel count implied by `channel_configuration`; configuration `7` is 7.1 surround
    pub fn channel_count(&self) -> u8 {
        match self.channel_configuration() {
            7 => 8,
            c => c,
        }
    }
    /// Size of the whole frame, header included
    pub fn frame_length(&self) -> usize {
        (usize::from(self.buf[3] & 0b11) << 11)
            | (usize::from(self.buf[4]) << 3)
            | (usize::from(self.buf[5]) >> 5)
    }
    pub fn header_length(&self) -> usize {
        if self.protection_absent() {
            7
        } else {
            9
        }
    }
    pub fn number_of_raw_data_blocks(&self) -> u8 {
        (self.buf[6] & 0b11) + 1
    }

    /// Playback time of this frame in seconds, assuming 48kHz if the rate isn't known
    pub fn duration(&self) -> f64 {
        let rate = self.sample_rate().unwrap_or(DEFAULT_SAMPLE_RATE);
        f64::from(SAMPLES_PER_FRAME * u32::from(self.number_of_raw_data_blocks())) / f64::from(rate)
    }

    /// The RFC 6381 codec parameter for this stream, e.g. `mp4a.40.2`
    pub fn codec_string(&self) -> String {
        format!("mp4a.40.{}", self.profile() + 1)
    }
}
impl<'buf> fmt::Debug for AdtsHeader<'buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("AdtsHeader")
            .field("profile", &self.profile())
            .field("sample_rate", &self.sample_rate())
            .field("channel_configuration", &self.channel_configuration())
            .field("frame_length", &self.frame_length())
            .finish()
    }
}

/// Iterates over the ADTS frames packed into a PES payload, stopping at the first one which is
/// malformed or truncated.
pub struct AdtsFrames<'buf> {
    rest: &'buf [u8],
}
impl<'buf> AdtsFrames<'buf> {
    pub fn new(buf: &'buf [u8]) -> AdtsFrames<'buf> {
        AdtsFrames { rest: buf }
    }
}
impl<'buf> Iterator for AdtsFrames<'buf> {
    type Item = AdtsHeader<'buf>;

    fn next(&mut self) -> Option<Self::Item> {
        let header = AdtsHeader::from_bytes(self.rest).ok()?;
        let len = header.frame_length();
        if len > self.rest.len() {
            self.rest = &self.rest[0..0];
            return None;
        }
        self.rest = &self.rest[len..];
        Some(AdtsHeader {
            buf: &header.buf[..len],
        })
    }
}

/// Total playback time in seconds of all ADTS frames in the buffer.
///
/// A buffer that doesn't start with a valid header is treated as a single 48kHz frame.
pub fn duration(buf: &[u8]) -> f64 {
    let mut frames = AdtsFrames::new(buf).peekable();
    if frames.peek().is_none() {
        return f64::from(SAMPLES_PER_FRAME) / f64::from(DEFAULT_SAMPLE_RATE);
    }
    frames.map(|h| h.duration()).sum()
}
