//! Timestamped access units, and the events carrying them between pipeline stages.

use crate::pes::Timestamp;
use bytes::Bytes;
use std::fmt;

/// The kinds of elementary stream the demultiplexer extracts.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
pub enum StreamKind {
    H264,
    Aac,
    Mpeg2Video,
    Id3,
    Caption,
}
impl StreamKind {
    /// The kinds that are paced by a buffering strategy and passed to a decoder.
    pub const MEDIA: [StreamKind; 3] = [StreamKind::H264, StreamKind::Aac, StreamKind::Mpeg2Video];

    pub fn is_video(self) -> bool {
        matches!(self, StreamKind::H264 | StreamKind::Mpeg2Video)
    }

    pub fn is_media(self) -> bool {
        Self::MEDIA.contains(&self)
    }
}

/// One complete PES payload from an elementary stream, with its timing.
#[derive(Clone, PartialEq)]
pub struct AccessUnit {
    /// The first PCR seen, which all timestamps are relative to
    pub init_pts: Timestamp,
    pub pts: Timestamp,
    /// Equal to `pts` when the PES header carries no DTS
    pub dts: Timestamp,
    /// Presentation time in seconds since `init_pts`
    pub timestamp: f64,
    /// Decode time in seconds since `init_pts`
    pub dts_timestamp: f64,
    pub data: Bytes,
    /// For video, whether decoding can start from this unit; always `false` for other kinds
    pub has_idr: bool,
}
impl AccessUnit {
    pub fn new(init_pts: Timestamp, pts: Timestamp, dts: Timestamp, data: Bytes) -> AccessUnit {
        AccessUnit {
            init_pts,
            pts,
            dts,
            timestamp: pts.seconds_since(init_pts),
            dts_timestamp: dts.seconds_since(init_pts),
            data,
            has_idr: false,
        }
    }
}
impl fmt::Debug for AccessUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.debug_struct("AccessUnit")
            .field("pts", &self.pts.value())
            .field("timestamp", &self.timestamp)
            .field("dts_timestamp", &self.dts_timestamp)
            .field("len", &self.data.len())
            .field("has_idr", &self.has_idr)
            .finish()
    }
}

/// An access unit produced by the demultiplexer.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    H264(AccessUnit),
    Aac(AccessUnit),
    Mpeg2Video(AccessUnit),
    Id3(AccessUnit),
    Caption(AccessUnit),
}
impl Parsed {
    pub fn new(kind: StreamKind, unit: AccessUnit) -> Parsed {
        match kind {
            StreamKind::H264 => Parsed::H264(unit),
            StreamKind::Aac => Parsed::Aac(unit),
            StreamKind::Mpeg2Video => Parsed::Mpeg2Video(unit),
            StreamKind::Id3 => Parsed::Id3(unit),
            StreamKind::Caption => Parsed::Caption(unit),
        }
    }
    pub fn kind(&self) -> StreamKind {
        match self {
            Parsed::H264(_) => StreamKind::H264,
            Parsed::Aac(_) => StreamKind::Aac,
            Parsed::Mpeg2Video(_) => StreamKind::Mpeg2Video,
            Parsed::Id3(_) => StreamKind::Id3,
            Parsed::Caption(_) => StreamKind::Caption,
        }
    }
    pub fn unit(&self) -> &AccessUnit {
        match self {
            Parsed::H264(u)
            | Parsed::Aac(u)
            | Parsed::Mpeg2Video(u)
            | Parsed::Id3(u)
            | Parsed::Caption(u) => u,
        }
    }
    pub fn into_unit(self) -> AccessUnit {
        match self {
            Parsed::H264(u)
            | Parsed::Aac(u)
            | Parsed::Mpeg2Video(u)
            | Parsed::Id3(u)
            | Parsed::Caption(u) => u,
        }
    }
}

/// An access unit released by a buffering strategy, to be decoded now.
#[derive(Debug, Clone, PartialEq)]
pub enum Ready {
    H264(AccessUnit),
    Aac(AccessUnit),
    Mpeg2Video(AccessUnit),
}
impl Ready {
    /// `None` for the kinds which are not decoded
    pub fn new(kind: StreamKind, unit: AccessUnit) -> Option<Ready> {
        match kind {
            StreamKind::H264 => Some(Ready::H264(unit)),
            StreamKind::Aac => Some(Ready::Aac(unit)),
            StreamKind::Mpeg2Video => Some(Ready::Mpeg2Video(unit)),
            StreamKind::Id3 | StreamKind::Caption => None,
        }
    }
    pub fn kind(&self) -> StreamKind {
        match self {
            Ready::H264(_) => StreamKind::H264,
            Ready::Aac(_) => StreamKind::Aac,
            Ready::Mpeg2Video(_) => StreamKind::Mpeg2Video,
        }
    }
    pub fn unit(&self) -> &AccessUnit {
        match self {
            Ready::H264(u) | Ready::Aac(u) | Ready::Mpeg2Video(u) => u,
        }
    }
    pub fn into_unit(self) -> AccessUnit {
        match self {
            Ready::H264(u) | Ready::Aac(u) | Ready::Mpeg2Video(u) => u,
        }
    }
}
