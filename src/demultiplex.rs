//! Demultiplexes the packets of a Transport Stream into timestamped access units.
//!
//! The `Demuxer` starts out knowing only the PAT PID.  The first program found in the PAT gives
//! the PID of the PMT, and the PMT in turn gives the PIDs of the elementary streams and of the
//! PCR.  The first PCR seen becomes the time origin for every access unit subsequently produced.
//!
//! Only the first program of a multiplex is extracted, and only the first elementary stream of
//! each [`StreamKind`](../unit/enum.StreamKind.html).

use crate::accumulator::Reassembly;
use crate::h264;
use crate::mpeg2video;
use crate::packet;
use crate::pes;
use crate::psi;
use crate::psi::pat::PatSection;
use crate::psi::pmt::{PmtSection, StreamInfo};
use crate::unit::{AccessUnit, Parsed, StreamKind};
use crate::StreamType;
use bytes::Bytes;
use fixedbitset::FixedBitSet;
use log::{debug, warn};
use serde::Deserialize;

/// Receives the access units produced by a `Demuxer`, one method per kind of elementary stream.
///
/// All methods do nothing by default, so implementations only need to handle the kinds they are
/// interested in.
pub trait DemuxEvents {
    fn h264(&mut self, _unit: AccessUnit) {}
    fn aac(&mut self, _unit: AccessUnit) {}
    fn mpeg2video(&mut self, _unit: AccessUnit) {}
    fn id3(&mut self, _unit: AccessUnit) {}
    fn caption(&mut self, _unit: AccessUnit) {}
}

/// Collects every event, in the order produced.
impl DemuxEvents for Vec<Parsed> {
    fn h264(&mut self, unit: AccessUnit) {
        self.push(Parsed::H264(unit));
    }
    fn aac(&mut self, unit: AccessUnit) {
        self.push(Parsed::Aac(unit));
    }
    fn mpeg2video(&mut self, unit: AccessUnit) {
        self.push(Parsed::Mpeg2Video(unit));
    }
    fn id3(&mut self, unit: AccessUnit) {
        self.push(Parsed::Id3(unit));
    }
    fn caption(&mut self, unit: AccessUnit) {
        self.push(Parsed::Caption(unit));
    }
}

fn dispatch<E: DemuxEvents>(events: &mut E, kind: StreamKind, unit: AccessUnit) {
    match kind {
        StreamKind::H264 => events.h264(unit),
        StreamKind::Aac => events.aac(unit),
        StreamKind::Mpeg2Video => events.mpeg2video(unit),
        StreamKind::Id3 => events.id3(unit),
        StreamKind::Caption => events.caption(unit),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DemuxConfig {
    pub crc_policy: psi::CrcPolicy,
}

/// Maps a PMT entry to the kind of elementary stream it carries, if it is one we extract.
fn stream_kind(stream_info: &StreamInfo<'_>) -> Option<StreamKind> {
    match stream_info.stream_type() {
        StreamType::H264 => Some(StreamKind::H264),
        StreamType::Adts => Some(StreamKind::Aac),
        StreamType::H262 => Some(StreamKind::Mpeg2Video),
        StreamType::MetadataInPes => Some(StreamKind::Id3),
        StreamType::H2220PesPrivateData if stream_info.has_caption_component() => {
            Some(StreamKind::Caption)
        }
        _ => None,
    }
}

struct ElementaryStream {
    kind: StreamKind,
    decoder: pes::PesDecoder,
}

/// Routes transport stream packets by PID to the PSI and PES decoders, producing `AccessUnit`
/// values via a [`DemuxEvents`](trait.DemuxEvents.html) implementation.
pub struct Demuxer {
    crc_policy: psi::CrcPolicy,
    pat: psi::SectionDecoder,
    pmt: Option<psi::SectionDecoder>,
    streams: Vec<ElementaryStream>,
    /// PIDs already handled by some decoder
    claimed: FixedBitSet,
    pcr_pid: Option<packet::Pid>,
    init_pts: Option<pes::Timestamp>,
    first_aac: bool,
}

impl Demuxer {
    pub fn new(config: &DemuxConfig) -> Demuxer {
        let mut claimed = FixedBitSet::with_capacity(packet::Pid::PID_COUNT);
        claimed.insert(usize::from(packet::Pid::PAT));
        Demuxer {
            crc_policy: config.crc_policy,
            pat: psi::SectionDecoder::new(packet::Pid::PAT, config.crc_policy),
            pmt: None,
            streams: Vec::new(),
            claimed,
            pcr_pid: None,
            init_pts: None,
            first_aac: true,
        }
    }

    /// The PID of the PCR, once a PMT has been seen.
    pub fn pcr_pid(&self) -> Option<packet::Pid> {
        self.pcr_pid
    }

    /// The PCR value that timestamps are measured from, once one has been seen.
    pub fn init_pts(&self) -> Option<pes::Timestamp> {
        self.init_pts
    }

    /// The elementary streams discovered so far, and their PIDs.
    pub fn streams(&self) -> impl Iterator<Item = (StreamKind, packet::Pid)> + '_ {
        self.streams.iter().map(|s| (s.kind, s.decoder.pid()))
    }

    /// Process one transport stream packet, passing any access units it completes to `events`.
    pub fn push<E: DemuxEvents>(&mut self, pk: &packet::Packet<'_>, events: &mut E) {
        let pid = pk.pid();
        if Some(pid) == self.pcr_pid && self.init_pts.is_none() {
            if let Some(pcr) = pk.pcr() {
                let origin = pes::Timestamp::from_u64(pcr.base());
                debug!("{:?}: initial PCR {:?}", pid, pcr);
                self.init_pts = Some(origin);
            }
        }
        if !self.claimed.contains(usize::from(pid)) {
            return;
        }
        if pid == self.pat.pid() {
            let res = self.pat.add(pk);
            for section in res.into_units() {
                self.new_pat(&section);
            }
            return;
        }
        if let Some(pmt) = self.pmt.as_mut() {
            if pid == pmt.pid() {
                let res = pmt.add(pk);
                for section in res.into_units() {
                    self.new_pmt(&section);
                }
                return;
            }
        }
        for i in 0..self.streams.len() {
            let res = self.streams[i].decoder.add(pk);
            if let Reassembly::NotApplicable = res {
                continue;
            }
            let kind = self.streams[i].kind;
            for data in res.into_units() {
                self.new_pes(kind, data, events);
            }
            return;
        }
    }

    /// Produce any unbounded PES packets still being collected, at the end of the stream.
    pub fn flush<E: DemuxEvents>(&mut self, events: &mut E) {
        for i in 0..self.streams.len() {
            if let Some(data) = self.streams[i].decoder.flush() {
                let kind = self.streams[i].kind;
                self.new_pes(kind, data, events);
            }
        }
    }

    /// Forget everything learned from the stream so far, so that no further events are
    /// produced until a new PAT, PMT and PCR have been seen.
    pub fn abort(&mut self) {
        self.pat.reset();
        self.pmt = None;
        self.streams.clear();
        self.claimed.clear();
        self.claimed.insert(usize::from(packet::Pid::PAT));
        self.pcr_pid = None;
        self.init_pts = None;
        self.first_aac = true;
    }

    fn new_pat(&mut self, section: &[u8]) {
        let pat = match PatSection::from_section(section) {
            Ok(pat) => pat,
            Err(e) => {
                warn!("{:?}: bad PAT section: {:?}", packet::Pid::PAT, e);
                return;
            }
        };
        if self.pmt.is_some() {
            return;
        }
        if let Some(pid) = pat.program_pids().next() {
            if self.claimed.contains(usize::from(pid)) {
                warn!("{:?}: PMT PID already in use", pid);
                return;
            }
            debug!("{:?}: PMT discovered", pid);
            self.claimed.insert(usize::from(pid));
            self.pmt = Some(psi::SectionDecoder::new(pid, self.crc_policy));
        }
    }

    fn new_pmt(&mut self, section: &[u8]) {
        let pmt = match PmtSection::from_section(section) {
            Ok(pmt) => pmt,
            Err(e) => {
                warn!("bad PMT section: {:?}", e);
                return;
            }
        };
        if self.pcr_pid.is_none() {
            debug!("{:?}: PCR PID", pmt.pcr_pid());
            self.pcr_pid = Some(pmt.pcr_pid());
        }
        for stream_info in pmt.streams() {
            let kind = match stream_kind(&stream_info) {
                Some(kind) => kind,
                None => continue,
            };
            if self.streams.iter().any(|s| s.kind == kind) {
                continue;
            }
            let pid = stream_info.elementary_pid();
            if self.claimed.contains(usize::from(pid)) {
                warn!("{:?}: {:?} stream on a PID already in use", pid, kind);
                continue;
            }
            debug!("{:?}: {:?} stream {:?}", pid, kind, stream_info);
            self.claimed.insert(usize::from(pid));
            self.streams.push(ElementaryStream {
                kind,
                decoder: pes::PesDecoder::new(pid),
            });
        }
    }

    fn new_pes<E: DemuxEvents>(&mut self, kind: StreamKind, data: Bytes, events: &mut E) {
        let init_pts = match self.init_pts {
            Some(init_pts) => init_pts,
            None => return,
        };
        let pes = match pes::PesPacket::from_bytes(&data) {
            Ok(pes) => pes,
            Err(e) => {
                warn!("{:?} PES packet could not be parsed: {:?}", kind, e);
                return;
            }
        };
        let pts = match pes.pts() {
            Ok(pts) => pts,
            Err(pes::PesError::FieldNotPresent) => return,
            Err(e) => {
                warn!("{:?} PES packet has a bad PTS: {:?}", kind, e);
                return;
            }
        };
        let dts = pes.dts().unwrap_or(pts);
        let payload = pes.payload();
        let mut unit = AccessUnit::new(init_pts, pts, dts, data.slice_ref(payload));
        match kind {
            StreamKind::H264 => unit.has_idr = h264::has_idr(payload),
            StreamKind::Mpeg2Video => unit.has_idr = mpeg2video::is_random_access(payload),
            StreamKind::Aac if self.first_aac => {
                self.first_aac = false;
                unit.timestamp = 0.0;
                unit.dts_timestamp = 0.0;
            }
            _ => (),
        }
        dispatch(events, kind, unit);
    }
}
