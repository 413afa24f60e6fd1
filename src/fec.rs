//! Recovery of lost transport stream datagrams using XOR forward error correction.
//!
//! Media datagrams are RTP packets with payload type 33 (MP2T), each carrying some whole TS
//! packets.  Any other payload type is taken to be an FEC packet, whose payload is the
//! exclusive-or of the payloads of a group of media datagrams.  When exactly one datagram of a
//! group is missing, it can be rebuilt by XORing the FEC payload with the datagrams that did
//! arrive.
//!
//! Datagrams are held in a window of RTP sequence numbers, and released in sequence order as the
//! window slides forward, giving late or recovered datagrams a chance to take their place.

use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use rtp_rs::{RtpReader, Seq};
use std::collections::VecDeque;
use std::fmt;

/// RTP payload type for MPEG-2 transport streams, from RFC 3551.
pub const MP2T_PAYLOAD_TYPE: u8 = 33;

#[derive(Debug, PartialEq, Eq)]
pub enum FecError {
    NotEnoughData { expected: usize, actual: usize },
    /// An `Offset` or `NA` value of zero would describe an empty group
    BadGeometry { offset: u8, number_associated: u8 },
}

/// The FEC header at the start of the RTP payload of an FEC packet, followed by the XOR payload.
pub struct FecHeader<'buf> {
    buf: &'buf [u8],
}
impl<'buf> FecHeader<'buf> {
    const SIZE: usize = 16;

    pub fn from_bytes(buf: &'buf [u8]) -> Result<FecHeader<'buf>, FecError> {
        if buf.len() < Self::SIZE {
            return Err(FecError::NotEnoughData {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }
        let header = FecHeader { buf };
        if header.offset() == 0 || header.number_associated() == 0 {
            return Err(FecError::BadGeometry {
                offset: header.offset(),
                number_associated: header.number_associated(),
            });
        }
        Ok(header)
    }

    /// Sequence number of the first media datagram protected
    pub fn sn_base(&self) -> Seq {
        Seq::from(u16::from(self.buf[0]) << 8 | u16::from(self.buf[1]))
    }
    /// XOR of the payload lengths of the protected datagrams
    pub fn length_recovery(&self) -> u16 {
        u16::from(self.buf[2]) << 8 | u16::from(self.buf[3])
    }
    /// Spacing between the sequence numbers of the protected datagrams
    pub fn offset(&self) -> u8 {
        self.buf[13]
    }
    /// Number of media datagrams protected
    pub fn number_associated(&self) -> u8 {
        self.buf[14]
    }
    pub fn payload(&self) -> &'buf [u8] {
        &self.buf[Self::SIZE..]
    }
}
impl<'buf> fmt::Debug for FecHeader<'buf> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FecHeader")
            .field("sn_base", &self.sn_base())
            .field("length_recovery", &self.length_recovery())
            .field("offset", &self.offset())
            .field("number_associated", &self.number_associated())
            .field("payload_len", &self.payload().len())
            .finish()
    }
}

/// A received FEC packet, waiting for enough of its group to arrive.
#[derive(Debug)]
struct FecGroup {
    sn_base: Seq,
    offset: u8,
    number_associated: u8,
    length_recovery: u16,
    payload: Bytes,
}
impl FecGroup {
    fn covered(&self) -> impl Iterator<Item = Seq> + '_ {
        (0..u16::from(self.number_associated))
            .map(move |i| self.sn_base + i * u16::from(self.offset))
    }

    fn last(&self) -> Seq {
        self.sn_base + (u16::from(self.number_associated) - 1) * u16::from(self.offset)
    }
}

enum GroupState {
    /// The group's datagrams have not all come within the window yet, or too many are missing
    Waiting,
    /// Nothing is missing, or the window has moved past the start of the group
    Done,
    /// The single missing datagram was rebuilt
    Recovered,
}

/// Reorders media datagrams by RTP sequence number and fills single-datagram gaps using FEC.
///
/// `push_datagram()` returns the payloads leaving the window, in sequence order.  A `None` entry
/// marks a datagram that was lost and could not be recovered; a jump in sequence number larger
/// than the window is reported as a single `None`.
pub struct FecIngestor {
    capacity: usize,
    /// sequence number of `slots[0]`
    base: Option<Seq>,
    slots: VecDeque<Option<Bytes>>,
    groups: Vec<FecGroup>,
}

impl FecIngestor {
    /// Smallest window which can hold a datagram while its successor is still awaited
    pub const MIN_CAPACITY: usize = 2;

    /// A `capacity` smaller than `MIN_CAPACITY` is raised to that value.
    pub fn new(capacity: usize) -> FecIngestor {
        let capacity = capacity.max(Self::MIN_CAPACITY);
        FecIngestor {
            capacity,
            base: None,
            slots: VecDeque::with_capacity(capacity),
            groups: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of FEC packets not yet used or discarded.
    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    /// Accept one RTP datagram, returning the payloads that slide out of the window as a result.
    pub fn push_datagram(&mut self, datagram: Bytes) -> Vec<Option<Bytes>> {
        let mut out = vec![];
        let rtp = match RtpReader::new(&datagram[..]) {
            Ok(rtp) => rtp,
            Err(e) => {
                warn!("dropping datagram of {} bytes: {:?}", datagram.len(), e);
                return out;
            }
        };
        let seq = rtp.sequence_number();
        let payload = datagram.slice_ref(rtp.payload());
        if rtp.payload_type() == MP2T_PAYLOAD_TYPE {
            self.insert_media(seq, payload, &mut out);
        } else {
            match FecHeader::from_bytes(&payload) {
                Ok(header) => self.groups.push(FecGroup {
                    sn_base: header.sn_base(),
                    offset: header.offset(),
                    number_associated: header.number_associated(),
                    length_recovery: header.length_recovery(),
                    payload: payload.slice_ref(header.payload()),
                }),
                Err(e) => {
                    warn!("{:?}: dropping FEC packet: {:?}", seq, e);
                    return out;
                }
            }
        }
        self.sweep();
        out
    }

    /// Release everything remaining in the window, in order, at the end of the input.
    pub fn flush(&mut self) -> Vec<Option<Bytes>> {
        self.base = None;
        self.groups.clear();
        self.slots.drain(..).collect()
    }

    /// Discard all state without releasing anything.
    pub fn abort(&mut self) {
        self.base = None;
        self.groups.clear();
        self.slots.clear();
    }

    /// Position of `seq` relative to the start of the window, negative if it is earlier.
    fn index_of(&self, seq: Seq) -> Option<i32> {
        self.base.map(|base| seq - base)
    }

    fn get(&self, seq: Seq) -> Option<&Bytes> {
        match self.index_of(seq) {
            Some(i) if i >= 0 => self.slots.get(i as usize).and_then(|s| s.as_ref()),
            _ => None,
        }
    }

    fn has(&self, seq: Seq) -> bool {
        matches!(self.index_of(seq), Some(i) if i >= 0 && (i as usize) < self.slots.len())
    }

    fn insert_media(&mut self, seq: Seq, payload: Bytes, out: &mut Vec<Option<Bytes>>) {
        let base = *self.base.get_or_insert(seq);
        let index = seq - base;
        if index < 0 {
            debug!("{:?}: arrived after the window moved on, dropping", seq);
            return;
        }
        let mut index = index as usize;
        if index >= self.capacity {
            let slide = index + 1 - self.capacity;
            let retained = self.slots.len();
            out.extend(self.slots.drain(..slide.min(retained)));
            if slide > retained {
                warn!(
                    "{:?}: sequence jumped by {}, beyond a window of {}",
                    seq, index, self.capacity
                );
                out.push(None);
            }
            // slide < capacity + 2^15, which fits
            self.base = Some(base + slide as u16);
            index = self.capacity - 1;
        }
        self.set_slot(index, payload, seq);
    }

    fn set_slot(&mut self, index: usize, payload: Bytes, seq: Seq) {
        while self.slots.len() <= index {
            self.slots.push_back(None);
        }
        match self.slots[index] {
            Some(_) => debug!("{:?}: duplicate datagram", seq),
            None => self.slots[index] = Some(payload),
        }
    }

    /// Try every pending FEC group, repeating while recoveries are made, since a rebuilt datagram
    /// may complete another group.
    fn sweep(&mut self) {
        loop {
            let mut recovered = false;
            for group in std::mem::take(&mut self.groups) {
                match self.try_recover(&group) {
                    GroupState::Waiting => self.groups.push(group),
                    GroupState::Recovered => recovered = true,
                    GroupState::Done => (),
                }
            }
            if !recovered {
                break;
            }
        }
    }

    fn try_recover(&mut self, group: &FecGroup) -> GroupState {
        match self.index_of(group.sn_base) {
            None => return GroupState::Waiting,
            Some(i) if i < 0 => {
                debug!("{:?}: FEC group left the window", group.sn_base);
                return GroupState::Done;
            }
            Some(_) => (),
        }
        if !self.has(group.last()) {
            return GroupState::Waiting;
        }
        let mut missing = group.covered().filter(|seq| self.get(*seq).is_none());
        let lost = match (missing.next(), missing.next()) {
            (None, _) => return GroupState::Done,
            (Some(_), Some(_)) => return GroupState::Waiting,
            (Some(lost), None) => lost,
        };
        let mut data = BytesMut::from(&group.payload[..]);
        let mut len = group.length_recovery;
        for seq in group.covered() {
            if let Some(pk) = self.get(seq) {
                if pk.len() > data.len() {
                    data.resize(pk.len(), 0);
                }
                for (d, s) in data.iter_mut().zip(pk.iter()) {
                    *d ^= s;
                }
                len ^= pk.len() as u16;
            }
        }
        data.truncate(usize::from(len));
        debug!("{:?}: recovered {} bytes using FEC", lost, data.len());
        if let Some(index) = self.index_of(lost) {
            self.set_slot(index as usize, data.freeze(), lost);
        }
        GroupState::Recovered
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use assert_matches::assert_matches;

    pub(crate) fn rtp(payload_type: u8, seq: u16, payload: &[u8]) -> Bytes {
        let mut data = vec![
            0x80,
            payload_type,
            (seq >> 8) as u8,
            (seq & 0xff) as u8,
            0, 0, 0, 0, // timestamp
            0, 0, 0, 1, // ssrc
        ];
        data.extend_from_slice(payload);
        Bytes::from(data)
    }

    fn media_payload(seq: u16, len: usize) -> Vec<u8> {
        (0..len).map(|i| (seq as usize * 7 + i) as u8).collect()
    }

    fn media(seq: u16) -> Bytes {
        rtp(MP2T_PAYLOAD_TYPE, seq, &media_payload(seq, 188))
    }

    fn fec(sn_base: u16, offset: u8, na: u8, payloads: &[Vec<u8>]) -> Bytes {
        let mut xor = vec![0u8; payloads.iter().map(|p| p.len()).max().unwrap_or(0)];
        let mut len_recovery = 0u16;
        for p in payloads {
            for (d, s) in xor.iter_mut().zip(p.iter()) {
                *d ^= s;
            }
            len_recovery ^= p.len() as u16;
        }
        let mut data = vec![0u8; 16];
        data[0] = (sn_base >> 8) as u8;
        data[1] = (sn_base & 0xff) as u8;
        data[2] = (len_recovery >> 8) as u8;
        data[3] = (len_recovery & 0xff) as u8;
        data[13] = offset;
        data[14] = na;
        data.extend(xor);
        rtp(96, sn_base.wrapping_add(1000), &data)
    }

    fn all_of(ingestor: &mut FecIngestor, datagrams: Vec<Bytes>) -> Vec<Option<Bytes>> {
        let mut out = vec![];
        for d in datagrams {
            out.extend(ingestor.push_datagram(d));
        }
        out.extend(ingestor.flush());
        out
    }

    fn payload_of(seq: u16) -> Option<Bytes> {
        Some(Bytes::from(media_payload(seq, 188)))
    }

    #[test]
    fn reordered_within_window() {
        let mut ingestor = FecIngestor::new(4);
        let group: Vec<_> = (10..14).map(|s| media_payload(s, 188)).collect();
        let out = all_of(
            &mut ingestor,
            vec![media(10), media(11), media(13), media(12), fec(10, 1, 4, &group)],
        );
        assert_eq!(out, (10..14).map(payload_of).collect::<Vec<_>>());
        assert_eq!(ingestor.pending_groups(), 0);
    }

    #[test]
    fn single_loss_recovered() {
        let mut ingestor = FecIngestor::new(8);
        let group: Vec<_> = (10..14).map(|s| media_payload(s, 188)).collect();
        let mut out = vec![];
        for d in vec![media(10), media(11), media(13), fec(10, 1, 4, &group)] {
            out.extend(ingestor.push_datagram(d));
        }
        assert!(out.is_empty());
        assert_eq!(ingestor.pending_groups(), 0);
        assert_eq!(ingestor.flush(), (10..14).map(payload_of).collect::<Vec<_>>());
    }

    #[test]
    fn fec_before_media() {
        let mut ingestor = FecIngestor::new(8);
        let group: Vec<_> = (20..23).map(|s| media_payload(s, 188)).collect();
        let out = all_of(&mut ingestor, vec![fec(20, 1, 3, &group), media(20), media(22)]);
        assert_eq!(out, (20..23).map(payload_of).collect::<Vec<_>>());
    }

    #[test]
    fn recovered_length() {
        let mut ingestor = FecIngestor::new(8);
        let group = vec![media_payload(1, 188), media_payload(2, 376), media_payload(3, 188)];
        let out = all_of(
            &mut ingestor,
            vec![
                media(1),
                fec(1, 1, 3, &group),
                rtp(MP2T_PAYLOAD_TYPE, 3, &group[2]),
            ],
        );
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].as_deref(), Some(&group[1][..]));
    }

    #[test]
    fn column_group() {
        // offset 2 covers every other datagram
        let mut ingestor = FecIngestor::new(8);
        let group: Vec<_> = [0, 2, 4].iter().map(|&s| media_payload(s, 188)).collect();
        let out = all_of(
            &mut ingestor,
            vec![media(0), media(1), media(3), media(4), media(5), fec(0, 2, 3, &group)],
        );
        assert_eq!(out, (0..6).map(payload_of).collect::<Vec<_>>());
    }

    #[test]
    fn double_loss_reported_as_gaps() {
        let mut ingestor = FecIngestor::new(4);
        let group: Vec<_> = (10..14).map(|s| media_payload(s, 188)).collect();
        let mut out = vec![];
        for d in vec![media(10), media(13), fec(10, 1, 4, &group)] {
            out.extend(ingestor.push_datagram(d));
        }
        assert!(out.is_empty());
        assert_eq!(ingestor.pending_groups(), 1);
        // slides the window past the start of the group
        out.extend(ingestor.push_datagram(media(14)));
        assert_eq!(out, vec![payload_of(10)]);
        assert_eq!(ingestor.pending_groups(), 0);
        assert_eq!(
            ingestor.flush(),
            vec![None, None, payload_of(13), payload_of(14)]
        );
    }

    #[test]
    fn late_arrival_completes_group() {
        let mut ingestor = FecIngestor::new(8);
        let group: Vec<_> = (10..14).map(|s| media_payload(s, 188)).collect();
        let out = all_of(
            &mut ingestor,
            vec![media(10), media(13), fec(10, 1, 4, &group), media(11)],
        );
        assert_eq!(out, (10..14).map(payload_of).collect::<Vec<_>>());
    }

    #[test]
    fn sequence_wraps() {
        let mut ingestor = FecIngestor::new(4);
        let seqs = [65534u16, 65535, 0, 1];
        let group: Vec<_> = seqs.iter().map(|&s| media_payload(s, 188)).collect();
        let out = all_of(
            &mut ingestor,
            vec![media(65534), media(0), media(1), fec(65534, 1, 4, &group)],
        );
        let expected: Vec<_> = seqs.iter().map(|&s| payload_of(s)).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn window_slides() {
        let mut ingestor = FecIngestor::new(2);
        assert!(ingestor.push_datagram(media(5)).is_empty());
        assert!(ingestor.push_datagram(media(6)).is_empty());
        assert_eq!(ingestor.push_datagram(media(7)), vec![payload_of(5)]);
        // too late
        assert!(ingestor.push_datagram(media(5)).is_empty());
        assert_eq!(ingestor.push_datagram(media(100)), vec![payload_of(6), payload_of(7), None]);
        assert_eq!(ingestor.flush(), vec![None, payload_of(100)]);
    }

    #[test]
    fn capacity_clamped() {
        assert_eq!(FecIngestor::new(0).capacity(), FecIngestor::MIN_CAPACITY);
    }

    #[test]
    fn bad_datagrams() {
        let mut ingestor = FecIngestor::new(4);
        assert!(ingestor.push_datagram(Bytes::from_static(&[0x80, 33])).is_empty());
        assert!(ingestor.push_datagram(rtp(96, 1, &[0; 8])).is_empty());
        assert_eq!(ingestor.pending_groups(), 0);
        assert_matches!(
            FecHeader::from_bytes(&[0; 16]),
            Err(FecError::BadGeometry { offset: 0, .. })
        );
    }
}
