use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use mpeg2ts_pipeline::chunker::PacketChunker;
use mpeg2ts_pipeline::demultiplex::{DemuxConfig, Demuxer};
use mpeg2ts_pipeline::packet::Packet;
use mpeg2ts_pipeline::psi::crc32_mpeg2;
use mpeg2ts_pipeline::unit::Parsed;

const VIDEO_PID: u16 = 0x101;
const AUDIO_PID: u16 = 0x102;

struct StreamBuilder {
    out: Vec<u8>,
    cc: [u8; 0x2000],
}

impl StreamBuilder {
    fn new() -> StreamBuilder {
        StreamBuilder {
            out: vec![],
            cc: [0; 0x2000],
        }
    }

    fn next_cc(&mut self, pid: u16) -> u8 {
        let cc = self.cc[pid as usize];
        self.cc[pid as usize] = (cc + 1) & 0xf;
        cc
    }

    /// Packetise `data` on `pid`, stuffing the final packet with an adaptation field.
    fn payload(&mut self, pid: u16, data: &[u8]) {
        let mut rest = data;
        let mut first = true;
        while first || !rest.is_empty() {
            let mut buf = [0xffu8; Packet::SIZE];
            buf[0] = Packet::SYNC_BYTE;
            buf[1] = if first { 0x40 } else { 0 } | (pid >> 8) as u8;
            buf[2] = pid as u8;
            let cc = self.next_cc(pid);
            let space = Packet::SIZE - 4;
            let take = rest.len().min(space);
            if take < space {
                let af = space - take;
                buf[3] = 0x30 | cc;
                buf[4] = (af - 1) as u8;
                if af > 1 {
                    buf[5] = 0;
                }
                buf[4 + af..].copy_from_slice(&rest[..take]);
            } else {
                buf[3] = 0x10 | cc;
                buf[4..].copy_from_slice(&rest[..take]);
            }
            rest = &rest[take..];
            first = false;
            self.out.extend_from_slice(&buf);
        }
    }

    fn section(&mut self, pid: u16, table_id: u8, id: u16, body: &[u8]) {
        let len = 5 + body.len() + 4;
        let mut sect = vec![
            table_id,
            0xb0 | (len >> 8) as u8,
            len as u8,
            (id >> 8) as u8,
            id as u8,
            0xc1,
            0,
            0,
        ];
        sect.extend_from_slice(body);
        let crc = crc32_mpeg2(&sect);
        sect.extend_from_slice(&crc.to_be_bytes());
        let mut data = vec![0]; // pointer_field
        data.extend(sect);
        self.payload(pid, &data);
    }

    fn pcr(&mut self, base: u64) {
        let mut buf = [0xffu8; Packet::SIZE];
        buf[0] = Packet::SYNC_BYTE;
        buf[1] = (VIDEO_PID >> 8) as u8;
        buf[2] = VIDEO_PID as u8;
        // adaptation-only packets repeat the previous continuity_counter
        buf[3] = 0x20 | (self.cc[VIDEO_PID as usize].wrapping_sub(1) & 0xf);
        buf[4] = 183;
        buf[5] = 0x10;
        buf[6] = (base >> 25) as u8;
        buf[7] = (base >> 17) as u8;
        buf[8] = (base >> 9) as u8;
        buf[9] = (base >> 1) as u8;
        buf[10] = ((base & 1) << 7) as u8 | 0x7e;
        buf[11] = 0;
        self.out.extend_from_slice(&buf);
    }

    fn pes(&mut self, pid: u16, stream_id: u8, pts: u64, payload: &[u8], bounded: bool) {
        let len = if bounded { 8 + payload.len() } else { 0 };
        let mut data = vec![
            0,
            0,
            1,
            stream_id,
            (len >> 8) as u8,
            len as u8,
            0x80,
            0x80,
            5,
            0x21 | ((pts >> 29) & 0x0e) as u8,
            (pts >> 22) as u8,
            ((pts >> 14) as u8 & 0xfe) | 1,
            (pts >> 7) as u8,
            ((pts << 1) as u8 & 0xfe) | 1,
        ];
        data.extend_from_slice(payload);
        self.payload(pid, &data);
    }
}

/// Two programs, of which the first has H.264 video and ADTS audio; ten seconds at 30fps.
fn synthetic_stream() -> Vec<u8> {
    let mut b = StreamBuilder::new();
    b.section(0, 0x00, 1, &[0, 1, 0xe1, 0x00, 0, 2, 0xe2, 0x00]);
    b.section(
        0x100,
        0x02,
        1,
        &[
            0xe1, 0x01, 0xf0, 0x00, // PCR_PID, program_info_length
            0x1b, 0xe1, 0x01, 0xf0, 0x00, // H.264
            0x0f, 0xe1, 0x02, 0xf0, 0x00, // ADTS
        ],
    );
    b.pcr(0);
    let mut adts = vec![0xff, 0xf1, 0x4c, 0x80, 0x00, 0x00, 0xfc];
    let adts_len = 7 + 300;
    adts[4] = (adts_len >> 3) as u8;
    adts[5] = ((adts_len & 7) << 5) as u8 | 0x1f;
    adts.resize(adts_len, 0x55);
    for frame in 0..300u64 {
        let pts = 3000 * frame;
        let mut video = vec![0, 0, 0, 1, 0x09, 0xf0, 0, 0, 0, 1];
        video.push(if frame % 30 == 0 { 0x65 } else { 0x41 });
        video.resize(if frame % 30 == 0 { 30_000 } else { 4_000 }, 0xaa);
        b.pes(VIDEO_PID, 0xe0, pts, &video, false);
        b.pes(AUDIO_PID, 0xc0, pts, &adts, true);
        if frame % 3 == 0 {
            b.pcr(pts);
        }
    }
    b.out
}

fn demux(c: &mut Criterion) {
    let buf = synthetic_stream();
    let mut group = c.benchmark_group("demux");
    group.throughput(Throughput::Bytes(buf.len() as u64));
    group.bench_function("chunker+demuxer", |b| {
        b.iter(|| {
            let mut chunker = PacketChunker::new();
            let mut demuxer = Demuxer::new(&DemuxConfig::default());
            let mut events: Vec<Parsed> = Vec::with_capacity(1024);
            let mut count = 0;
            for chunk in buf.chunks(Packet::SIZE * 7) {
                chunker.push(chunk, |pk| demuxer.push(&pk, &mut events));
                count += events.len();
                events.clear();
            }
            demuxer.flush(&mut events);
            black_box(count + events.len())
        });
    });
    group.finish();
}

criterion_group!(benches, demux);
criterion_main!(benches);
