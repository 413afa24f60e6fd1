#![no_main]

use libfuzzer_sys::fuzz_target;
use mpeg2ts_pipeline::chunker::PacketChunker;
use mpeg2ts_pipeline::demultiplex::{DemuxConfig, Demuxer};
use mpeg2ts_pipeline::fec::FecIngestor;
use mpeg2ts_pipeline::unit::Parsed;

fuzz_target!(|data: &[u8]| {
    let mut chunker = PacketChunker::new();
    let mut demux = Demuxer::new(&DemuxConfig::default());
    let mut events: Vec<Parsed> = vec![];
    chunker.push(data, |pk| demux.push(&pk, &mut events));
    demux.flush(&mut events);

    // the same bytes, taken as a sequence of length-prefixed datagrams
    let mut fec = FecIngestor::new(8);
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::from(len).min(tail.len());
        fec.push_datagram(bytes::Bytes::copy_from_slice(&tail[..len]));
        rest = &tail[len..];
    }
    fec.flush();
});
