//! Low-latency ingest of MPEG2 Transport Stream data, per the _ISO/IEC 13818-1_ standard, from
//! byte source to paced access units ready for a decoder.
//!
//! # Stages
//!
//!  * *Framing*.  Arbitrary chunks of bytes, or RTP datagrams protected by XOR forward error
//!    correction ([`fec`](fec/index.html)), are re-aligned into 188 byte transport stream
//!    packets by the [`chunker`](chunker/index.html).
//!  * *Demultiplexing*.  The [`demultiplex`](demultiplex/index.html) module follows the PAT and
//!    PMT to find the H.264, AAC, MPEG-2 video, ID3 and caption streams of the first program, and
//!    reassembles their PES packets into timestamped [`AccessUnit`](unit/struct.AccessUnit.html)s.
//!  * *Pacing*.  One of the [`buffering`](buffering/index.html) strategies decides when each unit
//!    is released to the decoder, keeping audio and video in step.
//!  * *Decoding*.  The decoder itself is supplied by the caller; the
//!    [`decoder`](decoder/index.html) module wraps it in a state machine that waits for a key
//!    frame and recovers from errors.
//!
//! The [`pipeline`](pipeline/index.html) module wires these stages together as tokio tasks.
//!
//! # Design principals
//!
//!  * *Avoid copying and allocating* if possible.  Packet parsing works by borrowing slices of
//!    the underlying byte buffer, and payloads are handed between stages as `bytes::Bytes`.
//!  * *Push based*.  Every stage below the pipeline accepts data from the caller and produces
//!    results synchronously, so the demultiplexer and schedulers can be driven without an async
//!    runtime.

pub mod accumulator;
pub mod adts;
pub mod bitreader;
pub mod buffering;
pub mod chunker;
pub mod config;
pub mod decoder;
pub mod demultiplex;
pub mod descriptor;
pub mod fec;
pub mod h264;
pub mod mpeg2video;
pub mod packet;
pub mod pes;
pub mod pipeline;
pub mod psi;
pub mod source;
pub mod ticker;
pub mod unit;

/// The type of elementary data carried by a stream, as listed in the PMT.
///
/// Only the types the demultiplexer has a use for are named; everything else is `Other`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum StreamType {
    /// ISO/IEC 13818-2 (MPEG-2) video
    H262,
    /// PES packets carrying private data; captions when tagged by a stream identifier descriptor
    H2220PesPrivateData,
    /// ISO/IEC 13818-7 AAC audio with ADTS framing
    Adts,
    /// Timed metadata (ID3) in PES packets
    MetadataInPes,
    /// ITU-T H.264 (AVC) video
    H264,
    Other(u8),
}
impl From<u8> for StreamType {
    fn from(val: u8) -> Self {
        match val {
            0x02 => StreamType::H262,
            0x06 => StreamType::H2220PesPrivateData,
            0x0f => StreamType::Adts,
            0x15 => StreamType::MetadataInPes,
            0x1b => StreamType::H264,
            _ => StreamType::Other(val),
        }
    }
}
impl From<StreamType> for u8 {
    fn from(val: StreamType) -> Self {
        match val {
            StreamType::H262 => 0x02,
            StreamType::H2220PesPrivateData => 0x06,
            StreamType::Adts => 0x0f,
            StreamType::MetadataInPes => 0x15,
            StreamType::H264 => 0x1b,
            StreamType::Other(val) => val,
        }
    }
}

#[cfg(test)]
mod test {
    use super::StreamType;

    #[test]
    fn stream_type() {
        for v in 0..=255u8 {
            assert_eq!(u8::from(StreamType::from(v)), v);
        }
        assert_eq!(StreamType::from(0x1b), StreamType::H264);
        assert_eq!(StreamType::from(0x24), StreamType::Other(0x24));
    }
}
