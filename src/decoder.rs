//! Gating of access units into an externally supplied decoder.
//!
//! A decoder cannot produce pictures from delta frames alone, and after it reports an error its
//! internal state is suspect.  [`DecoderGate`](struct.DecoderGate.html) tracks this as an
//! explicit state machine:
//!
//! ```text
//!  Uninitialized --key frame--> Ready --decode error--> ErrorRecovering --key frame--> Ready
//! ```
//!
//! Video units are dropped until a unit with `has_idr` arrives in the `Uninitialized` and
//! `ErrorRecovering` states.  Audio frames are all independently decodable, so the audio gate
//! reconfigures with the next unit.

use crate::adts::{self, AdtsHeader};
use crate::h264::SeqParameterSet;
use crate::unit::{AccessUnit, Ready, StreamKind};
use bytes::Bytes;
use log::{debug, trace, warn};
use thiserror::Error;

/// An error reported by the decoder collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("decoder rejected configuration {codec}: {reason}")]
    Unsupported { codec: String, reason: String },
    #[error("decoding failed: {0}")]
    Failed(String),
}

/// Codec parameters derived from the stream, given to the decoder when it is (re)initialised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderConfig {
    Video {
        /// RFC 6381 codec string
        codec: String,
        width: Option<u32>,
        height: Option<u32>,
    },
    Audio {
        codec: String,
        sample_rate: u32,
        channels: u8,
    },
}

impl DecoderConfig {
    /// Used when a key frame carries no parsable SPS
    pub const DEFAULT_AVC_CODEC: &'static str = "avc1.64001f";
    /// MPEG-2 video, Main profile
    pub const MPEG2_VIDEO_CODEC: &'static str = "mp4v.61";
    pub const DEFAULT_AAC_CODEC: &'static str = "mp4a.40.2";
    pub const DEFAULT_CHANNELS: u8 = 2;

    /// The configuration described by the unit's own headers, if it has them.
    pub fn from_unit(kind: StreamKind, data: &[u8]) -> Option<DecoderConfig> {
        match kind {
            StreamKind::Aac => match AdtsHeader::from_bytes(data) {
                Ok(h) => Some(DecoderConfig::Audio {
                    codec: h.codec_string(),
                    sample_rate: h.sample_rate().unwrap_or(adts::DEFAULT_SAMPLE_RATE),
                    channels: match h.channel_count() {
                        0 => Self::DEFAULT_CHANNELS,
                        c => c,
                    },
                }),
                Err(e) => {
                    trace!("no ADTS header for decoder config: {:?}", e);
                    None
                }
            },
            StreamKind::Mpeg2Video => Some(DecoderConfig::Video {
                codec: Self::MPEG2_VIDEO_CODEC.to_string(),
                width: None,
                height: None,
            }),
            _ => match SeqParameterSet::find(data)? {
                Ok(sps) => Some(DecoderConfig::Video {
                    codec: sps.codec_string(),
                    width: Some(sps.width()),
                    height: Some(sps.height()),
                }),
                Err(e) => {
                    warn!("unparsable SPS: {:?}", e);
                    None
                }
            },
        }
    }

    /// As `from_unit()`, falling back to defaults for the kind.
    pub fn for_unit(kind: StreamKind, data: &[u8]) -> DecoderConfig {
        Self::from_unit(kind, data).unwrap_or_else(|| match kind {
            StreamKind::Aac => DecoderConfig::Audio {
                codec: Self::DEFAULT_AAC_CODEC.to_string(),
                sample_rate: adts::DEFAULT_SAMPLE_RATE,
                channels: Self::DEFAULT_CHANNELS,
            },
            _ => DecoderConfig::Video {
                codec: Self::DEFAULT_AVC_CODEC.to_string(),
                width: None,
                height: None,
            },
        })
    }

    pub fn codec(&self) -> &str {
        match self {
            DecoderConfig::Video { codec, .. } | DecoderConfig::Audio { codec, .. } => codec,
        }
    }
}

/// Output of the decoder collaborator for one input unit.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Presentation time of the frame, in seconds
    pub timestamp: f64,
    pub data: Bytes,
}

/// The external decoder.
pub trait Decoder {
    fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecodeError>;

    /// Decode one access unit, returning any frames that are now complete.
    fn decode(&mut self, unit: &AccessUnit) -> Result<Vec<DecodedFrame>, DecodeError>;

    /// Discard internal codec state.  `configure()` will be called again before the next
    /// `decode()`.
    fn reset(&mut self);
}

/// Notifications for the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum DecoderEvent {
    VideoFrameDecoded(DecodedFrame),
    AudioFrameDecoded(DecodedFrame),
    VideoDecodeError(DecodeError),
    AudioDecodeError(DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Uninitialized,
    Ready,
    ErrorRecovering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Media {
    Video,
    Audio,
}

/// Wraps one decoder, feeding it only units it is in a state to accept.
pub struct DecoderGate<D> {
    decoder: D,
    media: Media,
    state: DecoderState,
    config: Option<DecoderConfig>,
}

impl<D: Decoder> DecoderGate<D> {
    /// A gate for H.264 and MPEG-2 video, which waits for key frames.
    pub fn video(decoder: D) -> DecoderGate<D> {
        Self::new(decoder, Media::Video)
    }

    pub fn audio(decoder: D) -> DecoderGate<D> {
        Self::new(decoder, Media::Audio)
    }

    fn new(decoder: D, media: Media) -> DecoderGate<D> {
        DecoderGate {
            decoder,
            media,
            state: DecoderState::Uninitialized,
            config: None,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// The configuration last given to the decoder.
    pub fn config(&self) -> Option<&DecoderConfig> {
        self.config.as_ref()
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    fn set_state(&mut self, state: DecoderState) {
        if self.state != state {
            debug!("{:?} decoder {:?} -> {:?}", self.media, self.state, state);
            self.state = state;
        }
    }

    fn error_event(&self, e: DecodeError) -> DecoderEvent {
        match self.media {
            Media::Video => DecoderEvent::VideoDecodeError(e),
            Media::Audio => DecoderEvent::AudioDecodeError(e),
        }
    }

    fn frame_event(&self, frame: DecodedFrame) -> DecoderEvent {
        match self.media {
            Media::Video => DecoderEvent::VideoFrameDecoded(frame),
            Media::Audio => DecoderEvent::AudioFrameDecoded(frame),
        }
    }

    fn fail(&mut self, e: DecodeError, events: &mut Vec<DecoderEvent>) {
        warn!("{:?} decoder error: {}", self.media, e);
        events.push(self.error_event(e));
        self.decoder.reset();
        self.set_state(DecoderState::ErrorRecovering);
    }

    /// Pass a unit of the given kind to the decoder if the current state allows, appending
    /// resulting events.
    pub fn push(&mut self, kind: StreamKind, unit: &AccessUnit, events: &mut Vec<DecoderEvent>) {
        let new_config = match self.state {
            DecoderState::Ready => {
                // a change of stream parameters is only acted on where decoding can restart
                if self.media == Media::Video && !unit.has_idr {
                    None
                } else {
                    DecoderConfig::from_unit(kind, &unit.data)
                        .filter(|c| Some(c) != self.config.as_ref())
                }
            }
            DecoderState::Uninitialized | DecoderState::ErrorRecovering => {
                if self.media == Media::Video && !unit.has_idr {
                    trace!("waiting for key frame, dropping {:?} unit", kind);
                    return;
                }
                Some(DecoderConfig::for_unit(kind, &unit.data))
            }
        };
        if let Some(new_config) = new_config {
            if let Err(e) = self.decoder.configure(&new_config) {
                self.config = None;
                self.fail(e, events);
                return;
            }
            debug!("{:?} decoder configured: {:?}", self.media, new_config);
            self.config = Some(new_config);
            self.set_state(DecoderState::Ready);
        }
        match self.decoder.decode(unit) {
            Ok(frames) => {
                for frame in frames {
                    events.push(self.frame_event(frame));
                }
            }
            Err(e) => self.fail(e, events),
        }
    }

    /// Forget the stream, requiring reconfiguration (and for video a key frame) before decoding
    /// resumes.
    pub fn abort(&mut self) {
        if self.state != DecoderState::Uninitialized {
            self.decoder.reset();
        }
        self.config = None;
        self.set_state(DecoderState::Uninitialized);
    }
}

/// The video and audio gates together, routing released units by kind.
pub struct Decoders<V, A> {
    pub video: DecoderGate<V>,
    pub audio: DecoderGate<A>,
}

impl<V: Decoder, A: Decoder> Decoders<V, A> {
    pub fn new(video: V, audio: A) -> Decoders<V, A> {
        Decoders {
            video: DecoderGate::video(video),
            audio: DecoderGate::audio(audio),
        }
    }

    pub fn push(&mut self, unit: &Ready, events: &mut Vec<DecoderEvent>) {
        match unit {
            Ready::H264(u) => self.video.push(StreamKind::H264, u, events),
            Ready::Mpeg2Video(u) => self.video.push(StreamKind::Mpeg2Video, u, events),
            Ready::Aac(u) => self.audio.push(StreamKind::Aac, u, events),
        }
    }

    pub fn abort(&mut self) {
        self.video.abort();
        self.audio.abort();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::adts::test::make_frame;
    use crate::h264::test::keyframe;
    use crate::unit::test::unit_at;
    use assert_matches::assert_matches;
    use hex_literal::*;

    #[derive(Default)]
    struct MockDecoder {
        configs: Vec<DecoderConfig>,
        decoded: Vec<f64>,
        resets: usize,
        fail_next: bool,
        reject_config: bool,
    }

    impl Decoder for MockDecoder {
        fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecodeError> {
            if self.reject_config {
                return Err(DecodeError::Unsupported {
                    codec: config.codec().to_string(),
                    reason: "test".to_string(),
                });
            }
            self.configs.push(config.clone());
            Ok(())
        }

        fn decode(&mut self, unit: &AccessUnit) -> Result<Vec<DecodedFrame>, DecodeError> {
            if self.fail_next {
                self.fail_next = false;
                return Err(DecodeError::Failed("corrupt slice".to_string()));
            }
            self.decoded.push(unit.timestamp);
            Ok(vec![DecodedFrame {
                timestamp: unit.timestamp,
                data: unit.data.clone(),
            }])
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    fn video_unit(seconds: f64, idr: bool) -> AccessUnit {
        let mut u = unit_at(seconds);
        if idr {
            u.data = Bytes::from(keyframe());
            u.has_idr = true;
        } else {
            u.data = Bytes::from_static(&hex!("00000001 4188"));
        }
        u
    }

    #[test]
    fn waits_for_key_frame() {
        let mut gate = DecoderGate::video(MockDecoder::default());
        let mut events = vec![];
        gate.push(StreamKind::H264, &video_unit(0.0, false), &mut events);
        assert!(events.is_empty());
        assert_eq!(gate.state(), DecoderState::Uninitialized);

        gate.push(StreamKind::H264, &video_unit(0.1, true), &mut events);
        gate.push(StreamKind::H264, &video_unit(0.2, false), &mut events);
        assert_eq!(gate.state(), DecoderState::Ready);
        assert_eq!(gate.decoder().decoded, vec![0.1, 0.2]);
        assert_eq!(
            gate.config(),
            Some(&DecoderConfig::Video {
                codec: "avc1.42c01e".to_string(),
                width: Some(640),
                height: Some(480),
            })
        );
        assert_matches!(&events[..], [DecoderEvent::VideoFrameDecoded(_), DecoderEvent::VideoFrameDecoded(_)]);
    }

    #[test]
    fn default_codec_without_sps() {
        let mut gate = DecoderGate::video(MockDecoder::default());
        let mut unit = unit_at(0.0);
        unit.data = Bytes::from_static(&hex!("00000001 6588"));
        unit.has_idr = true;
        gate.push(StreamKind::H264, &unit, &mut vec![]);
        assert_eq!(gate.config().map(|c| c.codec()), Some("avc1.64001f"));
    }

    #[test]
    fn error_recovery() {
        let mut gate = DecoderGate::video(MockDecoder::default());
        let mut events = vec![];
        gate.push(StreamKind::H264, &video_unit(0.0, true), &mut events);
        gate.decoder.fail_next = true;
        gate.push(StreamKind::H264, &video_unit(0.1, false), &mut events);
        assert_eq!(gate.state(), DecoderState::ErrorRecovering);
        assert_matches!(events.last(), Some(DecoderEvent::VideoDecodeError(DecodeError::Failed(_))));
        assert_eq!(gate.decoder().resets, 1);

        // delta frames are dropped until the next key frame
        gate.push(StreamKind::H264, &video_unit(0.2, false), &mut events);
        assert_eq!(gate.decoder().decoded, vec![0.0]);
        gate.push(StreamKind::H264, &video_unit(0.3, true), &mut events);
        assert_eq!(gate.state(), DecoderState::Ready);
        assert_eq!(gate.decoder().decoded, vec![0.0, 0.3]);
        assert_eq!(gate.decoder().configs.len(), 2);
    }

    #[test]
    fn reconfigured_on_new_sps() {
        let mut gate = DecoderGate::video(MockDecoder::default());
        let mut unit = unit_at(0.0);
        unit.data = Bytes::from_static(&hex!("00000001 6588"));
        unit.has_idr = true;
        gate.push(StreamKind::H264, &unit, &mut vec![]);
        // a key frame without an SPS keeps the existing configuration
        gate.push(StreamKind::H264, &unit, &mut vec![]);
        assert_eq!(gate.decoder().configs.len(), 1);
        gate.push(StreamKind::H264, &video_unit(0.1, true), &mut vec![]);
        assert_eq!(gate.decoder().configs.len(), 2);
        assert_eq!(gate.config().map(|c| c.codec()), Some("avc1.42c01e"));
        assert_eq!(gate.decoder().resets, 0);
    }

    #[test]
    fn rejected_configuration() {
        let mut gate = DecoderGate::video(MockDecoder {
            reject_config: true,
            ..MockDecoder::default()
        });
        let mut events = vec![];
        gate.push(StreamKind::H264, &video_unit(0.0, true), &mut events);
        assert_eq!(gate.state(), DecoderState::ErrorRecovering);
        assert_matches!(&events[..], [DecoderEvent::VideoDecodeError(DecodeError::Unsupported { .. })]);
        assert!(gate.decoder().decoded.is_empty());
    }

    #[test]
    fn audio_configured_from_adts() {
        let mut gate = DecoderGate::audio(MockDecoder::default());
        let mut events = vec![];
        let mut unit = unit_at(0.0);
        unit.data = Bytes::from(make_frame(4, 20));
        gate.push(StreamKind::Aac, &unit, &mut events);
        assert_eq!(
            gate.config(),
            Some(&DecoderConfig::Audio {
                codec: "mp4a.40.2".to_string(),
                sample_rate: 44100,
                channels: 2,
            })
        );
        gate.decoder.fail_next = true;
        gate.push(StreamKind::Aac, &unit, &mut events);
        assert_eq!(gate.state(), DecoderState::ErrorRecovering);
        // no key frame needed for audio
        gate.push(StreamKind::Aac, &unit, &mut events);
        assert_eq!(gate.state(), DecoderState::Ready);
        assert_matches!(
            &events[..],
            [
                DecoderEvent::AudioFrameDecoded(_),
                DecoderEvent::AudioDecodeError(_),
                DecoderEvent::AudioFrameDecoded(_),
            ]
        );
    }

    #[test]
    fn routes_by_kind() {
        let mut decoders = Decoders::new(MockDecoder::default(), MockDecoder::default());
        let mut events = vec![];
        let mut mpeg2 = unit_at(0.5);
        mpeg2.data = Bytes::from_static(&hex!("000001b3 1234 000001 00"));
        mpeg2.has_idr = true;
        decoders.push(&Ready::Mpeg2Video(mpeg2), &mut events);
        decoders.push(&Ready::Aac(unit_at(0.0)), &mut events);
        assert_eq!(decoders.video.config().map(|c| c.codec()), Some("mp4v.61"));
        assert_eq!(decoders.audio.config().map(|c| c.codec()), Some("mp4a.40.2"));
        assert_eq!(events.len(), 2);

        decoders.abort();
        assert_eq!(decoders.video.state(), DecoderState::Uninitialized);
        assert_eq!(decoders.audio.state(), DecoderState::Uninitialized);
        assert_eq!(decoders.video.decoder().resets, 1);
    }
}
