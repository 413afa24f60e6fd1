//! The stages wired together as tokio tasks.
//!
//! ```text
//!  source task --Input--> demux task --Parsed--> buffering task --Ready--> events
//!                                   \--------------- ID3, captions -------> events
//! ```
//!
//! Each stage is connected to the next by a bounded channel, so a slow consumer of `events`
//! applies back pressure all the way to the source.  All of a load's tasks share one
//! `CancellationToken`, which `abort()` triggers.

use crate::buffering::{self, AudioClock, Buffering};
use crate::chunker::PacketChunker;
use crate::config::PipelineConfig;
use crate::demultiplex::{DemuxConfig, Demuxer};
use crate::source::{Input, Source};
use crate::unit::{Parsed, Ready};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Send `item`, giving up if `cancel` is triggered first.  `false` if the item was not sent.
pub(crate) async fn send_or_cancel<T>(
    tx: &mpsc::Sender<T>,
    item: T,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        r = tx.send(item) => r.is_ok(),
    }
}

/// What the pipeline delivers to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A media unit to decode now
    Ready(Ready),
    /// An ID3 or caption unit, delivered as soon as it is parsed
    Metadata(Parsed),
    /// Every unit of the loaded stream has been delivered
    EndOfStream,
}

impl From<Ready> for PipelineEvent {
    fn from(unit: Ready) -> Self {
        PipelineEvent::Ready(unit)
    }
}

struct Session {
    cancel: CancellationToken,
    audio_clock: mpsc::Sender<AudioClock>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Pipeline {
    config: PipelineConfig,
    events: mpsc::Sender<PipelineEvent>,
    session: Option<Session>,
    /// Tasks of aborted loads that may still be winding down
    stopping: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, events: mpsc::Sender<PipelineEvent>) -> Pipeline {
        Pipeline {
            config,
            events,
            session: None,
            stopping: vec![],
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stops any current stream, then opens `url` and starts delivering its units.  `false` if
    /// the source could not be opened, in which case nothing is running.
    pub async fn load(&mut self, url: &str) -> bool {
        self.abort();
        info!("loading {}", url);
        match Source::open(url, &self.config.transport).await {
            Ok(source) => {
                self.load_source(source);
                true
            }
            Err(e) => {
                warn!("failed to load {}: {}", url, e);
                false
            }
        }
    }

    /// As `load()`, for a source that is already open.
    pub fn load_source(&mut self, source: Source) {
        self.abort();
        let cancel = CancellationToken::new();
        let capacity = self.config.transport.channel_capacity.max(1);
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (parsed_tx, parsed_rx) = mpsc::channel(capacity);
        let (clock_tx, clock_rx) = mpsc::channel(capacity);

        let source_cancel = cancel.clone();
        let source_task = tokio::spawn(async move {
            if let Err(e) = source.run(input_tx, source_cancel).await {
                warn!("source failed: {}", e);
            }
        });
        let demux_task = tokio::spawn(demux(
            input_rx,
            self.config.demux.clone(),
            parsed_tx,
            self.events.clone(),
            cancel.clone(),
        ));
        let buffering = Buffering::new(&self.config.buffering);
        let events = self.events.clone();
        let buffering_cancel = cancel.clone();
        let buffering_task = tokio::spawn(async move {
            buffering::run(
                buffering,
                parsed_rx,
                clock_rx,
                events.clone(),
                buffering_cancel.clone(),
            )
            .await;
            if !buffering_cancel.is_cancelled()
                && send_or_cancel(&events, PipelineEvent::EndOfStream, &buffering_cancel).await
            {
                info!("end of stream");
            }
        });
        self.session = Some(Session {
            cancel,
            audio_clock: clock_tx,
            tasks: vec![source_task, demux_task, buffering_task],
        });
    }

    pub fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    fn audio_clock(&self, msg: AudioClock) {
        if let Some(session) = &self.session {
            if session.audio_clock.try_send(msg).is_err() {
                debug!("audio clock update {:?} dropped", msg);
            }
        }
    }

    /// The playback position of the audio output, for the fixed-delay strategy.
    pub fn audio_timestamp(&self, seconds: f64) {
        self.audio_clock(AudioClock::Timestamp(seconds));
    }

    pub fn set_audio_timestamp_enabled(&self, enabled: bool) {
        self.audio_clock(if enabled {
            AudioClock::Enabled
        } else {
            AudioClock::Disabled
        });
    }

    /// Waits for every task of the current load to finish, either at the end of the stream or
    /// following `abort()`.  Tasks of earlier, aborted loads are waited for too.
    pub async fn finished(&mut self) {
        for task in self.stopping.drain(..) {
            let _ = task.await;
        }
        if let Some(session) = self.session.as_mut() {
            for task in session.tasks.drain(..) {
                let _ = task.await;
            }
        }
    }

    /// Stops the current stream, if any.  No further events are sent for it.  Calling this
    /// again has no effect.
    pub fn abort(&mut self) {
        self.stopping.retain(|task| !task.is_finished());
        if let Some(session) = self.session.take() {
            info!("aborting");
            session.cancel.cancel();
            self.stopping.extend(session.tasks);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn demux(
    mut input: mpsc::Receiver<Input>,
    config: DemuxConfig,
    parsed_tx: mpsc::Sender<Parsed>,
    events: mpsc::Sender<PipelineEvent>,
    cancel: CancellationToken,
) {
    let mut chunker = PacketChunker::new();
    let mut demuxer = Demuxer::new(&config);
    let mut parsed = vec![];
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = input.recv() => next,
        };
        let done = match next {
            Some(Input::Data(data)) => {
                chunker.push(&data, |pk| demuxer.push(&pk, &mut parsed));
                false
            }
            Some(Input::Gap) => {
                chunker.discontinuity();
                false
            }
            None => {
                demuxer.flush(&mut parsed);
                true
            }
        };
        for unit in parsed.drain(..) {
            let sent = if unit.kind().is_media() {
                send_or_cancel(&parsed_tx, unit, &cancel).await
            } else {
                send_or_cancel(&events, PipelineEvent::Metadata(unit), &cancel).await
            };
            if !sent {
                demuxer.abort();
                return;
            }
        }
        if done {
            debug!("demux finished");
            return;
        }
    }
    demuxer.abort();
    chunker.reset();
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::adts;
    use crate::demultiplex::test::{pat_packet, pcr_packet, pmt_packet};
    use crate::pes::test::{make_pes, packetize_pes};
    use crate::unit::StreamKind;
    use assert_matches::assert_matches;
    use hex_literal::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn stream() -> Vec<u8> {
        // ID3 on 0x103
        let mut packets = vec![
            pat_packet(),
            pmt_packet(&hex!("15 e103 f000")),
            pcr_packet(0x101, 0),
        ];
        let video = make_pes(0xe0, 90000, None, &hex!("00000001 65 888000"), true);
        packets.extend(packetize_pes(0x101, 1, &video));
        let audio = make_pes(0xc0, 90000, None, &adts::test::make_frame(3, 20), true);
        packets.extend(packetize_pes(0x102, 0, &audio));
        let id3 = make_pes(0xbd, 90000, None, b"ID3 tag", true);
        packets.extend(packetize_pes(0x103, 0, &id3));
        packets.concat()
    }

    async fn collect(rx: &mut mpsc::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = vec![];
        while let Some(e) = rx.recv().await {
            let end = e == PipelineEvent::EndOfStream;
            events.push(e);
            if end {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn stream_to_events() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (tx, mut rx) = mpsc::channel(16);
        let mut pipeline = Pipeline::new(PipelineConfig::default(), tx);
        // reads deliberately misaligned with packet boundaries
        pipeline.load_source(Source::from_reader(Box::new(Cursor::new(stream())), 100));
        let events = collect(&mut rx).await;
        let kinds: Vec<_> = events
            .iter()
            .map(|e| match e {
                PipelineEvent::Ready(r) => Some(r.kind()),
                PipelineEvent::Metadata(p) => Some(p.kind()),
                PipelineEvent::EndOfStream => None,
            })
            .collect();
        assert_eq!(kinds.len(), 4);
        assert!(kinds.contains(&Some(StreamKind::H264)));
        assert!(kinds.contains(&Some(StreamKind::Aac)));
        assert!(kinds.contains(&Some(StreamKind::Id3)));
        assert_eq!(kinds.last(), Some(&None));
        pipeline.finished().await;
    }

    #[tokio::test]
    async fn load_failure() {
        let (tx, _rx) = mpsc::channel(16);
        let mut pipeline = Pipeline::new(PipelineConfig::default(), tx);
        assert!(!pipeline.load("ftp://example.com/live.ts").await);
        assert!(!pipeline.load("file:///nonexistent/live.ts").await);
        assert!(!pipeline.is_loaded());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_is_idempotent() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut pipeline = Pipeline::new(PipelineConfig::default(), tx);
        // a reader that never produces data
        let (_writer, reader) = tokio::io::duplex(64);
        pipeline.load_source(Source::from_reader(Box::new(reader), 188));
        assert!(pipeline.is_loaded());
        pipeline.abort();
        pipeline.abort();
        assert!(!pipeline.is_loaded());
        let waited = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await;
        assert!(waited.is_err(), "no events after abort");
        drop(pipeline);
        assert_matches!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn no_end_of_stream_after_abort() {
        // room for one event, so the stages stall before the end of the stream is reported
        let (tx, mut rx) = mpsc::channel(1);
        let mut pipeline = Pipeline::new(PipelineConfig::default(), tx);
        pipeline.load_source(Source::from_reader(Box::new(Cursor::new(stream())), 188));
        tokio::time::sleep(Duration::from_secs(1)).await;
        pipeline.abort();
        tokio::time::timeout(Duration::from_secs(1), pipeline.finished())
            .await
            .expect("tasks stop after abort");
        let mut events = vec![];
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        assert_eq!(events.len(), 1);
        assert!(!events.contains(&PipelineEvent::EndOfStream));
    }

    #[tokio::test]
    async fn reload_replaces_stream() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut pipeline = Pipeline::new(PipelineConfig::default(), tx);
        let (_writer, reader) = tokio::io::duplex(64);
        pipeline.load_source(Source::from_reader(Box::new(reader), 188));
        pipeline.load_source(Source::from_reader(Box::new(Cursor::new(stream())), 188));
        let events = collect(&mut rx).await;
        assert_eq!(events.last(), Some(&PipelineEvent::EndOfStream));
        assert_eq!(events.len(), 4);
    }
}
