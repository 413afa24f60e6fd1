use super::{millis, Queues, ReadySink, Strategy};
use crate::unit::{Ready, StreamKind};
use log::debug;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FixedDelayOptions {
    /// How long each audio unit is held before release
    pub audio_delay_ms: f64,
}

impl Default for FixedDelayOptions {
    fn default() -> Self {
        FixedDelayOptions {
            audio_delay_ms: 0.0,
        }
    }
}

/// Holds each audio unit for a fixed time.  While the audio clock is enabled, which it is from the
/// start, video is held until the audio output's timestamp reaches the unit's timestamp.  Once the
/// clock is disabled video passes straight through.
#[derive(Debug)]
pub struct FixedDelay {
    audio_delay: Duration,
    audio_clock_enabled: bool,
    delayed: VecDeque<(Instant, Ready)>,
}

impl FixedDelay {
    pub fn new(options: &FixedDelayOptions) -> FixedDelay {
        FixedDelay {
            audio_delay: millis(options.audio_delay_ms),
            audio_clock_enabled: true,
            delayed: VecDeque::new(),
        }
    }

    /// Number of audio units waiting for their delay to expire.
    pub fn delayed(&self) -> usize {
        self.delayed.len()
    }

    fn video_queues() -> impl Iterator<Item = usize> {
        (0..StreamKind::MEDIA.len()).filter(|i| StreamKind::MEDIA[*i].is_video())
    }
}

impl Strategy for FixedDelay {
    fn parsed(&mut self, queues: &mut Queues, now: Instant, unit: Ready, sink: &mut dyn ReadySink) {
        if unit.kind().is_video() {
            if self.audio_clock_enabled {
                queues.push(unit);
            } else {
                sink.ready(unit);
            }
        } else if self.audio_delay.is_zero() {
            sink.ready(unit);
        } else {
            self.delayed.push_back((now + self.audio_delay, unit));
        }
    }

    fn audio_timestamp(&mut self, queues: &mut Queues, seconds: f64, sink: &mut dyn ReadySink) {
        if !self.audio_clock_enabled {
            return;
        }
        for i in Self::video_queues() {
            queues.release_while(i, false, sink, |u| u.unit().timestamp <= seconds);
        }
    }

    fn set_audio_timestamp_enabled(
        &mut self,
        queues: &mut Queues,
        enabled: bool,
        sink: &mut dyn ReadySink,
    ) {
        if self.audio_clock_enabled && !enabled {
            debug!("audio clock disabled, releasing {} held units", queues.len());
            for i in Self::video_queues() {
                queues.release_all(i, sink);
            }
        }
        self.audio_clock_enabled = enabled;
    }

    fn poll_timers(&mut self, _queues: &mut Queues, now: Instant, sink: &mut dyn ReadySink) {
        while let Some((due, _)) = self.delayed.front() {
            if *due > now {
                break;
            }
            if let Some((_, unit)) = self.delayed.pop_front() {
                sink.ready(unit);
            }
        }
    }

    fn next_deadline(&self, _queues: &Queues) -> Option<Instant> {
        self.delayed.front().map(|(due, _)| *due)
    }

    fn abort(&mut self) {
        self.delayed.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffering::test::{audio, timestamps, video};
    use crate::buffering::{Buffering, BufferingConfig};
    use crate::unit::test::unit_at;
    use crate::unit::Parsed;

    fn fixed_delay(ms: f64) -> Buffering {
        Buffering::new(&BufferingConfig::FixedDelay(FixedDelayOptions {
            audio_delay_ms: ms,
        }))
    }

    #[test]
    fn audio_held_for_delay() {
        let mut b = fixed_delay(200.0);
        let t0 = Instant::now();
        let mut out = vec![];
        b.parsed(t0, audio(0.0), &mut out);
        b.parsed(t0 + Duration::from_millis(50), audio(0.02), &mut out);
        assert!(out.is_empty());
        assert_eq!(b.next_deadline(), Some(t0 + Duration::from_millis(200)));
        b.poll_timers(t0 + Duration::from_millis(199), &mut out);
        assert!(out.is_empty());
        b.poll_timers(t0 + Duration::from_millis(200), &mut out);
        assert_eq!(timestamps(&out), vec![(StreamKind::Aac, 0.0)]);
        b.poll_timers(t0 + Duration::from_secs(1), &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(b.next_deadline(), None);
    }

    #[test]
    fn zero_delay_is_immediate() {
        let mut b = fixed_delay(0.0);
        let mut out = vec![];
        b.parsed(Instant::now(), audio(0.0), &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn video_follows_audio_clock() {
        let mut b = fixed_delay(0.0);
        let now = Instant::now();
        let mut out = vec![];
        // held from the start, before any audio timestamp is reported
        b.parsed(now, video(5.0), &mut out);
        assert!(out.is_empty());
        b.audio_timestamp(5.0, &mut out);
        assert_eq!(timestamps(&out), vec![(StreamKind::H264, 5.0)]);
        out.clear();

        for t in [0.1, 0.2, 0.3] {
            b.parsed(now, video(t), &mut out);
        }
        b.parsed(now, Parsed::Mpeg2Video(unit_at(0.15)), &mut out);
        assert!(out.is_empty());
        b.audio_timestamp(0.2, &mut out);
        assert_eq!(
            timestamps(&out),
            vec![
                (StreamKind::H264, 0.1),
                (StreamKind::H264, 0.2),
                (StreamKind::Mpeg2Video, 0.15),
            ]
        );
        out.clear();

        b.set_audio_timestamp_enabled(false, &mut out);
        assert_eq!(timestamps(&out), vec![(StreamKind::H264, 0.3)]);
        assert_eq!(b.pending(), 0);
        out.clear();

        // without an audio clock video passes through, until it is enabled again
        b.parsed(now, video(0.4), &mut out);
        assert_eq!(out.len(), 1);
        b.set_audio_timestamp_enabled(true, &mut out);
        b.parsed(now, video(0.5), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(b.pending(), 1);
    }

    #[test]
    fn abort_drops_timers() {
        let mut b = fixed_delay(100.0);
        let t0 = Instant::now();
        let mut out = vec![];
        b.parsed(t0, audio(0.0), &mut out);
        assert_eq!(b.pending(), 1);
        b.abort();
        assert_eq!(b.pending(), 0);
        b.poll_timers(t0 + Duration::from_secs(1), &mut out);
        assert!(out.is_empty());
    }
}
