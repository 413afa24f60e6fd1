use super::{millis, Queues, ReadySink, Strategy, AUDIO};
use crate::adts;
use crate::unit::{Ready, StreamKind};
use log::debug;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TickDrivenOptions {
    /// Audio to accumulate before playback starts
    pub initial_delay_ms: f64,
    pub tick_hz: f64,
    /// Release at most one unit of each kind per tick
    pub emit_first_frame_only: bool,
    /// Pace audio against the clock too, rather than releasing it on arrival
    pub audio_throttling: bool,
}

impl Default for TickDrivenOptions {
    fn default() -> Self {
        TickDrivenOptions {
            initial_delay_ms: 0.0,
            tick_hz: 60.0,
            emit_first_frame_only: false,
            audio_throttling: true,
        }
    }
}

/// Releases units against a virtual playback clock advanced by periodic ticks.
///
/// The clock starts at minus the initial delay when the first audio unit arrives.  Audio is
/// released as soon as it arrives, or once enough has been buffered to cover the initial delay.
/// Released audio adds its playing time to a budget which each tick spends; once the budget runs
/// out the clock stops advancing, so that video does not run ahead of audio that has not arrived.
#[derive(Debug)]
pub struct TickDriven {
    initial_delay: f64,
    period: Duration,
    emit_first_frame_only: bool,
    audio_throttling: bool,

    heard_audio: bool,
    audio_started: bool,
    audio_released: bool,
    last_tick: Option<Instant>,
    elapsed: Duration,
    /// Seconds of elapsed time during which no audio was available to play
    stalled: f64,
    /// Seconds of released audio not yet played out
    budget: f64,
}

impl TickDriven {
    const DEFAULT_PERIOD: Duration = Duration::from_nanos(1_000_000_000 / 60);

    pub fn new(options: &TickDrivenOptions) -> TickDriven {
        let period = if options.tick_hz.is_finite() && options.tick_hz > 0.0 {
            Duration::try_from_secs_f64(1.0 / options.tick_hz).unwrap_or(Self::DEFAULT_PERIOD)
        } else {
            Self::DEFAULT_PERIOD
        };
        TickDriven {
            initial_delay: millis(options.initial_delay_ms).as_secs_f64(),
            period,
            emit_first_frame_only: options.emit_first_frame_only,
            audio_throttling: options.audio_throttling,
            heard_audio: false,
            audio_started: false,
            audio_released: false,
            last_tick: None,
            elapsed: Duration::ZERO,
            stalled: 0.0,
            budget: 0.0,
        }
    }

    /// The playback position in seconds, comparable with unit decode timestamps.
    pub fn clock(&self) -> f64 {
        self.elapsed.as_secs_f64() - self.initial_delay - self.stalled
    }

    fn reset(&mut self) {
        self.heard_audio = false;
        self.audio_started = false;
        self.audio_released = false;
        self.last_tick = None;
        self.elapsed = Duration::ZERO;
        self.stalled = 0.0;
        self.budget = 0.0;
    }

    fn audio_out(&mut self, unit: Ready, sink: &mut dyn ReadySink) {
        self.budget += adts::duration(&unit.unit().data);
        self.audio_released = true;
        sink.ready(unit);
    }

    fn advance(&mut self, now: Instant) {
        if let Some(last) = self.last_tick {
            let dt = now.saturating_duration_since(last);
            self.elapsed += dt;
            if self.audio_released {
                let dt = dt.as_secs_f64();
                if self.budget >= dt {
                    self.budget -= dt;
                } else {
                    self.stalled += dt - self.budget;
                    self.budget = 0.0;
                }
            }
        }
        self.last_tick = Some(now);
    }

    /// Releases queued audio once enough is buffered to cover the initial delay.  Audio is not
    /// paced against the clock; the budget it adds is what holds the clock back.
    fn release_audio(&mut self, queues: &mut Queues, sink: &mut dyn ReadySink) {
        if !self.audio_started {
            let buffered: f64 = queues
                .get(AUDIO)
                .iter()
                .map(|u| adts::duration(&u.unit().data))
                .sum();
            if self.initial_delay > 0.0 && buffered < self.initial_delay {
                return;
            }
            debug!("starting playback with {:.3}s of audio buffered", buffered);
            self.audio_started = true;
        }
        while let Some(unit) = queues.get_mut(AUDIO).pop_front() {
            self.audio_out(unit, sink);
            if self.emit_first_frame_only {
                break;
            }
        }
    }
}

impl Strategy for TickDriven {
    fn parsed(&mut self, queues: &mut Queues, _now: Instant, unit: Ready, sink: &mut dyn ReadySink) {
        if unit.kind() == StreamKind::Aac {
            self.heard_audio = true;
            if !self.audio_throttling {
                self.audio_out(unit, sink);
                return;
            }
            queues.push(unit);
            if !self.emit_first_frame_only {
                self.release_audio(queues, sink);
            }
            return;
        }
        queues.push(unit);
    }

    fn tick(&mut self, queues: &mut Queues, now: Instant, sink: &mut dyn ReadySink) {
        if !self.heard_audio {
            return;
        }
        self.advance(now);
        if self.audio_throttling {
            self.release_audio(queues, sink);
        }
        let clock = self.clock();
        for (i, kind) in StreamKind::MEDIA.iter().enumerate() {
            if kind.is_video() {
                queues.release_while(i, self.emit_first_frame_only, sink, |u| {
                    u.unit().dts_timestamp <= clock
                });
            }
        }
    }

    fn tick_period(&self) -> Option<Duration> {
        Some(self.period)
    }

    fn start(&mut self, _now: Instant) {
        self.reset();
    }

    fn abort(&mut self) {
        self.reset();
    }
}
