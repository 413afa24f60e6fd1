//! Strategies for pacing the release of access units to the decoder.
//!
//! A [`Buffering`](struct.Buffering.html) value sits between the demultiplexer and the decoder.
//! It is told about each parsed access unit, and about the passing of time, and passes units on
//! to a [`ReadySink`](trait.ReadySink.html) according to one of several policies:
//!
//!  - `PassThrough` releases everything immediately
//!  - `FixedDelay` holds audio back by a fixed time, and video until an external audio clock
//!    reaches its timestamp
//!  - `TickDriven` runs a virtual clock advanced by a periodic ticker, and releases units whose
//!    decode time the clock has reached
//!  - `Windowed` enforces a minimum interval between the releases of each stream
//!
//! The policy code itself does no I/O and reads no clocks: the current time is passed in, and
//! `next_deadline()` says when `poll_timers()` should next be called.  [`run()`](fn.run.html)
//! drives a `Buffering` from channels using tokio timers.

mod fixed_delay;
mod pass_through;
mod tick;
mod window;

pub use self::fixed_delay::{FixedDelay, FixedDelayOptions};
pub use self::pass_through::PassThrough;
pub use self::tick::{TickDriven, TickDrivenOptions};
pub use self::window::{Windowed, WindowedOptions};

use crate::config::ConfigError;
use crate::pipeline::send_or_cancel;
use crate::ticker::Ticker;
use crate::unit::{Parsed, Ready, StreamKind};
use log::trace;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Receives the units a `Buffering` releases.
pub trait ReadySink {
    fn ready(&mut self, unit: Ready);
}

impl ReadySink for Vec<Ready> {
    fn ready(&mut self, unit: Ready) {
        self.push(unit);
    }
}

/// Which policy to use, and its settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum BufferingConfig {
    #[default]
    PassThrough,
    FixedDelay(FixedDelayOptions),
    TickDriven(TickDrivenOptions),
    Windowed(WindowedOptions),
}

impl BufferingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            BufferingConfig::PassThrough => Ok(()),
            BufferingConfig::FixedDelay(o) => check_millis("audio_delay_ms", o.audio_delay_ms),
            BufferingConfig::TickDriven(o) => {
                check_millis("initial_delay_ms", o.initial_delay_ms)?;
                if !(o.tick_hz.is_finite() && o.tick_hz > 0.0) {
                    return Err(ConfigError::Invalid(format!(
                        "tick_hz must be positive, got {}",
                        o.tick_hz
                    )));
                }
                Ok(())
            }
            BufferingConfig::Windowed(o) => {
                check_millis("video_interval_ms", o.video_interval_ms)?;
                check_millis("audio_interval_ms", o.audio_interval_ms)
            }
        }
    }
}

fn check_millis(name: &str, ms: f64) -> Result<(), ConfigError> {
    if ms.is_finite() && ms >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} must be a non-negative number of milliseconds, got {}",
            name, ms
        )))
    }
}

/// Converts a millisecond setting, treating values `validate()` would reject as zero.
pub(crate) fn millis(ms: f64) -> Duration {
    if ms.is_finite() && ms > 0.0 {
        Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::ZERO)
    } else {
        Duration::ZERO
    }
}

/// Position of the unit's kind within `StreamKind::MEDIA`.
pub(crate) fn media_index(unit: &Ready) -> usize {
    match unit {
        Ready::H264(_) => 0,
        Ready::Aac(_) => 1,
        Ready::Mpeg2Video(_) => 2,
    }
}

/// Index of the audio queue.
pub(crate) const AUDIO: usize = 1;

/// Per-kind queues of units not yet released, ordered by arrival.
#[derive(Default, Debug)]
pub struct Queues {
    queues: [VecDeque<Ready>; 3],
}

impl Queues {
    pub(crate) fn push(&mut self, unit: Ready) {
        self.queues[media_index(&unit)].push_back(unit);
    }

    pub(crate) fn get(&self, index: usize) -> &VecDeque<Ready> {
        &self.queues[index]
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> &mut VecDeque<Ready> {
        &mut self.queues[index]
    }

    /// Number of units of the given kind waiting.
    pub fn len_of(&self, kind: StreamKind) -> usize {
        StreamKind::MEDIA
            .iter()
            .position(|k| *k == kind)
            .map(|i| self.queues[i].len())
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release the front units of queue `index` in order for as long as `eligible` allows, at
    /// most one if `first_only` is set.
    pub(crate) fn release_while<F>(
        &mut self,
        index: usize,
        first_only: bool,
        sink: &mut dyn ReadySink,
        mut eligible: F,
    ) -> usize
    where
        F: FnMut(&Ready) -> bool,
    {
        let mut count = 0;
        while let Some(front) = self.queues[index].front() {
            if !eligible(front) {
                break;
            }
            if let Some(unit) = self.queues[index].pop_front() {
                sink.ready(unit);
                count += 1;
            }
            if first_only {
                break;
            }
        }
        count
    }

    pub(crate) fn release_all(&mut self, index: usize, sink: &mut dyn ReadySink) {
        for unit in self.queues[index].drain(..) {
            sink.ready(unit);
        }
    }

    pub(crate) fn clear(&mut self) {
        for q in self.queues.iter_mut() {
            q.clear();
        }
    }
}

/// The behaviour particular to each policy.  Methods a policy does not need do nothing.
trait Strategy {
    fn parsed(&mut self, queues: &mut Queues, now: Instant, unit: Ready, sink: &mut dyn ReadySink);

    fn tick(&mut self, _queues: &mut Queues, _now: Instant, _sink: &mut dyn ReadySink) {}

    fn audio_timestamp(&mut self, _queues: &mut Queues, _seconds: f64, _sink: &mut dyn ReadySink) {
    }

    fn set_audio_timestamp_enabled(
        &mut self,
        _queues: &mut Queues,
        _enabled: bool,
        _sink: &mut dyn ReadySink,
    ) {
    }

    fn poll_timers(&mut self, _queues: &mut Queues, _now: Instant, _sink: &mut dyn ReadySink) {}

    fn next_deadline(&self, _queues: &Queues) -> Option<Instant> {
        None
    }

    fn tick_period(&self) -> Option<Duration> {
        None
    }

    fn start(&mut self, _now: Instant) {}

    fn abort(&mut self);
}

pub enum Policy {
    PassThrough(PassThrough),
    FixedDelay(FixedDelay),
    TickDriven(TickDriven),
    Windowed(Windowed),
}

impl Policy {
    fn strategy(&self) -> &dyn Strategy {
        match self {
            Policy::PassThrough(p) => p,
            Policy::FixedDelay(p) => p,
            Policy::TickDriven(p) => p,
            Policy::Windowed(p) => p,
        }
    }

    fn strategy_mut(&mut self) -> &mut dyn Strategy {
        match self {
            Policy::PassThrough(p) => p,
            Policy::FixedDelay(p) => p,
            Policy::TickDriven(p) => p,
            Policy::Windowed(p) => p,
        }
    }
}

/// Holds parsed access units until the configured policy releases them.
pub struct Buffering {
    queues: Queues,
    policy: Policy,
}

impl Buffering {
    pub fn new(config: &BufferingConfig) -> Buffering {
        let policy = match config {
            BufferingConfig::PassThrough => Policy::PassThrough(PassThrough),
            BufferingConfig::FixedDelay(o) => Policy::FixedDelay(FixedDelay::new(o)),
            BufferingConfig::TickDriven(o) => Policy::TickDriven(TickDriven::new(o)),
            BufferingConfig::Windowed(o) => Policy::Windowed(Windowed::new(o)),
        };
        Buffering {
            queues: Queues::default(),
            policy,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    /// A unit arrived from the demultiplexer.  ID3 and caption units are not paced, and are
    /// ignored.
    pub fn parsed<S: ReadySink>(&mut self, now: Instant, parsed: Parsed, sink: &mut S) {
        let kind = parsed.kind();
        match Ready::new(kind, parsed.into_unit()) {
            Some(unit) => self
                .policy
                .strategy_mut()
                .parsed(&mut self.queues, now, unit, sink),
            None => trace!("{:?} unit is not buffered", kind),
        }
    }

    /// A tick of the periodic ticker, for policies with a `tick_period()`.
    pub fn tick<S: ReadySink>(&mut self, now: Instant, sink: &mut S) {
        self.policy
            .strategy_mut()
            .tick(&mut self.queues, now, sink);
    }

    /// The playback position of the audio output, in seconds on the same scale as unit
    /// timestamps.
    pub fn audio_timestamp<S: ReadySink>(&mut self, seconds: f64, sink: &mut S) {
        self.policy
            .strategy_mut()
            .audio_timestamp(&mut self.queues, seconds, sink);
    }

    /// Whether an audio clock is available to pace video against.
    pub fn set_audio_timestamp_enabled<S: ReadySink>(&mut self, enabled: bool, sink: &mut S) {
        self.policy
            .strategy_mut()
            .set_audio_timestamp_enabled(&mut self.queues, enabled, sink);
    }

    /// Release anything whose timer has expired by `now`.
    pub fn poll_timers<S: ReadySink>(&mut self, now: Instant, sink: &mut S) {
        self.policy
            .strategy_mut()
            .poll_timers(&mut self.queues, now, sink);
    }

    /// When `poll_timers()` next needs to be called, if at all.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.policy.strategy().next_deadline(&self.queues)
    }

    /// How often `tick()` should be called, for the clock-driven policies.
    pub fn tick_period(&self) -> Option<Duration> {
        self.policy.strategy().tick_period()
    }

    pub fn start(&mut self, now: Instant) {
        self.policy.strategy_mut().start(now);
    }

    /// Number of units being held.
    pub fn pending(&self) -> usize {
        self.queues.len() + self.policy_pending()
    }

    fn policy_pending(&self) -> usize {
        match &self.policy {
            Policy::FixedDelay(p) => p.delayed(),
            _ => 0,
        }
    }

    /// Drop every held unit and timer, and reset any clock.
    pub fn abort(&mut self) {
        self.queues.clear();
        self.policy.strategy_mut().abort();
    }
}

/// Input from the audio output, for `FixedDelay` pacing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AudioClock {
    Timestamp(f64),
    Enabled,
    Disabled,
}

/// Drives `buffering` until `cancel` is triggered, or until the `parsed` channel has closed and
/// every held unit has been released.
///
/// Policies with a tick period get a [`Ticker`](../ticker/struct.Ticker.html) task, started here
/// and stopped on return.
pub async fn run<T: From<Ready>>(
    mut buffering: Buffering,
    mut parsed: mpsc::Receiver<Parsed>,
    mut audio_clock: mpsc::Receiver<AudioClock>,
    ready: mpsc::Sender<T>,
    cancel: CancellationToken,
) {
    let mut ticker = None;
    if let Some(period) = buffering.tick_period() {
        let t = Ticker::spawn(cancel.child_token());
        t.start(period).await;
        ticker = Some(t);
    }
    buffering.start(Instant::now());
    let mut out: Vec<Ready> = vec![];
    let mut input_done = false;
    'run: loop {
        if input_done && buffering.pending() == 0 {
            break;
        }
        let deadline = buffering.next_deadline();
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            Some(_) = async {
                match ticker.as_mut() {
                    Some(t) => t.tick().await,
                    None => std::future::pending().await,
                }
            } => buffering.tick(Instant::now(), &mut out),

            _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                buffering.poll_timers(Instant::now(), &mut out);
            }

            Some(clock) = audio_clock.recv() => match clock {
                AudioClock::Timestamp(t) => buffering.audio_timestamp(t, &mut out),
                AudioClock::Enabled => buffering.set_audio_timestamp_enabled(true, &mut out),
                AudioClock::Disabled => buffering.set_audio_timestamp_enabled(false, &mut out),
            },

            unit = parsed.recv(), if !input_done => match unit {
                Some(unit) => buffering.parsed(Instant::now(), unit, &mut out),
                None => input_done = true,
            },
        }
        for unit in out.drain(..) {
            if !send_or_cancel(&ready, T::from(unit), &cancel).await {
                break 'run;
            }
        }
    }
    buffering.abort();
    if let Some(t) = ticker {
        t.stop().await;
    }
}
