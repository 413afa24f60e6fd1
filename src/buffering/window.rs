use super::{media_index, millis, Queues, ReadySink, Strategy};
use crate::unit::{Ready, StreamKind};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowedOptions {
    /// Minimum time between video units, defaulting to one frame at 29.97Hz
    pub video_interval_ms: f64,
    /// Minimum time between audio units, defaulting to one 1024 sample AAC frame at 48kHz
    pub audio_interval_ms: f64,
}

impl Default for WindowedOptions {
    fn default() -> Self {
        WindowedOptions {
            video_interval_ms: 1000.0 / 29.97,
            audio_interval_ms: 1024.0 / 48000.0 * 1000.0,
        }
    }
}

/// Spaces out the release of each stream's units by at least a minimum interval, keeping their
/// arrival order.
#[derive(Debug)]
pub struct Windowed {
    intervals: [Duration; 3],
    last_release: [Option<Instant>; 3],
    deadlines: [Option<Instant>; 3],
}

impl Windowed {
    pub fn new(options: &WindowedOptions) -> Windowed {
        let video = millis(options.video_interval_ms);
        let audio = millis(options.audio_interval_ms);
        let mut intervals = [video; 3];
        for (i, kind) in StreamKind::MEDIA.iter().enumerate() {
            if !kind.is_video() {
                intervals[i] = audio;
            }
        }
        Windowed {
            intervals,
            last_release: [None; 3],
            deadlines: [None; 3],
        }
    }

    fn window_open(&self, index: usize, now: Instant) -> bool {
        match self.last_release[index] {
            Some(last) => now.saturating_duration_since(last) >= self.intervals[index],
            None => true,
        }
    }
}

impl Strategy for Windowed {
    fn parsed(&mut self, queues: &mut Queues, now: Instant, unit: Ready, sink: &mut dyn ReadySink) {
        let i = media_index(&unit);
        if queues.get(i).is_empty() && self.window_open(i, now) {
            self.last_release[i] = Some(now);
            sink.ready(unit);
            return;
        }
        queues.push(unit);
        if self.deadlines[i].is_none() {
            self.deadlines[i] = Some(match self.last_release[i] {
                Some(last) => last + self.intervals[i],
                None => now,
            });
        }
    }

    fn poll_timers(&mut self, queues: &mut Queues, now: Instant, sink: &mut dyn ReadySink) {
        for i in 0..self.deadlines.len() {
            match self.deadlines[i] {
                Some(due) if due <= now => {}
                _ => continue,
            }
            self.deadlines[i] = None;
            if let Some(unit) = queues.get_mut(i).pop_front() {
                self.last_release[i] = Some(now);
                sink.ready(unit);
            }
            if !queues.get(i).is_empty() {
                self.deadlines[i] = Some(now + self.intervals[i]);
            }
        }
    }

    fn next_deadline(&self, _queues: &Queues) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    fn abort(&mut self) {
        self.last_release = [None; 3];
        self.deadlines = [None; 3];
    }
}
