//! A periodic timer running as its own task, controlled by messages.
//!
//! Clock-driven buffering strategies use this so that the timing of ticks is not disturbed by
//! whatever the task consuming them happens to be doing.

use log::trace;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Messages to the ticker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerCommand {
    /// Begin ticking at the given period, replacing any previous period
    Start { period: Duration },
    /// Stop ticking until the next `Start`
    Stop,
}

/// Messages from the ticker task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickerEvent {
    Tick,
}

/// Handle to a running ticker task.
pub struct Ticker {
    commands: mpsc::Sender<TickerCommand>,
    events: mpsc::Receiver<TickerEvent>,
    task: JoinHandle<()>,
}

impl Ticker {
    /// Ticks are not queued up behind a slow consumer; a tick is skipped if the previous one has
    /// not yet been received.
    const EVENT_CAPACITY: usize = 1;

    /// Spawns the ticker task, initially stopped.  The task ends when `cancel` is triggered or
    /// the `Ticker` is dropped.
    pub fn spawn(cancel: CancellationToken) -> Ticker {
        let (commands, command_rx) = mpsc::channel(4);
        let (event_tx, events) = mpsc::channel(Self::EVENT_CAPACITY);
        let task = tokio::spawn(run(command_rx, event_tx, cancel));
        Ticker {
            commands,
            events,
            task,
        }
    }

    pub async fn start(&self, period: Duration) {
        let _ = self.commands.send(TickerCommand::Start { period }).await;
    }

    pub async fn stop(&self) {
        let _ = self.commands.send(TickerCommand::Stop).await;
    }

    /// Waits for the next tick.  `None` once the ticker task has ended.
    pub async fn tick(&mut self) -> Option<TickerEvent> {
        self.events.recv().await
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut commands: mpsc::Receiver<TickerCommand>,
    events: mpsc::Sender<TickerEvent>,
    cancel: CancellationToken,
) {
    let mut interval: Option<Interval> = None;
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            cmd = commands.recv() => match cmd {
                Some(TickerCommand::Start { period }) => {
                    let mut i = time::interval(period);
                    i.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    interval = Some(i);
                }
                Some(TickerCommand::Stop) => interval = None,
                None => break,
            },

            _ = async {
                match interval.as_mut() {
                    Some(i) => {
                        i.tick().await;
                    }
                    None => std::future::pending().await,
                }
            } => {
                if events.try_send(TickerEvent::Tick).is_err() {
                    trace!("tick not yet consumed, skipping");
                }
            }
        }
    }
}
