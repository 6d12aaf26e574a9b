//! Lifecycle plumbing for components which own a periodic background task.
//!
//! The task wakes on whichever comes first: a control signal (pause, resume, close) or a timer
//! tick. Control flags are flipped by callers, who then notify the task. The task is the only
//! thing which acts on ticks.
//!
//! Pause and resume signals only tell the task to look at the `paused` flag again. Concurrent
//! callers can deliver them out of order, so the flag is the source of truth, not the signal.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    runtime::Handle,
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::debug;

use crate::Error;

/// Work performed by the background task on every tick.
pub(crate) trait Replenish: Send + Sync + 'static {
    fn on_tick(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Pause,
    Resume,
    Close,
}

#[derive(Debug, Default)]
struct Flags {
    closed: AtomicBool,
    paused: AtomicBool,
}

/// Owns the background task. Closing (or dropping) the lifecycle stops the task.
#[derive(Debug)]
pub(crate) struct Lifecycle {
    flags: Arc<Flags>,
    signals: mpsc::UnboundedSender<Signal>,
}

impl Lifecycle {
    /// Spawn a task on the current Tokio runtime which calls `target` every `period`.
    ///
    /// The first tick happens one full `period` after starting.
    pub(crate) fn start<R: Replenish>(target: Arc<R>, period: Duration) -> Result<Self, Error> {
        let runtime = Handle::try_current()?;

        let flags = Arc::new(Flags::default());
        let (signals, receiver) = mpsc::unbounded_channel();

        let first_tick = Instant::now() + period;
        runtime.spawn(run(target, first_tick, period, flags.clone(), receiver));

        Ok(Self { flags, signals })
    }

    pub(crate) fn pause(&self) -> bool {
        if self.is_closed() || !flip(&self.flags.paused, false, true) {
            return false;
        }
        debug!("pausing");
        self.notify(Signal::Pause);
        true
    }

    pub(crate) fn resume(&self) -> bool {
        if self.is_closed() || !flip(&self.flags.paused, true, false) {
            return false;
        }
        debug!("resuming");
        self.notify(Signal::Resume);
        true
    }

    /// Returns true for exactly one caller.
    pub(crate) fn close(&self) -> bool {
        if !flip(&self.flags.closed, false, true) {
            return false;
        }
        debug!("closing");
        self.notify(Signal::Close);
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.flags.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.flags.paused.load(Ordering::SeqCst)
    }

    fn notify(&self, signal: Signal) {
        if self.signals.send(signal).is_err() {
            // The runtime hosting the task has shut down.
            debug!(?signal, "background task already stopped");
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.close();
    }
}

fn flip(flag: &AtomicBool, from: bool, to: bool) -> bool {
    flag.compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst).is_ok()
}

async fn run<R: Replenish>(
    target: Arc<R>,
    first_tick: Instant,
    period: Duration,
    flags: Arc<Flags>,
    mut signals: mpsc::UnboundedReceiver<Signal>,
) {
    let mut ticker = time::interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(?period, "background task started");

    loop {
        tokio::select! {
            biased;

            signal = signals.recv() => match signal {
                Some(Signal::Pause | Signal::Resume) => {
                    if !while_paused(&flags, &mut signals).await {
                        break;
                    }
                }
                Some(Signal::Close) | None => break,
            },

            _ = ticker.tick() => {
                if !flags.closed.load(Ordering::SeqCst) && !flags.paused.load(Ordering::SeqCst) {
                    target.on_tick();
                }
            }
        }
    }

    debug!("background task stopped");
}

/// Wait for the `paused` flag to clear, re-checking it after every signal. The timer is not polled
/// meanwhile.
///
/// Every flip of the flag is followed by a signal, so the last flip is always seen here.
///
/// Returns false if closed instead of resumed.
async fn while_paused(flags: &Flags, signals: &mut mpsc::UnboundedReceiver<Signal>) -> bool {
    while flags.paused.load(Ordering::SeqCst) {
        match signals.recv().await {
            Some(Signal::Close) | None => return false,
            Some(Signal::Pause | Signal::Resume) => {}
        }
    }
    !flags.closed.load(Ordering::SeqCst)
}
