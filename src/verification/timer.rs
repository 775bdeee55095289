//! Countdown primitives shared by the session, lockout and OTP clocks.
//!
//! [`Countdown`] is the pure state: it knows how many seconds are left and
//! reports expiry exactly once. [`spawn_ticker`] and [`spawn_countdown`] put
//! a clock behind it on the tokio runtime and hand back a [`TimerHandle`] that
//! cancels the task when asked or when dropped.

use std::ops::ControlFlow;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Still counting; carries the seconds left after this tick.
    Running(u64),
    /// Reached zero on this tick. Reported once per run.
    Expired,
    /// Already expired; nothing left to count.
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    initial: u64,
    remaining: u64,
    fired: bool,
}

impl Countdown {
    #[must_use]
    pub const fn new(seconds: u64) -> Self {
        Self {
            initial: seconds,
            remaining: seconds,
            fired: false,
        }
    }

    /// Advance the countdown by one second.
    pub fn tick(&mut self) -> Tick {
        if self.fired {
            return Tick::Idle;
        }

        if self.remaining > 1 {
            self.remaining -= 1;
            Tick::Running(self.remaining)
        } else {
            self.remaining = 0;
            self.fired = true;
            Tick::Expired
        }
    }

    /// Back to the initial duration, re-arming expiry.
    pub fn restart(&mut self) {
        self.remaining = self.initial;
        self.fired = false;
    }

    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    #[must_use]
    pub const fn is_expired(&self) -> bool {
        self.fired
    }
}

/// Owning handle of a spawned clock. Dropping it cancels the clock.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Call `on_tick` once per `period` until it returns `ControlFlow::Break`.
///
/// The first call happens one full period after spawning.
///
/// # Panics
/// Panics when called outside of a tokio runtime.
pub fn spawn_ticker<F>(period: Duration, mut on_tick: F) -> TimerHandle
where
    F: FnMut() -> ControlFlow<()> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first interval tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if on_tick().is_break() {
                trace!("ticker stopped");
                break;
            }
        }
    });

    TimerHandle { task }
}

/// Drive `countdown` once per `period` and call `on_expire` when it reaches
/// zero. The callback runs at most once and the task stops right after.
///
/// # Panics
/// Panics when called outside of a tokio runtime.
pub fn spawn_countdown<E>(mut countdown: Countdown, period: Duration, on_expire: E) -> TimerHandle
where
    E: FnOnce() + Send + 'static,
{
    let mut on_expire = Some(on_expire);

    spawn_ticker(period, move || match countdown.tick() {
        Tick::Running(_) => ControlFlow::Continue(()),
        Tick::Expired => {
            if let Some(callback) = on_expire.take() {
                callback();
            }
            ControlFlow::Break(())
        }
        Tick::Idle => ControlFlow::Break(()),
    })
}
