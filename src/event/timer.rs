//! Timer List
//!
//! Timers are kept in a small unordered `Vec`. Finding the next deadline or
//! the due timers is a linear scan, which is fine for the handful of timers a
//! server installs (the cron, plus whatever tests schedule).
//!
//! A `Cycle` timer is re-armed relative to the moment its callback ran, so a
//! slow callback pushes every later firing back (drift is not compensated).

use super::EventLoop;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Interval used when a non-positive interval is requested.
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// Callback invoked when a timer fires. Receives its own id so it can cancel
/// itself.
pub type TimeProc<S> = Rc<dyn Fn(&mut EventLoop<S>, &mut S, TimerId)>;

/// Identifies a scheduled timer. Ids start at 1 and never repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a timer fires once or repeatedly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Once,
    Cycle,
}

pub(crate) struct TimeEvent<S> {
    id: TimerId,
    when: Instant,
    interval: Duration,
    kind: TimerKind,
    proc: TimeProc<S>,
}

/// Converts a millisecond interval, clamping non-positive values.
pub fn interval_from_millis(ms: i64) -> Duration {
    if ms <= 0 {
        MIN_INTERVAL
    } else {
        Duration::from_millis(ms as u64)
    }
}

pub(crate) struct Timers<S> {
    events: Vec<TimeEvent<S>>,
    next_id: u64,
}

impl<S> Timers<S> {
    pub(crate) fn new() -> Self {
        Self {
            events: Vec::new(),
            next_id: 1,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn contains(&self, id: TimerId) -> bool {
        self.events.iter().any(|t| t.id == id)
    }

    pub(crate) fn schedule(
        &mut self,
        now: Instant,
        interval: Duration,
        kind: TimerKind,
        proc: TimeProc<S>,
    ) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.events.push(TimeEvent {
            id,
            when: now + interval,
            interval,
            kind,
            proc,
        });
        id
    }

    /// Removes a timer. Returns false if it was not scheduled.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        match self.events.iter().position(|t| t.id == id) {
            Some(pos) => {
                self.events.remove(pos);
                true
            }
            None => false,
        }
    }

    /// How long the poller may block: time until the earliest deadline, or
    /// `MIN_INTERVAL` when there is no timer or the earliest one is already due.
    pub(crate) fn wait_budget(&self, now: Instant) -> Duration {
        self.events
            .iter()
            .map(|t| t.when)
            .min()
            .map(|when| when.saturating_duration_since(now))
            .filter(|budget| !budget.is_zero())
            .unwrap_or(MIN_INTERVAL)
    }

    /// Timers whose deadline is at or before `now`, in list order.
    pub(crate) fn due(&self, now: Instant) -> Vec<(TimerId, TimeProc<S>)> {
        self.events
            .iter()
            .filter(|t| t.when <= now)
            .map(|t| (t.id, Rc::clone(&t.proc)))
            .collect()
    }

    /// Applies the post-fire rule: `Once` timers are removed, `Cycle` timers
    /// move to `now + interval`. A timer that cancelled itself stays gone.
    pub(crate) fn fired(&mut self, id: TimerId, now: Instant) {
        let Some(pos) = self.events.iter().position(|t| t.id == id) else {
            return;
        };
        match self.events[pos].kind {
            TimerKind::Once => {
                self.events.remove(pos);
            }
            TimerKind::Cycle => {
                let timer = &mut self.events[pos];
                timer.when = now + timer.interval;
            }
        }
    }
}
