//! Reusable, dynamically (re)schedulable timeout wired into the timebase.
//!
//! Grounded in `fresh.rs`'s `Fresh<VALUE>` stale-after tracking, generalized
//! from "a value with an expiry" to "pure expiry with an FSM-visible
//! effect" — this replaces the original's function-pointer `on_expire`
//! callback with an `Event` value the timebase pushes onto the FSM's event
//! channel once the watchdog's deadline is reached.

use crate::fsm::Event;
use crate::units::Ticks;

/// Identifies one of the fixed set of watchdogs the timebase can track.
/// Acts as the original's "stable identity" key: the same
/// watchdog must never appear twice in the scheduled queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum WatchdogId {
    PcuAirNegative,
    PcuPrecharge,
    PcuAirPositive,
    Balancer,
    Programmer,
}

/// Lifecycle state of one watchdog slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
enum State {
    Init,
    Running { deadline: Ticks },
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum WatchdogError {
    Busy,
    NotRunning,
    TimedOut,
}

/// One watchdog instance: a timeout duration, current lifecycle state, and
/// the event raised on expiry.
#[derive(Debug, Clone, Copy, defmt::Format)]
pub struct Watchdog {
    id: WatchdogId,
    timeout: Ticks,
    on_expire: Event,
    state: State,
}

impl Watchdog {
    pub const fn new(id: WatchdogId, timeout: Ticks, on_expire: Event) -> Self {
        Self {
            id,
            timeout,
            on_expire,
            state: State::Init,
        }
    }

    pub fn id(&self) -> WatchdogId {
        self.id
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self.state, State::TimedOut)
    }

    /// Arm the watchdog from `Init`. A watchdog already running cannot be
    /// started again.
    pub fn start(&mut self, now: Ticks) -> Result<(), WatchdogError> {
        match self.state {
            State::Running { .. } => Err(WatchdogError::Busy),
            State::TimedOut => Err(WatchdogError::TimedOut),
            State::Init => {
                self.state = State::Running {
                    deadline: now.wrapping_add(self.timeout),
                };
                Ok(())
            }
        }
    }

    /// Refresh the deadline of a running watchdog. Fails explicitly on a
    /// stopped or expired watchdog rather than silently (re)starting it.
    pub fn reset(&mut self, now: Ticks) -> Result<(), WatchdogError> {
        match self.state {
            State::Running { .. } => {
                self.state = State::Running {
                    deadline: now.wrapping_add(self.timeout),
                };
                Ok(())
            }
            State::TimedOut => Err(WatchdogError::TimedOut),
            State::Init => Err(WatchdogError::NotRunning),
        }
    }

    /// Unregister the watchdog without firing its expire event.
    pub fn stop(&mut self) -> Result<(), WatchdogError> {
        match self.state {
            State::Running { .. } => {
                self.state = State::Init;
                Ok(())
            }
            State::TimedOut => Err(WatchdogError::TimedOut),
            State::Init => Err(WatchdogError::NotRunning),
        }
    }

    /// Force (re)arm regardless of current state, including from `TimedOut`.
    pub fn restart(&mut self, now: Ticks) {
        self.state = State::Running {
            deadline: now.wrapping_add(self.timeout),
        };
    }

    pub fn deadline(&self) -> Option<Ticks> {
        match self.state {
            State::Running { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Called by the timebase when `now >= deadline`. Transitions to
    /// `TimedOut` and returns the event to raise.
    pub(crate) fn expire_for_timebase(&mut self) -> Event {
        self.state = State::TimedOut;
        self.on_expire
    }
}

/// Owns every watchdog slot and the scheduling order. Only the timebase
/// touches this directly; `Pcu`/`Balancer`/`Programmer` hold `WatchdogId`s
/// and call through the timebase.
#[cfg(test)]
pub(crate) fn pop_expired(watchdogs: &mut [Watchdog], now: Ticks) -> heapless::Vec<Event, 8> {
    let mut out = heapless::Vec::new();
    for wd in watchdogs.iter_mut() {
        if let Some(deadline) = wd.deadline() {
            if now.wrapping_sub(deadline) < (Ticks::MAX / 2) && now >= deadline {
                let event = wd.expire_for_timebase();
                let _ = out.push(event);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wd() -> Watchdog {
        Watchdog::new(WatchdogId::Balancer, 100, Event::BalancingStop)
    }

    #[test]
    fn start_then_expire() {
        let mut w = wd();
        w.start(0).unwrap();
        assert!(w.is_running());
        let events = pop_expired(core::slice::from_mut(&mut w), 100);
        assert_eq!(events.as_slice(), &[Event::BalancingStop]);
        assert!(w.is_timed_out());
    }

    #[test]
    fn reset_extends_deadline() {
        let mut w = wd();
        w.start(0).unwrap();
        w.reset(50).unwrap();
        assert_eq!(w.deadline(), Some(150));
    }

    #[test]
    fn double_start_is_busy() {
        let mut w = wd();
        w.start(0).unwrap();
        assert_eq!(w.start(0), Err(WatchdogError::Busy));
    }

    #[test]
    fn reset_on_stopped_watchdog_fails() {
        let mut w = wd();
        assert_eq!(w.reset(0), Err(WatchdogError::NotRunning));
    }

    #[test]
    fn restart_recovers_from_timed_out() {
        let mut w = wd();
        w.start(0).unwrap();
        pop_expired(core::slice::from_mut(&mut w), 100);
        assert!(w.is_timed_out());
        w.restart(200);
        assert!(w.is_running());
    }
}
