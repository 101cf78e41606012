//! Flash-request handshake: arms a dead-man watchdog, collects a per-
//! cellboard ready bitmask, and lets the FSM decide when to reset.
//!
//! Grounded in the original's `programmer.c`; the reset call itself moved
//! into `FsmContext::system_reset` so this module stays a pure bitmask/flag
//! tracker, same split as `Pcu`/`Balancer` against the timebase.

use crate::conf::{CELLBOARD_COUNT, PROGRAMMER_READY_TIMEOUT};
use crate::timebase::Timebase;
use crate::watchdog::WatchdogId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum FlashTarget {
    Mainboard,
    Cellboard(u8),
}

pub struct Programmer {
    flash_request: bool,
    flashing: bool,
    flash_stop: bool,
    target: FlashTarget,
    cellboard_ready: u16,
}

impl Default for Programmer {
    fn default() -> Self {
        Self::new()
    }
}

const READY_MASK: u16 = (1u16 << CELLBOARD_COUNT) - 1;

impl Programmer {
    pub const fn new() -> Self {
        Self {
            flash_request: false,
            flashing: false,
            flash_stop: false,
            target: FlashTarget::Mainboard,
            cellboard_ready: 0,
        }
    }

    pub fn is_requested(&self) -> bool {
        self.flash_request
    }

    pub fn target(&self) -> FlashTarget {
        self.target
    }

    /// Handles the incoming flash-request message. A request is ignored
    /// while one is already in progress; gating on FSM state (`Idle` or
    /// `Fatal` only) is the caller's responsibility, same as the original
    /// checking `fsm_get_status()` before calling in.
    pub fn request(&mut self, target: FlashTarget, tb: &mut Timebase) {
        if self.flash_request {
            return;
        }
        self.target = target;
        self.flash_request = true;
        self.flash_stop = false;
        self.flashing = false;
        self.cellboard_ready = 0;
        let _ = tb.register_watchdog(WatchdogId::Programmer);
        defmt::info!(
            "programmer: flash request accepted, watchdog armed for {} ticks",
            PROGRAMMER_READY_TIMEOUT
        );
    }

    pub fn handle_cellboard_ready(&mut self, cellboard: u8, ready: bool) {
        if !self.flash_request || cellboard as usize >= CELLBOARD_COUNT {
            return;
        }
        if ready {
            self.cellboard_ready |= 1 << cellboard;
        } else {
            self.cellboard_ready &= !(1 << cellboard);
        }
    }

    pub fn all_ready(&self) -> bool {
        self.flash_request && (self.cellboard_ready & READY_MASK) == READY_MASK
    }

    /// Handles the actual flash start/stop command. Start refreshes the
    /// watchdog; stop disarms it and clears every flag.
    pub fn handle_flash(&mut self, start: bool, tb: &mut Timebase) {
        if start == self.flashing {
            return;
        }
        if start {
            let _ = tb.update_watchdog(WatchdogId::Programmer);
            self.flashing = true;
        } else {
            let _ = tb.unregister_watchdog(WatchdogId::Programmer);
            self.flash_request = false;
            self.flashing = false;
            self.flash_stop = true;
            self.cellboard_ready = 0;
        }
    }

    /// Called by the FSM when `Event::ProgrammerTimeout` was raised by the
    /// timebase (watchdog expiry).
    pub fn watchdog_expired(&mut self) {
        self.flash_request = false;
        self.flashing = false;
        self.flash_stop = false;
        self.cellboard_ready = 0;
        defmt::warn!("programmer: flash-ready watchdog expired, aborting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::Event;
    use crate::watchdog::Watchdog;

    fn timebase() -> Timebase {
        let watchdogs = [
            Watchdog::new(WatchdogId::PcuAirNegative, 1_000, Event::AirnTimeout),
            Watchdog::new(WatchdogId::PcuPrecharge, 15_000, Event::PrechargeTimeout),
            Watchdog::new(WatchdogId::PcuAirPositive, 1_000, Event::AirpTimeout),
            Watchdog::new(WatchdogId::Balancer, 3_000, Event::BalancingStop),
            Watchdog::new(WatchdogId::Programmer, 5_000, Event::ProgrammerTimeout),
        ];
        let mut tb = Timebase::new(1, watchdogs);
        tb.set_enable(true);
        tb
    }

    #[test]
    fn not_all_ready_until_every_cellboard_reports() {
        let mut prog = Programmer::new();
        let mut tb = timebase();
        prog.request(FlashTarget::Mainboard, &mut tb);
        for board in 0..CELLBOARD_COUNT as u8 - 1 {
            prog.handle_cellboard_ready(board, true);
        }
        assert!(!prog.all_ready());
        prog.handle_cellboard_ready(CELLBOARD_COUNT as u8 - 1, true);
        assert!(prog.all_ready());
    }

    #[test]
    fn watchdog_timeout_surfaces_as_event_and_resets_state() {
        let mut prog = Programmer::new();
        let mut tb = timebase();
        prog.request(FlashTarget::Mainboard, &mut tb);
        for _ in 0..PROGRAMMER_READY_TIMEOUT {
            tb.inc_tick();
        }
        let (_, events) = tb.routine().unwrap();
        assert!(events.contains(&Event::ProgrammerTimeout));
        prog.watchdog_expired();
        assert!(!prog.is_requested());
    }

    #[test]
    fn second_request_while_in_progress_is_ignored() {
        let mut prog = Programmer::new();
        let mut tb = timebase();
        prog.request(FlashTarget::Cellboard(1), &mut tb);
        prog.request(FlashTarget::Mainboard, &mut tb);
        assert_eq!(prog.target(), FlashTarget::Cellboard(1));
    }
}
