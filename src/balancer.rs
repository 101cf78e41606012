//! Per-cellboard passive balancing command, gated by a single dead-man
//! watchdog shared across every board.
//!
//! Grounded in the original `balancer.h`'s threshold/target bounds and in
//! `can_queue.rs`'s style of building an outgoing payload ahead of
//! transmission.

use heapless::Vec;

use crate::conf::{
    BALANCER_TARGET_MAX, BALANCER_TARGET_MIN, BALANCER_THRESHOLD_MAX, BALANCER_THRESHOLD_MIN,
    CELLBOARD_COUNT,
};
use crate::timebase::Timebase;
use crate::units::Millivolts;
use crate::voltage::VoltageAggregator;
use crate::watchdog::WatchdogId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum BalancerError {
    ThresholdOutOfRange,
    TargetOutOfRange,
}

/// Discharge command for one cellboard: discharge any cell whose voltage is
/// `threshold` above `target`, clamped to the pack minimum so balancing
/// never chases a target below what is actually achievable.
#[derive(Clone, Copy, Default, defmt::Format)]
pub struct BoardCommand {
    pub mask: u16,
}

pub struct Balancer {
    active: bool,
    threshold: Millivolts,
    target: Millivolts,
    commands: [BoardCommand; CELLBOARD_COUNT],
}

impl Default for Balancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer {
    pub fn new() -> Self {
        Self {
            active: false,
            threshold: BALANCER_THRESHOLD_MIN,
            target: BALANCER_TARGET_MIN,
            commands: [BoardCommand::default(); CELLBOARD_COUNT],
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn threshold(&self) -> Millivolts {
        self.threshold
    }

    pub fn target(&self) -> Millivolts {
        self.target
    }

    /// Validate and latch the threshold/target pair, then (re)compute every
    /// board's discharge mask against the current voltage snapshot.
    pub fn handle_command(
        &mut self,
        threshold: Millivolts,
        target: Millivolts,
        voltages: &VoltageAggregator,
    ) -> Result<(), BalancerError> {
        if !(BALANCER_THRESHOLD_MIN..=BALANCER_THRESHOLD_MAX).contains(&threshold) {
            return Err(BalancerError::ThresholdOutOfRange);
        }
        if !(BALANCER_TARGET_MIN..=BALANCER_TARGET_MAX).contains(&target) {
            return Err(BalancerError::TargetOutOfRange);
        }
        self.threshold = threshold;
        self.target = target;
        self.recompute(voltages);
        Ok(())
    }

    fn recompute(&mut self, voltages: &VoltageAggregator) {
        let target = self.target.max(voltages.pack_min());
        for (board, cmd) in self.commands.iter_mut().enumerate() {
            let mut mask = 0u16;
            for cell in 0..crate::conf::CELLS_PER_BOARD {
                let v = voltages.cell(board as u8, cell as u8);
                if v >= target + self.threshold {
                    mask |= 1 << cell;
                }
            }
            cmd.mask = mask;
        }
    }

    pub fn board_command(&self, board: u8) -> BoardCommand {
        self.commands[board as usize]
    }

    /// Arm the dead-man watchdog and begin discharging.
    pub fn start(&mut self, tb: &mut Timebase) {
        self.active = true;
        let _ = tb.register_watchdog(WatchdogId::Balancer);
        defmt::info!("balancer: started");
    }

    /// Disarm the watchdog and zero every board's discharge mask.
    pub fn stop(&mut self, tb: &mut Timebase) {
        self.active = false;
        self.commands = [BoardCommand::default(); CELLBOARD_COUNT];
        let _ = tb.unregister_watchdog(WatchdogId::Balancer);
        defmt::info!("balancer: stopped");
    }

    /// Refresh the dead-man watchdog; called on every upstream balancing
    /// heartbeat so an unresponsive master stops balancing within
    /// `BALANCER_WATCHDOG_TIMEOUT`.
    pub fn pet(&mut self, tb: &mut Timebase) {
        if self.active {
            let _ = tb.update_watchdog(WatchdogId::Balancer);
        }
    }

    /// Called by the FSM when `Event::BalancingStop` was raised by the
    /// timebase (watchdog expiry), not a direct command.
    pub fn watchdog_expired(&mut self) {
        self.active = false;
        self.commands = [BoardCommand::default(); CELLBOARD_COUNT];
        defmt::warn!("balancer: watchdog expired, discharging stopped");
    }

    pub fn active_boards(&self) -> Vec<u8, CELLBOARD_COUNT> {
        let mut out = Vec::new();
        for (i, cmd) in self.commands.iter().enumerate() {
            if cmd.mask != 0 {
                let _ = out.push(i as u8);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::Watchdog;
    use crate::fsm::Event;

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
    fn rejects_out_of_range_threshold() {
        let mut bal = Balancer::new();
        let voltages = VoltageAggregator::new();
        assert_eq!(
            bal.handle_command(BALANCER_THRESHOLD_MIN - 1, BALANCER_TARGET_MIN, &voltages),
            Err(BalancerError::ThresholdOutOfRange)
        );
    }

    #[test]
    fn discharges_cells_above_target_plus_threshold() {
        let mut bal = Balancer::new();
        let mut voltages = VoltageAggregator::new();
        let mut errors = crate::error::ErrorTable::new();
        voltages.update(0, 0, 4100, 0, &mut errors);
        voltages.update(0, 1, 3900, 0, &mut errors);
        bal.handle_command(50, 3900, &voltages).unwrap();
        let cmd = bal.board_command(0);
        assert_eq!(cmd.mask & 0b1, 0b1);
        assert_eq!(cmd.mask & 0b10, 0);
    }

    #[test]
    fn watchdog_expiry_clears_all_boards() {
        let mut bal = Balancer::new();
        let mut tb = timebase();
        bal.start(&mut tb);
        for _ in 0..3_000 {
            tb.inc_tick();
        }
        let (_, events) = tb.routine().unwrap();
        assert!(events.contains(&Event::BalancingStop));
        bal.watchdog_expired();
        assert!(!bal.is_active());
    }
}
