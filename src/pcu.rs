//! Pack Control Unit: translates logical contactor commands into pin levels
//! and arms per-command watchdogs.
//!
//! Grounded in the original firmware's `pcu.h` for the exact timeouts and
//! precharge-ratio constant, and in `hardware.rs`'s pin-wrapper style plus
//! the `inverted-pin` crate for the AIR-open-when-HIGH / AMS-OK-when-HIGH
//! polarity.

use crate::conf::{PCU_AIRN_TIMEOUT, PCU_AIRP_TIMEOUT, PCU_PRECHARGE_TIMEOUT};
use crate::timebase::Timebase;
use crate::watchdog::WatchdogId;

/// The four contactor-circuit pins the PCU drives. AIRs are open when
/// HIGH; AMS is OK when HIGH.
pub trait PcuPins {
    fn set_air_negative(&mut self, open: bool);
    fn set_air_positive(&mut self, open: bool);
    fn set_precharge(&mut self, engaged: bool);
    fn set_ams(&mut self, ok: bool);
}

pub struct Pcu {
    airn_closed: bool,
    airp_closed: bool,
    precharge_engaged: bool,
}

impl Default for Pcu {
    fn default() -> Self {
        Self::new()
    }
}

impl Pcu {
    pub const fn new() -> Self {
        Self {
            airn_closed: false,
            airp_closed: false,
            precharge_engaged: false,
        }
    }

    pub fn airn_close(&mut self, pins: &mut impl PcuPins, tb: &mut Timebase) {
        pins.set_air_negative(false); // closed
        self.airn_closed = true;
        let _ = tb.register_watchdog(WatchdogId::PcuAirNegative);
        defmt::info!("pcu: AIR- close commanded, watchdog armed for {} ticks", PCU_AIRN_TIMEOUT);
    }

    /// Starts the PRECHARGE watchdog and engages the precharge relay.
    pub fn precharge_start(&mut self, pins: &mut impl PcuPins, tb: &mut Timebase) {
        pins.set_precharge(true);
        self.precharge_engaged = true;
        let _ = tb.register_watchdog(WatchdogId::PcuPrecharge);
        defmt::info!("pcu: precharge start commanded");
    }

    pub fn precharge_stop(&mut self, pins: &mut impl PcuPins, tb: &mut Timebase) {
        pins.set_precharge(false);
        self.precharge_engaged = false;
        let _ = tb.unregister_watchdog(WatchdogId::PcuPrecharge);
    }

    pub fn airp_close(&mut self, pins: &mut impl PcuPins, tb: &mut Timebase) {
        pins.set_air_positive(false); // closed
        self.airp_closed = true;
        let _ = tb.register_watchdog(WatchdogId::PcuAirPositive);
        defmt::info!("pcu: AIR+ close commanded, watchdog armed for {} ticks", PCU_AIRP_TIMEOUT);
    }

    /// Deinit all watchdogs, restore the safe pin pattern (AIRs open,
    /// precharge off, AMS asserted), re-init watchdogs.
    pub fn reset_all(&mut self, pins: &mut impl PcuPins, tb: &mut Timebase) {
        let _ = tb.unregister_watchdog(WatchdogId::PcuAirNegative);
        let _ = tb.unregister_watchdog(WatchdogId::PcuPrecharge);
        let _ = tb.unregister_watchdog(WatchdogId::PcuAirPositive);

        pins.set_air_negative(true); // open
        pins.set_air_positive(true); // open
        pins.set_precharge(false);
        pins.set_ams(true);
        self.airn_closed = false;
        self.airp_closed = false;
        self.precharge_engaged = false;

        defmt::info!("pcu: reset_all, pack in safe state");
    }

    pub fn is_airn_closed(&self) -> bool {
        self.airn_closed
    }

    pub fn is_airp_closed(&self) -> bool {
        self.airp_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::Watchdog;
    use crate::fsm::Event;

    #[derive(Default)]
    struct FakePins {
        air_negative_open: Option<bool>,
        air_positive_open: Option<bool>,
        precharge_engaged: Option<bool>,
        ams_ok: Option<bool>,
    }

    impl PcuPins for FakePins {
        fn set_air_negative(&mut self, open: bool) {
            self.air_negative_open = Some(open);
        }
        fn set_air_positive(&mut self, open: bool) {
            self.air_positive_open = Some(open);
        }
        fn set_precharge(&mut self, engaged: bool) {
            self.precharge_engaged = Some(engaged);
        }
        fn set_ams(&mut self, ok: bool) {
            self.ams_ok = Some(ok);
        }
    }

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
    fn reset_all_restores_safe_pattern() {
        let mut pcu = Pcu::new();
        let mut pins = FakePins::default();
        let mut tb = timebase();
        pcu.reset_all(&mut pins, &mut tb);
        assert_eq!(pins.air_negative_open, Some(true));
        assert_eq!(pins.air_positive_open, Some(true));
        assert_eq!(pins.precharge_engaged, Some(false));
        assert_eq!(pins.ams_ok, Some(true));
    }

    #[test]
    fn precharge_start_drives_the_precharge_pin() {
        let mut pcu = Pcu::new();
        let mut pins = FakePins::default();
        let mut tb = timebase();
        pcu.precharge_start(&mut pins, &mut tb);
        assert_eq!(pins.precharge_engaged, Some(true));
        assert_eq!(pins.air_positive_open, None);
    }

    #[test]
    fn precharge_stop_releases_the_precharge_pin() {
        let mut pcu = Pcu::new();
        let mut pins = FakePins::default();
        let mut tb = timebase();
        pcu.precharge_start(&mut pins, &mut tb);
        pcu.precharge_stop(&mut pins, &mut tb);
        assert_eq!(pins.precharge_engaged, Some(false));
    }
}
