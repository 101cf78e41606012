//! TS voltage, pack voltage, precharge-heatsink temperature and IMD-TS
//! connection — four scalars polled synchronously from the external ADC.

use crate::conf::{INTERNAL_VOLTAGE_DELTA_MAX, PCU_PRECHARGE_RATIO};
use crate::units::{Celsius, Millivolts};

#[derive(Default)]
pub struct InternalVoltage {
    ts_voltage: Millivolts,
    pack_voltage: Millivolts,
    precharge_heatsink_temp: Celsius,
    imd_ts_connected: bool,
}

impl InternalVoltage {
    pub const fn new() -> Self {
        Self {
            ts_voltage: 0,
            pack_voltage: 0,
            precharge_heatsink_temp: 0,
            imd_ts_connected: false,
        }
    }

    pub fn update(&mut self, ts_voltage: Millivolts, pack_voltage: Millivolts, heatsink_temp: Celsius, imd_ts_connected: bool) {
        self.ts_voltage = ts_voltage;
        self.pack_voltage = pack_voltage;
        self.precharge_heatsink_temp = heatsink_temp;
        self.imd_ts_connected = imd_ts_connected;
    }

    pub fn ts_voltage(&self) -> Millivolts {
        self.ts_voltage
    }

    pub fn pack_voltage(&self) -> Millivolts {
        self.pack_voltage
    }

    pub fn precharge_heatsink_temp(&self) -> Celsius {
        self.precharge_heatsink_temp
    }

    /// Precharge is complete when `ts_voltage / pack_voltage >= 0.95`. The
    /// PCU only asks this question; it never auto-closes AIR+ itself.
    pub fn precharge_complete(&self) -> bool {
        if self.pack_voltage <= 0 {
            return false;
        }
        (self.ts_voltage as f32 / self.pack_voltage as f32) >= PCU_PRECHARGE_RATIO
    }

    /// At ts-on: `|TS - sum cells| <= DELTA_V` else fault.
    pub fn consistent_with_cells(&self, cell_sum: i64) -> bool {
        let delta = (self.ts_voltage as i64 - cell_sum).unsigned_abs();
        delta <= INTERNAL_VOLTAGE_DELTA_MAX as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precharge_complete_at_ratio_threshold() {
        let mut iv = InternalVoltage::new();
        iv.update(380_000, 400_000, 25, true);
        assert!(iv.precharge_complete());
        iv.update(200_000, 400_000, 25, true);
        assert!(!iv.precharge_complete());
    }

    #[test]
    fn zero_pack_voltage_never_reads_complete() {
        let iv = InternalVoltage::new();
        assert!(!iv.precharge_complete());
    }

    #[test]
    fn consistency_check_detects_divergence() {
        let mut iv = InternalVoltage::new();
        iv.update(400_000, 400_000, 25, true);
        assert!(iv.consistent_with_cells(400_000));
        assert!(!iv.consistent_with_cells(300_000));
    }
}
