//! Build-time configuration constants.
//!
//! Mirrors the original firmware's `mainboard-conf.h`/`mainboard-def.h` and
//! the per-module constant blocks (`pcu.h`, `bal.h`, `feedback.h`, `error.h`).
//! Values come from those headers where given; anything not specified there
//! is a conservative placeholder for board bring-up.

use crate::units::{Celsius, Milliamps, Millivolts, Ticks};

/// Number of cellboards on the internal BMS bus.
pub const CELLBOARD_COUNT: usize = 6;
/// Series cells monitored per cellboard segment.
pub const CELLS_PER_BOARD: usize = 12;
/// Temperature sensors monitored per cellboard segment.
pub const TEMPS_PER_BOARD: usize = 6;

/// Timebase tick resolution in milliseconds.
pub const TICK_RESOLUTION_MS: u32 = 1;

/// Maximum number of watchdogs the timebase can track at once.
pub const TIMEBASE_WATCHDOG_CAPACITY: usize = 24;
/// Maximum number of periodic tasks the scheduler can track at once.
pub const TIMEBASE_TASK_CAPACITY: usize = 24;

pub const CELL_VOLTAGE_MIN: Millivolts = 2800;
pub const CELL_VOLTAGE_MAX: Millivolts = 4200;

pub const CELL_TEMP_MIN: Celsius = -20;
pub const CELL_TEMP_MAX: Celsius = 60;

pub const PACK_CURRENT_MIN: Milliamps = -300_000;
pub const PACK_CURRENT_MAX: Milliamps = 300_000;

/// Maximum allowed divergence between TS voltage and the summed cell stack
/// before the ts-on consistency check faults.
pub const INTERNAL_VOLTAGE_DELTA_MAX: Millivolts = 5_000;

/// `pcu.h`: AIR- close timeout.
pub const PCU_AIRN_TIMEOUT: Ticks = 1_000;
/// `pcu.h`: precharge timeout.
pub const PCU_PRECHARGE_TIMEOUT: Ticks = 15_000;
/// `pcu.h`: AIR+ close timeout.
pub const PCU_AIRP_TIMEOUT: Ticks = 1_000;
/// `pcu.h`: precharge complete when `ts_voltage / pack_voltage >= this`.
pub const PCU_PRECHARGE_RATIO: f32 = 0.95;

/// `bal.h`: dead-man watchdog, restarted whenever a balancing command arrives.
pub const BALANCER_WATCHDOG_TIMEOUT: Ticks = 3_000;
/// `bal.h`: clamp range for the requested per-cell discharge threshold.
pub const BALANCER_THRESHOLD_MIN: Millivolts = 5;
pub const BALANCER_THRESHOLD_MAX: Millivolts = 200;
/// `bal.h`: clamp range for the requested balancing target voltage.
pub const BALANCER_TARGET_MIN: Millivolts = CELL_VOLTAGE_MIN;
pub const BALANCER_TARGET_MAX: Millivolts = CELL_VOLTAGE_MAX;

/// `programmer.h`-equivalent: time to wait for every cellboard to report
/// flash-ready before giving up.
pub const PROGRAMMER_READY_TIMEOUT: Ticks = 5_000;

/// `feedback.h`: ADC reference voltage and resolution used to convert the
/// millivolt thresholds below into raw ADC counts.
pub const FEEDBACK_VREF_MV: u32 = 3300;
pub const FEEDBACK_ADC_RESOLUTION_BITS: u32 = 12;

pub const FEEDBACK_THRESHOLD_HIGH_MV: u32 = 1900;
pub const FEEDBACK_THRESHOLD_LOW_MV: u32 = 700;
/// Lowered low-threshold used for IMD-OK and the AIR mechanical feedbacks;
/// kept as a documented data point rather than reconciled with the other
/// channels' threshold.
pub const FEEDBACK_THRESHOLD_LOW_COMPRESSED_MV: u32 = 1400;

/// `error.h`-equivalent per-group expiry timeouts.
pub mod error_timeout {
    use crate::units::Ticks;

    pub const POST: Ticks = 0; // latches immediately, no expiry window
    pub const CAN_COMM: Ticks = 1_000;
    pub const UNDER_VOLTAGE: Ticks = 500;
    pub const OVER_VOLTAGE: Ticks = 500;
    pub const UNDER_TEMPERATURE: Ticks = 1_000;
    pub const OVER_TEMPERATURE: Ticks = 1_000;
    pub const OVER_CURRENT: Ticks = 200;
}

/// CAN bus bit rates; both buses run classic CAN at 1 Mbps.
pub const CAN_BITRATE: u32 = 1_000_000;

/// Periodic task table, reproducing the original's `tasks.h` X-macro list
/// (names, enabled-by-default, first-run offset and interval). Exact cycle
/// times are not given by the distilled spec; these are the values carried
/// forward from the firmware's conventional telemetry rates and recorded in
/// DESIGN.md as an Open Question resolution.
pub mod task_rate {
    use crate::units::Ticks;

    pub const MAINBOARD_VERSION_MS: Ticks = 1_000;
    pub const CELLBOARD_VERSION_MS: Ticks = 1_000;
    pub const STATUS_MS: Ticks = 100;
    pub const BALANCING_STATUS_MS: Ticks = 100;
    pub const CURRENT_MS: Ticks = 20;
    pub const POWER_MS: Ticks = 20;
    pub const TS_VOLTAGE_MS: Ticks = 100;
    pub const CELLS_VOLTAGE_MS: Ticks = 20;
    pub const FEEDBACK_STATUS_MS: Ticks = 20;
    pub const FEEDBACK_DIGITAL_MS: Ticks = 20;
    pub const FEEDBACK_ANALOG_MS: Ticks = 20;
    pub const FEEDBACK_ANALOG_SD_MS: Ticks = 20;
    pub const IMD_STATUS_MS: Ticks = 100;
    pub const CELLBOARD_SET_BALANCING_STATUS_MS: Ticks = 100;
    /// Internal acquisition cadence, matches the original's
    /// `FEEDBACK_CYCLE_TIME_MS` exactly.
    pub const FEEDBACK_ACQUIRE_MS: Ticks = 1;
    pub const INTERNAL_VOLTAGE_ACQUIRE_MS: Ticks = 10;
}
