//! Periodic task table: the fixed list of work the timebase dispatches.
//!
//! Grounded in the original firmware's `tasks.h` X-macro table: each row has a first-run tick, an interval and an
//! enabled-by-default flag. `interval == 0` means "run once." The table
//! itself is static data; `crate::timebase::Timebase` is what actually
//! schedules these via its min-heap.

use crate::conf::{task_rate, CELLBOARD_COUNT};
use crate::units::Ticks;

/// One entry per row of the original `TASKS_X_LIST`. Per-cellboard version
/// tasks keep the original's six explicit entries rather than folding them
/// into a `(TaskId, CellboardId)` pair, matching the source table 1:1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum TaskId {
    SendMainboardVersion,
    SendCellboardVersion(u8),
    SendStatus,
    SendBalancingStatus,
    SendCurrent,
    SendPower,
    SendTsVoltage,
    SendCellsVoltage,
    SendFeedbackStatus,
    SendFeedbackDigital,
    SendFeedbackAnalog,
    SendFeedbackAnalogSd,
    SendImdStatus,
    SendCellboardSetBalancingStatus,
    ReadDigitalFeedbacks,
    StartAnalogConversionFeedbacks,
    UpdateFeedbacksStatus,
    StartInternalVoltageConversion,
}

/// Total number of task rows (fixed, six of which are the per-cellboard
/// version senders).
pub const TASK_COUNT: usize = 12 + CELLBOARD_COUNT;

#[derive(Debug, Clone, Copy)]
pub struct TaskDef {
    pub id: TaskId,
    pub enabled_by_default: bool,
    pub start: Ticks,
    pub interval: Ticks,
}

/// The task table in source order, used by the timebase to seed its heap
/// at `init`.
pub fn table() -> [TaskDef; TASK_COUNT] {
    let mut table = [TaskDef {
        id: TaskId::SendMainboardVersion,
        enabled_by_default: true,
        start: 0,
        interval: task_rate::MAINBOARD_VERSION_MS,
    }; TASK_COUNT];
    let mut i = 1;
    for cb in 0..CELLBOARD_COUNT as u8 {
        table[i] = TaskDef {
            id: TaskId::SendCellboardVersion(cb),
            enabled_by_default: true,
            start: cb as Ticks,
            interval: task_rate::CELLBOARD_VERSION_MS,
        };
        i += 1;
    }
    table[i] = TaskDef {
        id: TaskId::SendStatus,
        enabled_by_default: true,
        start: 0,
        interval: task_rate::STATUS_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::SendBalancingStatus,
        enabled_by_default: true,
        start: 0,
        interval: task_rate::BALANCING_STATUS_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::SendCurrent,
        enabled_by_default: true,
        start: 10,
        interval: task_rate::CURRENT_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::SendPower,
        enabled_by_default: true,
        start: 10,
        interval: task_rate::POWER_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::SendTsVoltage,
        enabled_by_default: true,
        start: 0,
        interval: task_rate::TS_VOLTAGE_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::SendCellsVoltage,
        enabled_by_default: true,
        start: 10,
        interval: task_rate::CELLS_VOLTAGE_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::SendFeedbackStatus,
        enabled_by_default: true,
        start: 10,
        interval: task_rate::FEEDBACK_STATUS_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::SendFeedbackDigital,
        enabled_by_default: true,
        start: 10,
        interval: task_rate::FEEDBACK_DIGITAL_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::SendFeedbackAnalog,
        enabled_by_default: true,
        start: 10,
        interval: task_rate::FEEDBACK_ANALOG_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::SendFeedbackAnalogSd,
        enabled_by_default: true,
        start: 10,
        interval: task_rate::FEEDBACK_ANALOG_SD_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::SendImdStatus,
        enabled_by_default: true,
        start: 0,
        interval: task_rate::IMD_STATUS_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::SendCellboardSetBalancingStatus,
        enabled_by_default: false, // disabled by default, matching the original table
        start: 0,
        interval: task_rate::CELLBOARD_SET_BALANCING_STATUS_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::ReadDigitalFeedbacks,
        enabled_by_default: true,
        start: 0,
        interval: task_rate::FEEDBACK_ACQUIRE_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::StartAnalogConversionFeedbacks,
        enabled_by_default: true,
        start: 0,
        interval: task_rate::FEEDBACK_ACQUIRE_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::UpdateFeedbacksStatus,
        enabled_by_default: true,
        start: 2,
        interval: task_rate::FEEDBACK_ACQUIRE_MS,
    };
    i += 1;
    table[i] = TaskDef {
        id: TaskId::StartInternalVoltageConversion,
        enabled_by_default: true,
        start: 0,
        interval: task_rate::INTERNAL_VOLTAGE_ACQUIRE_MS,
    };
    let _ = i;
    table
}
