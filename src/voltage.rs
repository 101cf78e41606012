//! Cell voltage matrix: fuses cellboard voltage reports into the pack-wide
//! 6xN grid consulted by the balancer and telemetry tasks.

use crate::conf::{CELLS_PER_BOARD, CELLBOARD_COUNT, CELL_VOLTAGE_MAX, CELL_VOLTAGE_MIN};
use crate::error::{ErrorGroup, ErrorInstance, ErrorTable};
use crate::units::{Millivolts, Ticks};

pub struct VoltageAggregator {
    cells: [[Millivolts; CELLS_PER_BOARD]; CELLBOARD_COUNT],
}

impl Default for VoltageAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl VoltageAggregator {
    /// Initialized to the maximum allowed so the balancer never erroneously
    /// sees a "minimum" before data arrives.
    pub fn new() -> Self {
        Self {
            cells: [[CELL_VOLTAGE_MAX; CELLS_PER_BOARD]; CELLBOARD_COUNT],
        }
    }

    /// Handler for the cellboard voltage CAN message. Out-of-range readings
    /// raise a per-`(cellboard, cell)` error instance instead of being
    /// clamped.
    pub fn update(&mut self, cellboard: u8, cell: u8, value: Millivolts, now: Ticks, errors: &mut ErrorTable) {
        self.cells[cellboard as usize][cell as usize] = value;
        let instance = ErrorInstance::Cell { cellboard, cell };
        if value < CELL_VOLTAGE_MIN {
            errors.set(ErrorGroup::UnderVoltage, instance, now);
        } else {
            errors.reset(ErrorGroup::UnderVoltage, instance);
        }
        if value > CELL_VOLTAGE_MAX {
            errors.set(ErrorGroup::OverVoltage, instance, now);
        } else {
            errors.reset(ErrorGroup::OverVoltage, instance);
        }
    }

    pub fn cell(&self, cellboard: u8, cell: u8) -> Millivolts {
        self.cells[cellboard as usize][cell as usize]
    }

    /// Minimum voltage across the whole pack, used by the balancer to clamp
    /// the discharge target.
    pub fn pack_min(&self) -> Millivolts {
        self.cells
            .iter()
            .flat_map(|board| board.iter())
            .copied()
            .min()
            .unwrap_or(CELL_VOLTAGE_MAX)
    }

    pub fn pack_max(&self) -> Millivolts {
        self.cells
            .iter()
            .flat_map(|board| board.iter())
            .copied()
            .max()
            .unwrap_or(CELL_VOLTAGE_MIN)
    }

    /// Sum of every cell, used by the internal-voltage consistency check.
    pub fn pack_sum(&self) -> i64 {
        self.cells
            .iter()
            .flat_map(|board| board.iter())
            .map(|&v| v as i64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_aggregator_reports_max_until_updated() {
        let agg = VoltageAggregator::new();
        assert_eq!(agg.pack_min(), CELL_VOLTAGE_MAX);
    }

    #[test]
    fn out_of_range_reading_raises_error_without_clamping() {
        let mut agg = VoltageAggregator::new();
        let mut errors = ErrorTable::new();
        agg.update(0, 0, CELL_VOLTAGE_MIN - 50, 0, &mut errors);
        assert_eq!(agg.cell(0, 0), CELL_VOLTAGE_MIN - 50);
        let (running, _) = errors.group_counts(ErrorGroup::UnderVoltage);
        assert_eq!(running, 1);
    }

    #[test]
    fn returning_to_range_clears_the_error() {
        let mut agg = VoltageAggregator::new();
        let mut errors = ErrorTable::new();
        agg.update(0, 0, CELL_VOLTAGE_MIN - 50, 0, &mut errors);
        agg.update(0, 0, 3700, 1, &mut errors);
        let (running, _) = errors.group_counts(ErrorGroup::UnderVoltage);
        assert_eq!(running, 0);
    }
}
