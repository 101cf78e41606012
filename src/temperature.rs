//! Cell temperature matrix, same ownership/mutation rules as the voltage
//! aggregator.

use crate::conf::{CELLBOARD_COUNT, CELL_TEMP_MAX, CELL_TEMP_MIN, TEMPS_PER_BOARD};
use crate::error::{ErrorGroup, ErrorInstance, ErrorTable};
use crate::units::{Celsius, Ticks};

pub struct TemperatureAggregator {
    temps: [[Celsius; TEMPS_PER_BOARD]; CELLBOARD_COUNT],
}

impl Default for TemperatureAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl TemperatureAggregator {
    pub fn new() -> Self {
        Self {
            temps: [[CELL_TEMP_MIN; TEMPS_PER_BOARD]; CELLBOARD_COUNT],
        }
    }

    pub fn update(&mut self, cellboard: u8, sensor: u8, value: Celsius, now: Ticks, errors: &mut ErrorTable) {
        self.temps[cellboard as usize][sensor as usize] = value;
        let instance = ErrorInstance::Sensor { cellboard, sensor };
        if value < CELL_TEMP_MIN {
            errors.set(ErrorGroup::UnderTemperature, instance, now);
        } else {
            errors.reset(ErrorGroup::UnderTemperature, instance);
        }
        if value > CELL_TEMP_MAX {
            errors.set(ErrorGroup::OverTemperature, instance, now);
        } else {
            errors.reset(ErrorGroup::OverTemperature, instance);
        }
    }

    pub fn sensor(&self, cellboard: u8, sensor: u8) -> Celsius {
        self.temps[cellboard as usize][sensor as usize]
    }

    pub fn pack_max(&self) -> Celsius {
        self.temps
            .iter()
            .flat_map(|board| board.iter())
            .copied()
            .max()
            .unwrap_or(CELL_TEMP_MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overtemperature_raises_error() {
        let mut agg = TemperatureAggregator::new();
        let mut errors = ErrorTable::new();
        agg.update(2, 1, CELL_TEMP_MAX + 5, 0, &mut errors);
        let (running, _) = errors.group_counts(ErrorGroup::OverTemperature);
        assert_eq!(running, 1);
        assert_eq!(agg.pack_max(), CELL_TEMP_MAX + 5);
    }
}
