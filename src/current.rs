//! Pack current, a single signed raw reading from the IVT sensor CAN
//! message, range-checked against `[I_MIN, I_MAX]`.

use crate::conf::{PACK_CURRENT_MAX, PACK_CURRENT_MIN};
use crate::error::{ErrorGroup, ErrorInstance, ErrorTable};
use crate::units::{Milliamps, Ticks};

pub struct CurrentSensor {
    value: Milliamps,
}

impl Default for CurrentSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrentSensor {
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    pub fn update(&mut self, value: Milliamps, now: Ticks, errors: &mut ErrorTable) {
        self.value = value;
        if value < PACK_CURRENT_MIN || value > PACK_CURRENT_MAX {
            errors.set(ErrorGroup::OverCurrent, ErrorInstance::Global, now);
        } else {
            errors.reset(ErrorGroup::OverCurrent, ErrorInstance::Global);
        }
    }

    pub fn value(&self) -> Milliamps {
        self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_current_raises_error() {
        let mut current = CurrentSensor::new();
        let mut errors = ErrorTable::new();
        current.update(PACK_CURRENT_MAX + 1, 0, &mut errors);
        let (running, _) = errors.group_counts(ErrorGroup::OverCurrent);
        assert_eq!(running, 1);
    }
}
