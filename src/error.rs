//! Error taxonomy: grouped, instanced, timeout-expirable fault flags.
//!
//! Grounded in the original firmware's `error.h` (group/instance/timestamp/
//! running/expired model) and in `fresh.rs`'s staleness idiom, generalized
//! here from "one value with an expiry" to "a table of flags each with its
//! own set-tick and group timeout".

use heapless::Vec;

use crate::conf::error_timeout;
use crate::units::Ticks;

/// Distinct fault categories. Each group has its own expiry timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum ErrorGroup {
    Post,
    CanComm,
    UnderVoltage,
    OverVoltage,
    UnderTemperature,
    OverTemperature,
    OverCurrent,
}

impl ErrorGroup {
    /// Ticks after which a still-set error in this group is considered
    /// expired (latched fault).
    const fn timeout(self) -> Ticks {
        match self {
            ErrorGroup::Post => error_timeout::POST,
            ErrorGroup::CanComm => error_timeout::CAN_COMM,
            ErrorGroup::UnderVoltage => error_timeout::UNDER_VOLTAGE,
            ErrorGroup::OverVoltage => error_timeout::OVER_VOLTAGE,
            ErrorGroup::UnderTemperature => error_timeout::UNDER_TEMPERATURE,
            ErrorGroup::OverTemperature => error_timeout::OVER_TEMPERATURE,
            ErrorGroup::OverCurrent => error_timeout::OVER_CURRENT,
        }
    }
}

/// Disambiguates instances within a group: per-cellboard, per-cell,
/// per-bus, or a single global instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum ErrorInstance {
    Global,
    Bus(crate::can_comm::CanNetwork),
    Cell { cellboard: u8, cell: u8 },
    Sensor { cellboard: u8, sensor: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
struct ErrorEntry {
    group: ErrorGroup,
    instance: ErrorInstance,
    set_at: Ticks,
    running: bool,
    expired: bool,
}

/// Maximum number of concurrently-tracked distinct `(group, instance)` faults.
const ERROR_CAPACITY: usize = 64;

/// Table of currently-tracked errors. A fault not present in the table is
/// implicitly not-set; `set`/`reset` create and remove entries.
pub struct ErrorTable {
    entries: Vec<ErrorEntry, ERROR_CAPACITY>,
}

impl Default for ErrorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorTable {
    pub const fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn find_mut(&mut self, group: ErrorGroup, instance: ErrorInstance) -> Option<&mut ErrorEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.group == group && e.instance == instance)
    }

    /// Set (or refresh) an error. Recording the set-tick starts the
    /// group-specific expiry countdown; setting an already-set error does
    /// not reset its timer (matching the original's "set" semantics, which
    /// only records the *first* set tick until reset).
    pub fn set(&mut self, group: ErrorGroup, instance: ErrorInstance, now: Ticks) {
        if let Some(entry) = self.find_mut(group, instance) {
            entry.running = true;
            return;
        }
        if self
            .entries
            .push(ErrorEntry {
                group,
                instance,
                set_at: now,
                running: true,
                expired: false,
            })
            .is_err()
        {
            defmt::error!("error table full, dropping error {:?}/{:?}", group, instance);
        }
    }

    /// Clear an error before it has expired. A no-op if it isn't running.
    pub fn reset(&mut self, group: ErrorGroup, instance: ErrorInstance) {
        self.entries
            .retain(|e| !(e.group == group && e.instance == instance));
    }

    /// Advance expiry bookkeeping. Must be called once per timebase pass.
    pub fn routine(&mut self, now: Ticks) {
        for entry in self.entries.iter_mut() {
            if entry.running && !entry.expired && now.wrapping_sub(entry.set_at) >= entry.group.timeout() {
                entry.expired = true;
                defmt::warn!("error {:?}/{:?} expired", entry.group, entry.instance);
            }
        }
    }

    /// True if any tracked error has expired — the FSM treats this as a
    /// forced TS-OFF condition.
    pub fn any_expired(&self) -> bool {
        self.entries.iter().any(|e| e.expired)
    }

    /// Aggregate counts for one group, published on the telemetry bus.
    pub fn group_counts(&self, group: ErrorGroup) -> (u8, u8) {
        let mut running = 0u8;
        let mut expired = 0u8;
        for entry in self.entries.iter().filter(|e| e.group == group) {
            if entry.expired {
                expired += 1;
            } else if entry.running {
                running += 1;
            }
        }
        (running, expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_reset_never_expires() {
        let mut table = ErrorTable::new();
        table.set(ErrorGroup::OverCurrent, ErrorInstance::Global, 0);
        table.reset(ErrorGroup::OverCurrent, ErrorInstance::Global);
        table.routine(10_000);
        assert!(!table.any_expired());
    }

    #[test]
    fn expires_after_group_timeout() {
        let mut table = ErrorTable::new();
        table.set(ErrorGroup::OverCurrent, ErrorInstance::Global, 0);
        table.routine(error_timeout::OVER_CURRENT - 1);
        assert!(!table.any_expired());
        table.routine(error_timeout::OVER_CURRENT);
        assert!(table.any_expired());
    }

    #[test]
    fn distinct_instances_tracked_independently() {
        let mut table = ErrorTable::new();
        table.set(
            ErrorGroup::OverVoltage,
            ErrorInstance::Cell { cellboard: 0, cell: 3 },
            0,
        );
        table.set(
            ErrorGroup::OverVoltage,
            ErrorInstance::Cell { cellboard: 1, cell: 3 },
            0,
        );
        let (running, _) = table.group_counts(ErrorGroup::OverVoltage);
        assert_eq!(running, 2);
    }

    #[test]
    fn table_full_drops_without_panic() {
        let mut table = ErrorTable::new();
        for cell in 0..ERROR_CAPACITY as u8 + 4 {
            table.set(
                ErrorGroup::OverVoltage,
                ErrorInstance::Cell { cellboard: 0, cell },
                0,
            );
        }
        assert!(table.entries.len() <= ERROR_CAPACITY);
    }
}
