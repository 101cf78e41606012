//! Monotonic tick counter and priority-queue-driven dispatcher for periodic
//! tasks and watchdogs.
//!
//! This is the one data structure in the crate that gets genuine
//! algorithmic attention: a fixed-capacity
//! binary min-heap per queue, `heapless::BinaryHeap<_, Min, _>` (already a
//! teacher dependency via `can_queue.rs`'s TX heap, there used as `Max`).
//! Watchdog re-scheduling needs a find-by-identity update, implemented as a
//! linear drain-and-rebuild.

use heapless::binary_heap::Min;
use heapless::BinaryHeap;

use crate::conf::{TIMEBASE_TASK_CAPACITY, TIMEBASE_WATCHDOG_CAPACITY};
use crate::fsm::Event;
use crate::scheduler::{self, TaskDef, TaskId, TASK_COUNT};
use crate::units::Ticks;
use crate::watchdog::{Watchdog, WatchdogError, WatchdogId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum TimebaseError {
    Disabled,
    WatchdogNotRegistered,
    WatchdogUnavailable,
}

#[derive(Clone, Copy)]
struct TaskSlot {
    def: TaskDef,
    enabled: bool,
}

#[derive(Clone, Copy, Eq, PartialEq)]
struct ScheduledTask {
    deadline: Ticks,
    slot: u8,
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}
impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Copy, Eq, PartialEq)]
struct ScheduledWatchdog {
    deadline: Ticks,
    slot: u8,
}

impl Ord for ScheduledWatchdog {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}
impl PartialOrd for ScheduledWatchdog {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Timebase {
    t: Ticks,
    enabled: bool,
    resolution_ms: u32,
    tasks: [TaskSlot; TASK_COUNT],
    task_heap: BinaryHeap<ScheduledTask, Min, TIMEBASE_TASK_CAPACITY>,
    watchdogs: [Watchdog; 5],
    watchdog_heap: BinaryHeap<ScheduledWatchdog, Min, TIMEBASE_WATCHDOG_CAPACITY>,
}

/// Fixed watchdog identities, in `WatchdogId` declaration order, giving
/// each a stable slot index.
const WATCHDOG_IDS: [WatchdogId; 5] = [
    WatchdogId::PcuAirNegative,
    WatchdogId::PcuPrecharge,
    WatchdogId::PcuAirPositive,
    WatchdogId::Balancer,
    WatchdogId::Programmer,
];

impl Timebase {
    pub fn new(resolution_ms: u32, watchdogs: [Watchdog; 5]) -> Self {
        let defs = scheduler::table();
        let mut tasks = [TaskSlot {
            def: defs[0],
            enabled: defs[0].enabled_by_default,
        }; TASK_COUNT];
        let mut task_heap = BinaryHeap::new();
        for (i, def) in defs.into_iter().enumerate() {
            tasks[i] = TaskSlot {
                def,
                enabled: def.enabled_by_default,
            };
            if def.enabled_by_default {
                let _ = task_heap.push(ScheduledTask {
                    deadline: def.start,
                    slot: i as u8,
                });
            }
        }
        Self {
            t: 0,
            enabled: false,
            resolution_ms,
            tasks,
            task_heap,
            watchdogs,
            watchdog_heap: BinaryHeap::new(),
        }
    }

    pub fn set_enable(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Bumps the tick by one. A no-op while disabled, so ticks do not
    /// accumulate in disabled state.
    pub fn inc_tick(&mut self) {
        if self.enabled {
            self.t = self.t.wrapping_add(1);
        }
    }

    pub fn get_tick(&self) -> Ticks {
        self.t
    }

    pub fn get_time_ms(&self) -> u32 {
        self.t.wrapping_mul(self.resolution_ms)
    }

    pub fn get_resolution_ms(&self) -> u32 {
        self.resolution_ms
    }

    pub fn set_task_enabled(&mut self, id: TaskId, enabled: bool) {
        if let Some((i, slot)) = self
            .tasks
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.def.id == id)
        {
            let was_enabled = slot.enabled;
            slot.enabled = enabled;
            if enabled && !was_enabled {
                let _ = self.task_heap.push(ScheduledTask {
                    deadline: self.t.wrapping_add(slot.def.interval.max(1)),
                    slot: i as u8,
                });
            }
        }
    }

    pub fn is_task_enabled(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|s| s.def.id == id && s.enabled)
    }

    fn watchdog_slot(&self, id: WatchdogId) -> usize {
        WATCHDOG_IDS.iter().position(|w| *w == id).expect("unknown watchdog id")
    }

    pub fn watchdog(&mut self, id: WatchdogId) -> &mut Watchdog {
        let slot = self.watchdog_slot(id);
        &mut self.watchdogs[slot]
    }

    /// Drop every scheduled entry for `id` from the heap (linear
    /// drain-and-rebuild find-by-identity).
    fn drop_watchdog_heap_entries(&mut self, slot: u8) {
        let mut rebuilt: BinaryHeap<ScheduledWatchdog, Min, TIMEBASE_WATCHDOG_CAPACITY> =
            BinaryHeap::new();
        while let Some(entry) = self.watchdog_heap.pop() {
            if entry.slot != slot {
                let _ = rebuilt.push(entry);
            }
        }
        self.watchdog_heap = rebuilt;
    }

    pub fn register_watchdog(&mut self, id: WatchdogId) -> Result<(), TimebaseError> {
        let slot = self.watchdog_slot(id);
        let deadline = match self.watchdogs[slot].start(self.t) {
            Ok(()) => self.watchdogs[slot].deadline().unwrap(),
            Err(WatchdogError::Busy) => return Ok(()), // already running, idempotent
            Err(_) => return Err(TimebaseError::WatchdogUnavailable),
        };
        self.watchdog_heap
            .push(ScheduledWatchdog {
                deadline,
                slot: slot as u8,
            })
            .map_err(|_| TimebaseError::WatchdogUnavailable)
    }

    pub fn unregister_watchdog(&mut self, id: WatchdogId) -> Result<(), TimebaseError> {
        let slot = self.watchdog_slot(id);
        self.watchdogs[slot]
            .stop()
            .map_err(|_| TimebaseError::WatchdogNotRegistered)?;
        self.drop_watchdog_heap_entries(slot as u8);
        Ok(())
    }

    /// Remove then reinsert with a refreshed deadline.
    pub fn update_watchdog(&mut self, id: WatchdogId) -> Result<(), TimebaseError> {
        let slot = self.watchdog_slot(id);
        self.drop_watchdog_heap_entries(slot as u8);
        self.watchdogs[slot]
            .reset(self.t)
            .map_err(|_| TimebaseError::WatchdogUnavailable)?;
        let deadline = self.watchdogs[slot].deadline().unwrap();
        self.watchdog_heap
            .push(ScheduledWatchdog {
                deadline,
                slot: slot as u8,
            })
            .map_err(|_| TimebaseError::WatchdogUnavailable)
    }

    /// While the task heap's root is due: pop, fire (if enabled), reinsert
    /// with the next deadline unless one-shot. Then the same for watchdogs,
    /// whose expiry events are returned for the FSM's event channel.
    ///
    /// Dispatch order within a tick follows heap order, not insertion order.
    pub fn routine(&mut self) -> Result<(heapless::Vec<TaskId, TASK_COUNT>, heapless::Vec<Event, 8>), TimebaseError> {
        if !self.enabled {
            return Err(TimebaseError::Disabled);
        }
        let mut due_tasks = heapless::Vec::new();
        while let Some(top) = self.task_heap.peek().copied() {
            if top.deadline > self.t {
                break;
            }
            self.task_heap.pop();
            let slot = &mut self.tasks[top.slot as usize];
            if slot.enabled {
                let _ = due_tasks.push(slot.def.id);
            }
            if slot.def.interval != 0 && slot.enabled {
                let _ = self.task_heap.push(ScheduledTask {
                    deadline: top.deadline.wrapping_add(slot.def.interval),
                    slot: top.slot,
                });
            }
        }

        let mut expired_events = heapless::Vec::new();
        while let Some(top) = self.watchdog_heap.peek().copied() {
            if top.deadline > self.t {
                break;
            }
            self.watchdog_heap.pop();
            let event = self.watchdogs[top.slot as usize].expire_for_timebase();
            let _ = expired_events.push(event);
        }

        Ok((due_tasks, expired_events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watchdog::Watchdog;

    fn watchdogs() -> [Watchdog; 5] {
        [
            Watchdog::new(WatchdogId::PcuAirNegative, 1_000, Event::AirnTimeout),
            Watchdog::new(WatchdogId::PcuPrecharge, 15_000, Event::PrechargeTimeout),
            Watchdog::new(WatchdogId::PcuAirPositive, 1_000, Event::AirpTimeout),
            Watchdog::new(WatchdogId::Balancer, 3_000, Event::BalancingStop),
            Watchdog::new(WatchdogId::Programmer, 5_000, Event::ProgrammerTimeout),
        ]
    }

    #[test]
    fn tick_does_not_advance_while_disabled() {
        let mut tb = Timebase::new(1, watchdogs());
        tb.inc_tick();
        assert_eq!(tb.get_tick(), 0);
        tb.set_enable(true);
        tb.inc_tick();
        assert_eq!(tb.get_tick(), 1);
    }

    #[test]
    fn watchdog_expiry_surfaces_as_event() {
        let mut tb = Timebase::new(1, watchdogs());
        tb.set_enable(true);
        tb.register_watchdog(WatchdogId::Balancer).unwrap();
        for _ in 0..3_000 {
            tb.inc_tick();
        }
        let (_, events) = tb.routine().unwrap();
        assert!(events.contains(&Event::BalancingStop));
    }

    #[test]
    fn update_watchdog_postpones_expiry() {
        let mut tb = Timebase::new(1, watchdogs());
        tb.set_enable(true);
        tb.register_watchdog(WatchdogId::Balancer).unwrap();
        for _ in 0..2_000 {
            tb.inc_tick();
        }
        tb.update_watchdog(WatchdogId::Balancer).unwrap();
        for _ in 0..2_000 {
            tb.inc_tick();
        }
        let (_, events) = tb.routine().unwrap();
        assert!(!events.contains(&Event::BalancingStop));
    }

    #[test]
    fn disabled_timebase_routine_errors() {
        let mut tb = Timebase::new(1, watchdogs());
        assert_eq!(tb.routine().unwrap_err(), TimebaseError::Disabled);
    }

    #[test]
    fn status_task_fires_on_its_interval() {
        let mut tb = Timebase::new(1, watchdogs());
        tb.set_enable(true);
        for _ in 0..crate::conf::task_rate::STATUS_MS {
            tb.inc_tick();
        }
        let (due, _) = tb.routine().unwrap();
        assert!(due.contains(&TaskId::SendStatus));
    }
}
