//! Pack lifecycle state machine.
//!
//! Grounded in the original firmware's `tests/test_fsm.c` for state/event
//! names and the callback-injection contract, replaced here with a trait
//! bundling the collaborators the FSM drives.

use crate::feedback::{Feedback, FeedbackMask};
use crate::units::Ticks;

/// Events the FSM reacts to. Only the latest pending event is kept between
/// steps — callers enqueue through `Fsm::notify`, which
/// overwrites any event not yet consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Event {
    TsOn,
    TsOff,
    FlashRequest,
    BalancingStart,
    BalancingStop,
    AirnTimeout,
    PrechargeTimeout,
    AirpTimeout,
    /// Supplemental: the flash-ready handshake watchdog expired before every
    /// cellboard reported ready.
    ProgrammerTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum State {
    Init,
    Idle,
    AirnCheck,
    Precharge,
    AirpCheck,
    TsOn,
    Flash,
    Fatal,
}

/// AIRN-close gate: AIRN-com and AIRN-mec must read HIGH before leaving
/// `AirnCheck`.
const AIRN_CLOSED_MASK: FeedbackMask = FeedbackMask::AIRN_OPEN_COM.union(FeedbackMask::AIRN_OPEN_MEC);

/// AIRP-close gate: AIRN-com/mec, SD-end and AIRP-com/mec must all read
/// HIGH before leaving `AirpCheck`.
const AIRP_CLOSED_MASK: FeedbackMask = FeedbackMask::AIRN_OPEN_COM
    .union(FeedbackMask::AIRN_OPEN_MEC)
    .union(FeedbackMask::SD_END)
    .union(FeedbackMask::AIRP_OPEN_COM)
    .union(FeedbackMask::AIRP_OPEN_MEC);

/// Collaborators the FSM drives at each transition. One implementation is
/// wired up at the composition root.
pub trait FsmContext {
    fn pcu_airn_close(&mut self);
    fn pcu_precharge_start(&mut self);
    fn pcu_airp_close(&mut self);
    fn pcu_reset_all(&mut self);

    fn balancer_start(&mut self);
    fn balancer_stop(&mut self);

    fn precharge_complete(&self) -> bool;
    fn ts_voltage_consistent(&self) -> bool;
    fn feedback(&self) -> &Feedback;

    fn programmer_arm(&mut self);
    fn programmer_all_ready(&self) -> bool;

    fn system_reset(&mut self) -> !;

    fn run_post(&mut self) -> bool;
}

pub struct Fsm {
    state: State,
    pending: Option<Event>,
    balancing: bool,
}

impl Default for Fsm {
    fn default() -> Self {
        Self::new()
    }
}

impl Fsm {
    pub const fn new() -> Self {
        Self {
            state: State::Init,
            pending: None,
            balancing: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_balancing(&self) -> bool {
        self.balancing
    }

    /// Enqueue an event, coalescing with whatever is already pending.
    pub fn notify(&mut self, event: Event) {
        self.pending = Some(event);
    }

    /// Run one step: consume the pending event (if any) and evaluate
    /// level-triggered conditions for the current state. `now` is used only
    /// for logging context, timeouts arrive as events from the watchdogs.
    pub fn step(&mut self, ctx: &mut impl FsmContext, now: Ticks) {
        let event = self.pending.take();

        let next = match (self.state, event) {
            (State::Init, _) => {
                if ctx.run_post() {
                    ctx.pcu_reset_all();
                    State::Idle
                } else {
                    defmt::error!("POST failed, entering FATAL");
                    State::Fatal
                }
            }

            (State::Idle, Some(Event::FlashRequest)) => {
                ctx.programmer_arm();
                State::Flash
            }
            (State::Idle, Some(Event::TsOn)) => {
                ctx.pcu_airn_close();
                State::AirnCheck
            }
            (State::Idle, Some(Event::BalancingStart)) => {
                ctx.balancer_start();
                self.balancing = true;
                State::Idle
            }
            (State::Idle, Some(Event::BalancingStop)) => {
                ctx.balancer_stop();
                self.balancing = false;
                State::Idle
            }

            (State::AirnCheck, Some(Event::AirnTimeout)) | (State::AirnCheck, Some(Event::TsOff)) => {
                ctx.pcu_reset_all();
                State::Idle
            }
            (State::AirnCheck, _) => {
                if ctx.feedback().matches(AIRN_CLOSED_MASK, AIRN_CLOSED_MASK) {
                    ctx.pcu_precharge_start();
                    State::Precharge
                } else {
                    State::AirnCheck
                }
            }

            (State::Precharge, Some(Event::PrechargeTimeout)) | (State::Precharge, Some(Event::TsOff)) => {
                ctx.pcu_reset_all();
                State::Idle
            }
            (State::Precharge, _) => {
                if ctx.precharge_complete() && ctx.ts_voltage_consistent() {
                    ctx.pcu_airp_close();
                    State::AirpCheck
                } else {
                    State::Precharge
                }
            }

            (State::AirpCheck, Some(Event::AirpTimeout)) | (State::AirpCheck, Some(Event::TsOff)) => {
                ctx.pcu_reset_all();
                State::Idle
            }
            (State::AirpCheck, _) => {
                if ctx.feedback().matches(AIRP_CLOSED_MASK, AIRP_CLOSED_MASK) {
                    State::TsOn
                } else {
                    State::AirpCheck
                }
            }

            (State::TsOn, Some(Event::TsOff)) => {
                ctx.pcu_reset_all();
                State::Idle
            }
            (State::TsOn, _) => State::TsOn,

            (State::Flash, Some(Event::ProgrammerTimeout)) => {
                ctx.pcu_reset_all();
                State::Idle
            }
            (State::Flash, _) => {
                if ctx.programmer_all_ready() {
                    ctx.system_reset();
                }
                State::Flash
            }

            (State::Fatal, _) => State::Fatal,
        };

        if next != self.state {
            defmt::info!("fsm: {:?} -> {:?} (tick {=u32})", self.state, next, now);
        }
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::Feedback;

    struct MockCtx {
        feedback: Feedback,
        precharge_complete: bool,
        ts_consistent: bool,
        all_ready: bool,
        post_ok: bool,
        reset_calls: u32,
        balancing_started: u32,
    }

    impl Default for MockCtx {
        fn default() -> Self {
            Self {
                feedback: Feedback::new(),
                precharge_complete: false,
                ts_consistent: true,
                all_ready: false,
                post_ok: true,
                reset_calls: 0,
                balancing_started: 0,
            }
        }
    }

    impl FsmContext for MockCtx {
        fn pcu_airn_close(&mut self) {}
        fn pcu_precharge_start(&mut self) {}
        fn pcu_airp_close(&mut self) {}
        fn pcu_reset_all(&mut self) {
            self.reset_calls += 1;
        }
        fn balancer_start(&mut self) {
            self.balancing_started += 1;
        }
        fn balancer_stop(&mut self) {}
        fn precharge_complete(&self) -> bool {
            self.precharge_complete
        }
        fn ts_voltage_consistent(&self) -> bool {
            self.ts_consistent
        }
        fn feedback(&self) -> &Feedback {
            &self.feedback
        }
        fn programmer_arm(&mut self) {}
        fn programmer_all_ready(&self) -> bool {
            self.all_ready
        }
        fn system_reset(&mut self) -> ! {
            panic!("system reset requested in test")
        }
        fn run_post(&mut self) -> bool {
            self.post_ok
        }
    }

    #[test]
    fn init_to_idle_on_post_ok() {
        let mut fsm = Fsm::new();
        let mut ctx = MockCtx::default();
        fsm.step(&mut ctx, 0);
        assert_eq!(fsm.state(), State::Idle);
        assert_eq!(ctx.reset_calls, 1);
    }

    #[test]
    fn init_to_fatal_on_post_failure_is_terminal() {
        let mut fsm = Fsm::new();
        let mut ctx = MockCtx::default();
        ctx.post_ok = false;
        fsm.step(&mut ctx, 0);
        assert_eq!(fsm.state(), State::Fatal);
        fsm.notify(Event::TsOn);
        fsm.step(&mut ctx, 1);
        assert_eq!(fsm.state(), State::Fatal);
    }

    #[test]
    fn happy_path_idle_to_ts_on() {
        let mut fsm = Fsm::new();
        let mut ctx = MockCtx::default();
        fsm.step(&mut ctx, 0); // -> Idle

        fsm.notify(Event::TsOn);
        fsm.step(&mut ctx, 1);
        assert_eq!(fsm.state(), State::AirnCheck);

        ctx.feedback.set_digital_high(crate::feedback::FeedbackId::AirnOpenCom);
        ctx.feedback.set_digital_high(crate::feedback::FeedbackId::AirnOpenMec);
        fsm.step(&mut ctx, 2);
        assert_eq!(fsm.state(), State::Precharge);

        ctx.precharge_complete = true;
        fsm.step(&mut ctx, 3);
        assert_eq!(fsm.state(), State::AirpCheck);

        ctx.feedback.set_digital_high(crate::feedback::FeedbackId::SdEnd);
        ctx.feedback.set_digital_high(crate::feedback::FeedbackId::AirpOpenCom);
        ctx.feedback.set_digital_high(crate::feedback::FeedbackId::AirpOpenMec);
        fsm.step(&mut ctx, 4);
        assert_eq!(fsm.state(), State::TsOn);
    }

    #[test]
    fn precharge_timeout_returns_to_idle() {
        let mut fsm = Fsm::new();
        let mut ctx = MockCtx::default();
        fsm.step(&mut ctx, 0);
        fsm.notify(Event::TsOn);
        fsm.step(&mut ctx, 1);
        ctx.feedback.set_digital_high(crate::feedback::FeedbackId::AirnOpenCom);
        ctx.feedback.set_digital_high(crate::feedback::FeedbackId::AirnOpenMec);
        fsm.step(&mut ctx, 2);
        assert_eq!(fsm.state(), State::Precharge);

        fsm.notify(Event::PrechargeTimeout);
        fsm.step(&mut ctx, 3);
        assert_eq!(fsm.state(), State::Idle);
    }

    #[test]
    fn airp_check_never_advances_without_full_mask() {
        let mut fsm = Fsm::new();
        let mut ctx = MockCtx::default();
        fsm.step(&mut ctx, 0);
        fsm.notify(Event::TsOn);
        fsm.step(&mut ctx, 1);
        ctx.feedback.set_digital_high(crate::feedback::FeedbackId::AirnOpenCom);
        ctx.feedback.set_digital_high(crate::feedback::FeedbackId::AirnOpenMec);
        fsm.step(&mut ctx, 2);
        ctx.precharge_complete = true;
        fsm.step(&mut ctx, 3);
        assert_eq!(fsm.state(), State::AirpCheck);

        // Only partially satisfy the gate mask.
        ctx.feedback.set_digital_high(crate::feedback::FeedbackId::SdEnd);
        fsm.step(&mut ctx, 4);
        assert_eq!(fsm.state(), State::AirpCheck);
    }
}
