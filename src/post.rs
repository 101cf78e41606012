//! Power-on self test gating `Init -> Idle` vs `Init -> Fatal`.
//!
//! Grounded in the original's `post.c`: module init order matters (pcu
//! before can_comm before programmer, mirrored here by the composition
//! root's construction order) and the self test itself just confirms every
//! collaborator initialized, rather than driving any peripheral.

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum PostResult {
    Ok,
    Failed,
}

/// Peripherals/collaborators the self test can query. One implementation is
/// wired up at the composition root, same pattern as `FsmContext`.
pub trait PostChecks {
    fn can_bus_ready(&self) -> bool;
    fn feedback_acquisition_ready(&self) -> bool;
}

/// Runs the self test. The original leaves hardware-level verification as
/// a TODO ("Test that every peripheral is working") and only confirms
/// module init order; this mirrors that scope.
pub fn run(checks: &impl PostChecks) -> PostResult {
    if checks.can_bus_ready() && checks.feedback_acquisition_ready() {
        PostResult::Ok
    } else {
        PostResult::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Checks {
        can: bool,
        feedback: bool,
    }

    impl PostChecks for Checks {
        fn can_bus_ready(&self) -> bool {
            self.can
        }
        fn feedback_acquisition_ready(&self) -> bool {
            self.feedback
        }
    }

    #[test]
    fn ok_when_every_collaborator_ready() {
        let checks = Checks { can: true, feedback: true };
        assert_eq!(run(&checks), PostResult::Ok);
    }

    #[test]
    fn failed_when_any_collaborator_not_ready() {
        let checks = Checks { can: true, feedback: false };
        assert_eq!(run(&checks), PostResult::Failed);
    }
}
