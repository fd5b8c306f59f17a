//! The two-phase traversal state machine (§4.4.2, §4.4.3, §4.4.6) and its
//! collective-timeout durations table.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use nsm_types::{ClientId, ShutdownKind};

/// Engine-wide timeout limits that `nsm-config` loads and `nsm-daemon`
/// passes in at construction (SPEC_FULL §10.4); this crate has no
/// dependency on `nsm-config` itself, so it takes plain values.
#[derive(Debug, Clone, Copy)]
pub struct EngineLimits {
    /// Substituted for a new client's `timeout_ms` when it registers with
    /// `0` (§3: "`0` permitted only for out-of-band late notifications" —
    /// a fresh registration that asks for `0` is asking for the configured
    /// default, not an un-timed notification).
    pub default_client_timeout_ms: u32,
    /// Diagnostic ceiling for the aggregate-timeout bookkeeping (§3): the
    /// sum of a transition's sequential-client timeouts plus its max
    /// parallel-client timeout is compared against this at the start of
    /// every transition and a warning logged if it's exceeded. Never
    /// enforced — exceeding it does not block or alter the transition.
    pub aggregate_ceiling_ms: u32,
}

impl Default for EngineLimits {
    fn default() -> Self {
        EngineLimits {
            default_client_timeout_ms: 5_000,
            aggregate_ceiling_ms: 120_000,
        }
    }
}

/// The condensed engine state machine of §4.4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    ShutdownPhase1,
    ShutdownPhase2,
    RunUpPhase1,
    RunUpPhase2,
}

/// Whether the transition in progress is heading into shutdown or back
/// into a running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Shutdown,
    RunUp,
}

/// The engine's working state during a transition (§3 `TransitionContext`).
pub struct TransitionContext {
    pub direction: Direction,
    pub fast: bool,
    pub phase: EnginePhase,
    /// The bit set currently being dispatched (the kind sent to clients in
    /// this phase).
    pub current_kind: ShutdownKind,
    pub pending_parallel: HashSet<ClientId>,
    pub current_sequential: Option<ClientId>,
    /// Clients still awaiting their turn in the current sequential phase,
    /// in traversal order; `current_sequential` is popped from the front.
    pub sequential_queue: Vec<ClientId>,
    pub phase_deadline: Instant,
    /// Set when this transition was initiated by a reset request (§4.4.5);
    /// drives whether the reset flag is cleared on reaching `Shutdown`.
    pub reset_driven: bool,
}

impl TransitionContext {
    #[must_use]
    pub fn new(direction: Direction, fast: bool, phase: EnginePhase, now: Instant) -> Self {
        TransitionContext {
            direction,
            fast,
            phase,
            current_kind: ShutdownKind::NOT,
            pending_parallel: HashSet::new(),
            current_sequential: None,
            sequential_queue: Vec::new(),
            phase_deadline: now,
            reset_driven: false,
        }
    }
}

/// Collective (phase) timeout durations, §4.4.3.
#[must_use]
pub fn collective_timeout(direction: Direction, fast: bool, phase: EnginePhase) -> Duration {
    match (direction, phase) {
        (Direction::Shutdown, EnginePhase::ShutdownPhase1) => {
            if fast {
                Duration::from_secs(2)
            } else {
                Duration::from_secs(60)
            }
        }
        (Direction::Shutdown, EnginePhase::ShutdownPhase2) => {
            if fast {
                Duration::from_secs(3)
            } else {
                Duration::from_secs(60)
            }
        }
        (Direction::RunUp, EnginePhase::RunUpPhase1 | EnginePhase::RunUpPhase2) => {
            Duration::from_secs(60)
        }
        _ => Duration::from_secs(60),
    }
}

/// The kind sent to clients in the given phase of the given direction
/// (§4.4.2: `(Normal|Fast) | Parallel?` during shutdown, `RunUp |
/// Parallel?` during run-up).
#[must_use]
pub fn phase_kind(direction: Direction, fast: bool, phase: EnginePhase) -> ShutdownKind {
    let base = match direction {
        Direction::Shutdown => {
            if fast {
                ShutdownKind::FAST
            } else {
                ShutdownKind::NORMAL
            }
        }
        Direction::RunUp => ShutdownKind::RUN_UP,
    };
    let parallel = matches!(
        (direction, phase),
        (Direction::Shutdown, EnginePhase::ShutdownPhase1)
            | (Direction::RunUp, EnginePhase::RunUpPhase2)
    );
    if parallel {
        base.union(ShutdownKind::PARALLEL)
    } else {
        base
    }
}

#[cfg(test)]
mod timeout_table_tests {
    use super::*;
    use test_case::test_case;

    // The collective-timeout table of SPEC_FULL §4.4.3, one row per case.
    #[test_case(Direction::Shutdown, true, EnginePhase::ShutdownPhase1, 2; "fast shutdown parallel phase is 2s")]
    #[test_case(Direction::Shutdown, true, EnginePhase::ShutdownPhase2, 3; "fast shutdown sequential phase is 3s")]
    #[test_case(Direction::Shutdown, false, EnginePhase::ShutdownPhase1, 60; "normal shutdown parallel phase is 60s")]
    #[test_case(Direction::Shutdown, false, EnginePhase::ShutdownPhase2, 60; "normal shutdown sequential phase is 60s")]
    #[test_case(Direction::RunUp, false, EnginePhase::RunUpPhase1, 60; "run-up sequential phase is 60s")]
    #[test_case(Direction::RunUp, false, EnginePhase::RunUpPhase2, 60; "run-up parallel phase is 60s")]
    fn matches_spec_table(direction: Direction, fast: bool, phase: EnginePhase, expected_secs: u64) {
        assert_eq!(collective_timeout(direction, fast, phase), Duration::from_secs(expected_secs));
    }

    #[test_case(Direction::Shutdown, false, EnginePhase::ShutdownPhase1, ShutdownKind::NORMAL.union(ShutdownKind::PARALLEL); "normal parallel phase sends Normal|Parallel")]
    #[test_case(Direction::Shutdown, false, EnginePhase::ShutdownPhase2, ShutdownKind::NORMAL; "normal sequential phase sends bare Normal")]
    #[test_case(Direction::Shutdown, true, EnginePhase::ShutdownPhase1, ShutdownKind::FAST.union(ShutdownKind::PARALLEL); "fast parallel phase sends Fast|Parallel")]
    #[test_case(Direction::RunUp, false, EnginePhase::RunUpPhase1, ShutdownKind::RUN_UP; "run-up sequential phase sends bare RunUp")]
    #[test_case(Direction::RunUp, false, EnginePhase::RunUpPhase2, ShutdownKind::RUN_UP.union(ShutdownKind::PARALLEL); "run-up parallel phase sends RunUp|Parallel")]
    fn phase_kind_matches_spec(direction: Direction, fast: bool, phase: EnginePhase, expected: ShutdownKind) {
        assert_eq!(phase_kind(direction, fast, phase), expected);
    }
}
