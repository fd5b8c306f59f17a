/// The node's global lifecycle state.
///
/// Discriminant values are pinned to match the upstream numeric contract
/// (`NsmNodeState_e`) in case a future transport shim needs to reproduce
/// them on the wire; nothing in this crate otherwise depends on the
/// specific numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeState {
    NotSet = 0,
    StartUp = 1,
    BaseRunning = 2,
    LucRunning = 3,
    FullyRunning = 4,
    FullyOperational = 5,
    ShuttingDown = 6,
    ShutdownDelay = 7,
    FastShutdown = 8,
    DegradedPower = 9,
    Shutdown = 10,
    Resume = 11,
}

impl NodeState {
    /// Whether this state counts as "running" for the purposes of the
    /// running-to-shutdown transition rules.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(
            self,
            NodeState::StartUp
                | NodeState::BaseRunning
                | NodeState::LucRunning
                | NodeState::FullyRunning
                | NodeState::FullyOperational
                | NodeState::Resume
        )
    }

    /// Whether this state is one of the two shutdown-in-progress states.
    #[must_use]
    pub fn is_shutting_down(self) -> bool {
        matches!(self, NodeState::ShuttingDown | NodeState::FastShutdown)
    }

    /// Whether entering `self` requires a fast (as opposed to normal)
    /// shutdown kind.
    #[must_use]
    pub fn is_fast(self) -> bool {
        matches!(self, NodeState::FastShutdown)
    }
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState::NotSet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_states_are_running() {
        assert!(NodeState::FullyOperational.is_running());
        assert!(!NodeState::Shutdown.is_running());
        assert!(!NodeState::ShuttingDown.is_running());
    }

    #[test]
    fn shutdown_states() {
        assert!(NodeState::ShuttingDown.is_shutting_down());
        assert!(NodeState::FastShutdown.is_shutting_down());
        assert!(!NodeState::Shutdown.is_shutting_down());
    }

    #[test]
    fn default_is_not_set() {
        assert_eq!(NodeState::default(), NodeState::NotSet);
    }
}
