//! The request surface (§4.5): the six operations external callers (IPC
//! clients, the daemon's own bring-up code) are allowed to invoke. This is a
//! thin, named wrapper over [`LifecycleEngine`] — it exists so the wire
//! layer has a stable, spec-shaped API to bind against without reaching
//! into the engine's internal/external distinction itself.

use std::sync::Arc;

use nsm_types::{ClientId, ErrorStatus, NodeState, ShutdownKind};

use crate::clock::{Clock, SystemClock};
use crate::engine::LifecycleEngine;

/// The externally-facing API of a running node. Every call here is an
/// "external" request as far as the engine's reset-in-progress and
/// blocked-state checks are concerned.
pub struct RequestSurface<C: Clock + Clone = SystemClock> {
    engine: Arc<LifecycleEngine<C>>,
}

impl<C: Clock + Clone> RequestSurface<C> {
    #[must_use]
    pub fn new(engine: Arc<LifecycleEngine<C>>) -> Self {
        RequestSurface { engine }
    }

    #[must_use]
    pub fn engine(&self) -> &Arc<LifecycleEngine<C>> {
        &self.engine
    }

    /// Requests the node move into `state`. Only shutdown/fast-shutdown
    /// requests and run-up requests back to a running state have any
    /// effect beyond validation; see §4.4.1.
    pub fn set_node_state(&self, state: NodeState) -> ErrorStatus {
        self.engine.set_node_state(state, true)
    }

    /// Registers interest in lifecycle notifications for the given kind
    /// bits. Calling again for an already-registered client merges the new
    /// kinds into the existing mask and returns `ErrorStatus::Last`.
    pub fn register_lifecycle_client(
        &self,
        client: ClientId,
        kinds: ShutdownKind,
        timeout_ms: u32,
    ) -> ErrorStatus {
        self.engine.register_client(client, kinds, timeout_ms)
    }

    /// Withdraws interest in the given kind bits; the client is evicted
    /// entirely once its registered mask becomes empty.
    pub fn unregister_lifecycle_client(&self, client: ClientId, kinds: ShutdownKind) -> ErrorStatus {
        self.engine.unregister_client(client, kinds)
    }

    /// Acknowledges the lifecycle request currently outstanding for
    /// `client`. A late or unexpected acknowledgement is reconciled
    /// out-of-band and reported back as `ErrorStatus::WrongClient`.
    pub fn acknowledge_lifecycle_request(&self, client: ClientId) -> ErrorStatus {
        self.engine.acknowledge(client)
    }

    #[must_use]
    pub fn query_node_state(&self) -> NodeState {
        self.engine.query_node_state()
    }

    /// Blocks or unblocks externally-initiated `SetNodeState` calls; does
    /// not affect reset-driven or other internally-initiated transitions.
    pub fn set_external_node_state_blocked(&self, blocked: bool) -> ErrorStatus {
        self.engine.set_external_blocked(blocked);
        ErrorStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::transport::{NullPlatform, RecordingTransport};

    fn surface() -> RequestSurface<TestClock> {
        let clock = TestClock::new();
        let transport = Arc::new(RecordingTransport::new());
        let engine = LifecycleEngine::with_clock(clock, transport, Arc::new(NullPlatform));
        RequestSurface::new(engine)
    }

    #[test]
    fn register_then_query_round_trips() {
        let surface = surface();
        let client = ClientId::new(1);
        assert_eq!(
            surface.register_lifecycle_client(client, ShutdownKind::NORMAL, 500),
            ErrorStatus::Ok
        );
        assert_eq!(surface.query_node_state(), NodeState::NotSet);
    }

    #[test]
    fn blocked_external_transitions_are_refused() {
        let surface = surface();
        assert_eq!(surface.set_external_node_state_blocked(true), ErrorStatus::Ok);
        assert_eq!(surface.set_node_state(NodeState::ShuttingDown), ErrorStatus::Error);
    }

    #[test]
    fn acknowledge_unknown_client_is_an_error() {
        let surface = surface();
        assert_eq!(
            surface.acknowledge_lifecycle_request(ClientId::new(999)),
            ErrorStatus::Error
        );
    }
}
