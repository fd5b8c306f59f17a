//! The transition engine (§4.4): owns the node state and the single coarse
//! lock that guards all mutable transition state, and drives the two-phase
//! shutdown/run-up traversal, collective timeouts, and late-reply
//! reconciliation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use nsm_types::{ClientId, ErrorStatus, NodeState, ShutdownKind};

use crate::clock::{Clock, SystemClock};
use crate::phase::{
    collective_timeout, phase_kind, Direction, EngineLimits, EnginePhase, TransitionContext,
};
use crate::registry::{ClientRegistry, LifecycleClient, RemoveOutcome, UpsertOutcome};
use crate::timer::{TimerHandle, TimerService};
use crate::transport::{ClientTransport, PlatformStateMachine, ResetReason};

struct EngineState {
    node_state: NodeState,
    external_blocked: bool,
    reset_active: bool,
    registry: ClientRegistry,
    transition: Option<TransitionContext>,
    client_timers: HashMap<ClientId, TimerHandle>,
    /// Bumped on every new transition and every phase advance. A timer or
    /// collective-timeout callback that observes a stale generation is a
    /// no-op — this is the "first action under the lock" authority check
    /// the design notes call for.
    current_generation: u64,
}

impl EngineState {
    fn new() -> Self {
        EngineState {
            node_state: NodeState::NotSet,
            external_blocked: false,
            reset_active: false,
            registry: ClientRegistry::new(),
            transition: None,
            client_timers: HashMap::new(),
            current_generation: 0,
        }
    }
}

struct CollectiveState {
    deadline: Mutex<Option<(Instant, u64)>>,
    cvar: Condvar,
}

/// Owns the node-state machine and drives shutdown/run-up transitions.
/// Constructed behind an `Arc` because the timer service and the
/// collective-timeout worker both need to call back into the engine from a
/// thread distinct from any caller.
pub struct LifecycleEngine<C: Clock + Clone = SystemClock> {
    state: Mutex<EngineState>,
    timers: TimerService<C>,
    clock: C,
    transport: Arc<dyn ClientTransport>,
    platform: Arc<dyn PlatformStateMachine>,
    collective: CollectiveState,
    self_ref: Mutex<Option<Weak<LifecycleEngine<C>>>>,
    collective_worker: Mutex<Option<std::thread::JoinHandle<()>>>,
    shutdown_flag: AtomicBool,
    limits: EngineLimits,
}

impl<C: Clock + Clone + Default> LifecycleEngine<C> {
    #[must_use]
    pub fn new(transport: Arc<dyn ClientTransport>, platform: Arc<dyn PlatformStateMachine>) -> Arc<Self> {
        Self::with_clock(C::default(), transport, platform)
    }
}

impl<C: Clock + Clone> LifecycleEngine<C> {
    pub fn with_clock(
        clock: C,
        transport: Arc<dyn ClientTransport>,
        platform: Arc<dyn PlatformStateMachine>,
    ) -> Arc<Self> {
        Self::with_clock_and_limits(clock, transport, platform, EngineLimits::default())
    }

    /// Like [`Self::with_clock`], but with engine-wide timeout limits
    /// (§3/§10.4) loaded from configuration rather than their defaults.
    pub fn with_clock_and_limits(
        clock: C,
        transport: Arc<dyn ClientTransport>,
        platform: Arc<dyn PlatformStateMachine>,
        limits: EngineLimits,
    ) -> Arc<Self> {
        let engine = Arc::new(LifecycleEngine {
            state: Mutex::new(EngineState::new()),
            timers: TimerService::with_clock(clock.clone()),
            clock: clock.clone(),
            transport,
            platform,
            collective: CollectiveState {
                deadline: Mutex::new(None),
                cvar: Condvar::new(),
            },
            self_ref: Mutex::new(None),
            collective_worker: Mutex::new(None),
            shutdown_flag: AtomicBool::new(false),
            limits,
        });

        *engine.self_ref.lock().unwrap() = Some(Arc::downgrade(&engine));

        let worker = {
            let weak = Arc::downgrade(&engine);
            let clock = clock.clone();
            std::thread::Builder::new()
                .name("nsm-collective-timeout".into())
                .spawn(move || Self::collective_worker_loop(&weak, &clock))
                .expect("failed to spawn collective timeout worker thread")
        };
        *engine.collective_worker.lock().unwrap() = Some(worker);

        engine
    }

    fn weak_self(&self) -> Weak<Self> {
        self.self_ref
            .lock()
            .unwrap()
            .clone()
            .expect("weak_self is populated before the engine is used")
    }

    /// Signals the collective-timeout worker to stop and joins it. The
    /// timer service's own worker thread is joined automatically when the
    /// last `Arc<LifecycleEngine>` is dropped (its `Drop` impl does so).
    /// Called by the daemon's shutdown sequence (§6).
    pub fn shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Release);
        self.collective.cvar.notify_all();
        if let Some(handle) = self.collective_worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn collective_worker_loop(weak: &Weak<Self>, clock: &C) {
        loop {
            let Some(engine) = weak.upgrade() else { return };
            if engine.shutdown_flag.load(Ordering::Acquire) {
                return;
            }

            let guard = engine.collective.deadline.lock().unwrap();
            match *guard {
                None => {
                    let _ = engine
                        .collective
                        .cvar
                        .wait_timeout(guard, Duration::from_millis(200))
                        .unwrap();
                }
                Some((deadline, generation)) => {
                    if clock.now() >= deadline {
                        drop(guard);
                        engine.fire_collective_timeout(generation);
                    } else {
                        let guard = clock.wait_until(guard, &engine.collective.cvar, deadline);
                        drop(guard);
                    }
                }
            }
        }
    }

    // ---- request surface operations (§4.5) ----

    #[tracing::instrument(skip(self), fields(new_state = ?new_state, external))]
    pub fn set_node_state(&self, new_state: NodeState, external: bool) -> ErrorStatus {
        let mut state = self.state.lock().unwrap();

        if external && state.external_blocked {
            return ErrorStatus::Error;
        }
        if external
            && state.reset_active
            && !new_state.is_shutting_down()
            && new_state != NodeState::Shutdown
        {
            return ErrorStatus::Error;
        }
        if external && matches!(new_state, NodeState::Shutdown | NodeState::FullyOperational) {
            // These are terminal states the engine alone reaches at the end
            // of a transition; they are not externally settable.
            return ErrorStatus::Parameter;
        }

        let current = state.node_state;

        if current == new_state {
            return ErrorStatus::Ok;
        }

        if current == NodeState::Shutdown && new_state.is_shutting_down() {
            // Already shut down; a repeat shutdown request is a no-op.
            return ErrorStatus::Ok;
        }

        if (current.is_running() || current == NodeState::NotSet) && new_state.is_shutting_down() {
            let fast = new_state == NodeState::FastShutdown;
            self.start_transition(&mut state, Direction::Shutdown, fast, new_state);
            return ErrorStatus::Ok;
        }

        if current.is_shutting_down() && new_state.is_running() {
            self.start_transition(&mut state, Direction::RunUp, false, new_state);
            return ErrorStatus::Ok;
        }

        if new_state.is_running() && (current.is_running() || current == NodeState::NotSet) {
            // Plain boot-sequence progression between running states; no
            // client notification involved.
            state.node_state = new_state;
            return ErrorStatus::Ok;
        }

        ErrorStatus::Parameter
    }

    pub fn register_client(&self, id: ClientId, kinds: ShutdownKind, timeout_ms: u32) -> ErrorStatus {
        if kinds.is_empty() {
            return ErrorStatus::Parameter;
        }
        let mut state = self.state.lock().unwrap();
        // A brand-new client asking for `timeout_ms == 0` gets the
        // configured default rather than an un-timed registration (§3: `0`
        // is reserved for out-of-band notifications, which never arm a
        // timer regardless of the registered value). An update with `0`
        // is left to the registry's existing "don't overwrite" rule.
        let is_new = state.registry.find_by_id(id).is_none();
        let effective_timeout_ms = if is_new && timeout_ms == 0 {
            self.limits.default_client_timeout_ms
        } else {
            timeout_ms
        };
        match state.registry.upsert(id, kinds, effective_timeout_ms) {
            UpsertOutcome::Created => ErrorStatus::Ok,
            UpsertOutcome::Updated => ErrorStatus::Last,
        }
    }

    pub fn unregister_client(&self, id: ClientId, kinds: ShutdownKind) -> ErrorStatus {
        let mut state = self.state.lock().unwrap();
        match state.registry.remove_kinds(id, kinds) {
            RemoveOutcome::Ok => {
                if state.registry.find_by_id(id).is_none() {
                    if let Some(handle) = state.client_timers.remove(&id) {
                        self.timers.cancel(handle);
                    }
                }
                ErrorStatus::Ok
            }
            RemoveOutcome::NotFound => ErrorStatus::Parameter,
        }
    }

    #[tracing::instrument(skip(self), fields(client = %id))]
    pub fn acknowledge(&self, id: ClientId) -> ErrorStatus {
        let mut state = self.state.lock().unwrap();

        let in_sequential = state
            .transition
            .as_ref()
            .is_some_and(|ctx| ctx.current_sequential == Some(id));
        if in_sequential {
            if let Some(handle) = state.client_timers.remove(&id) {
                self.timers.cancel(handle);
            }
            let direction = state.transition.as_ref().unwrap().direction;
            if let Some(client) = state.registry.find_by_id_mut(id) {
                client.has_pending_call = false;
                client.is_shut_down = direction == Direction::Shutdown;
            }
            if let Some(ctx) = state.transition.as_mut() {
                ctx.current_sequential = None;
            }
            self.advance_sequential(&mut state);
            return ErrorStatus::Ok;
        }

        let in_parallel = state
            .transition
            .as_mut()
            .is_some_and(|ctx| ctx.pending_parallel.remove(&id));
        if in_parallel {
            if let Some(handle) = state.client_timers.remove(&id) {
                self.timers.cancel(handle);
            }
            let direction = state.transition.as_ref().unwrap().direction;
            if let Some(client) = state.registry.find_by_id_mut(id) {
                client.has_pending_call = false;
                client.is_shut_down = direction == Direction::Shutdown;
            }
            let empty = state.transition.as_ref().unwrap().pending_parallel.is_empty();
            if empty {
                self.complete_phase(&mut state);
            }
            return ErrorStatus::Ok;
        }

        if state.registry.find_by_id(id).is_some() {
            self.reconcile_late(&mut state, id);
            return ErrorStatus::WrongClient;
        }

        ErrorStatus::Error
    }

    #[must_use]
    pub fn query_node_state(&self) -> NodeState {
        self.state.lock().unwrap().node_state
    }

    pub fn set_external_blocked(&self, blocked: bool) {
        self.state.lock().unwrap().external_blocked = blocked;
    }

    #[must_use]
    pub fn is_reset_active(&self) -> bool {
        self.state.lock().unwrap().reset_active
    }

    /// Forwards a reset request to the platform collaborator (§4.4.5) and
    /// drives the node into shutdown through the normal path.
    pub fn request_reset(&self, reason: ResetReason, fast: bool) {
        {
            let mut state = self.state.lock().unwrap();
            state.reset_active = true;
        }
        let kind = if fast { ShutdownKind::FAST } else { ShutdownKind::NORMAL };
        self.platform.request_reset(reason, kind);

        let target = if fast {
            NodeState::FastShutdown
        } else {
            NodeState::ShuttingDown
        };
        self.set_node_state(target, false);
    }

    // ---- internal transition machinery ----

    fn start_transition(
        &self,
        state: &mut EngineState,
        direction: Direction,
        fast: bool,
        entering_state: NodeState,
    ) {
        self.cancel_transition(state);
        state.current_generation += 1;
        state.node_state = entering_state;
        self.warn_if_aggregate_exceeds_ceiling(state, direction, fast);

        let phase = match direction {
            Direction::Shutdown => EnginePhase::ShutdownPhase1,
            Direction::RunUp => EnginePhase::RunUpPhase1,
        };
        let now = self.clock.now();
        let mut ctx = TransitionContext::new(direction, fast, phase, now);
        ctx.reset_driven = state.reset_active;
        state.transition = Some(ctx);

        self.begin_phase(state);
    }

    fn cancel_transition(&self, state: &mut EngineState) {
        for (_, handle) in state.client_timers.drain() {
            self.timers.cancel(handle);
        }
        let mut deadline = self.collective.deadline.lock().unwrap();
        *deadline = None;
        self.collective.cvar.notify_all();
        drop(deadline);
        state.transition = None;
    }

    fn begin_phase(&self, state: &mut EngineState) {
        let (direction, fast, phase) = {
            let ctx = state
                .transition
                .as_ref()
                .expect("begin_phase requires an active transition");
            (ctx.direction, ctx.fast, ctx.phase)
        };
        let kind = phase_kind(direction, fast, phase);
        if let Some(ctx) = state.transition.as_mut() {
            ctx.current_kind = kind;
        }

        let parallel_phase = matches!(
            (direction, phase),
            (Direction::Shutdown, EnginePhase::ShutdownPhase1)
                | (Direction::RunUp, EnginePhase::RunUpPhase2)
        );

        let candidates: Vec<ClientId> = match direction {
            Direction::Shutdown => state
                .registry
                .iterate_reverse()
                .filter(|c| client_matches_phase(c, direction, fast, parallel_phase))
                .map(|c| c.id)
                .collect(),
            Direction::RunUp => state
                .registry
                .iterate_forward()
                .filter(|c| client_matches_phase(c, direction, fast, parallel_phase))
                .map(|c| c.id)
                .collect(),
        };

        let deadline = self.clock.now() + collective_timeout(direction, fast, phase);
        {
            let mut guard = self.collective.deadline.lock().unwrap();
            *guard = Some((deadline, state.current_generation));
            self.collective.cvar.notify_all();
        }
        if let Some(ctx) = state.transition.as_mut() {
            ctx.phase_deadline = deadline;
        }

        if parallel_phase {
            if candidates.is_empty() {
                self.complete_phase(state);
            } else {
                self.notify_parallel_set(state, candidates, kind);
            }
        } else {
            if let Some(ctx) = state.transition.as_mut() {
                ctx.sequential_queue = candidates;
            }
            self.advance_sequential(state);
        }
    }

    fn notify_sequential(&self, state: &mut EngineState, id: ClientId, kind: ShutdownKind) {
        if let Some(ctx) = state.transition.as_mut() {
            ctx.current_sequential = Some(id);
        }
        let timeout_ms = state.registry.find_by_id(id).map_or(0, |c| c.timeout_ms);
        if let Some(client) = state.registry.find_by_id_mut(id) {
            client.has_pending_call = true;
        }
        self.arm_client_timer(state, id, timeout_ms);
        self.transport.send_notification(id, kind);
    }

    fn notify_parallel_set(&self, state: &mut EngineState, ids: Vec<ClientId>, kind: ShutdownKind) {
        if let Some(ctx) = state.transition.as_mut() {
            ctx.pending_parallel = ids.iter().copied().collect();
        }
        for id in ids {
            let timeout_ms = state.registry.find_by_id(id).map_or(0, |c| c.timeout_ms);
            if let Some(client) = state.registry.find_by_id_mut(id) {
                client.has_pending_call = true;
            }
            self.arm_client_timer(state, id, timeout_ms);
            self.transport.send_notification(id, kind);
        }
    }

    fn arm_client_timer(&self, state: &mut EngineState, id: ClientId, timeout_ms: u32) {
        let generation = state.current_generation;
        let weak = self.weak_self();
        let handle = self.timers.arm(Duration::from_millis(u64::from(timeout_ms)), move || {
            if let Some(engine) = weak.upgrade() {
                engine.handle_timer_expired(id, generation);
            }
        });
        state.client_timers.insert(id, handle);
    }

    fn advance_sequential(&self, state: &mut EngineState) {
        let next = state.transition.as_mut().and_then(|ctx| {
            if ctx.sequential_queue.is_empty() {
                None
            } else {
                Some(ctx.sequential_queue.remove(0))
            }
        });
        match next {
            Some(id) => {
                let kind = state
                    .transition
                    .as_ref()
                    .expect("transition present")
                    .current_kind;
                self.notify_sequential(state, id, kind);
            }
            None => self.complete_phase(state),
        }
    }

    fn complete_phase(&self, state: &mut EngineState) {
        let Some((direction, fast, phase)) = state
            .transition
            .as_ref()
            .map(|ctx| (ctx.direction, ctx.fast, ctx.phase))
        else {
            return;
        };

        let next_phase = match phase {
            EnginePhase::ShutdownPhase1 => Some(EnginePhase::ShutdownPhase2),
            EnginePhase::ShutdownPhase2 => None,
            EnginePhase::RunUpPhase1 => Some(EnginePhase::RunUpPhase2),
            EnginePhase::RunUpPhase2 => None,
            EnginePhase::Idle => None,
        };

        match next_phase {
            Some(phase) => {
                state.current_generation += 1;
                if let Some(ctx) = state.transition.as_mut() {
                    ctx.phase = phase;
                    ctx.pending_parallel.clear();
                    ctx.current_sequential = None;
                    ctx.sequential_queue.clear();
                }
                self.begin_phase(state);
            }
            None => self.finish_transition(state, direction, fast),
        }
    }

    fn finish_transition(&self, state: &mut EngineState, direction: Direction, _fast: bool) {
        let reset_driven = state.transition.as_ref().is_some_and(|ctx| ctx.reset_driven);
        state.transition = None;
        {
            let mut deadline = self.collective.deadline.lock().unwrap();
            *deadline = None;
        }

        match direction {
            Direction::Shutdown => {
                state.node_state = NodeState::Shutdown;
                if reset_driven && state.reset_active {
                    state.reset_active = false;
                    tracing::info!("reset-driven shutdown reached terminal state; clearing reset flag");
                }
                tracing::info!("shutdown transition complete");
            }
            Direction::RunUp => {
                state.node_state = NodeState::FullyOperational;
                tracing::info!("run-up transition complete");
            }
        }
    }

    fn fire_collective_timeout(&self, generation: u64) {
        let mut state = self.state.lock().unwrap();
        if state.current_generation != generation || state.transition.is_none() {
            return;
        }

        tracing::warn!(generation, "collective phase timeout expired; forcing progress");

        let direction = state.transition.as_ref().unwrap().direction;
        let outstanding: Vec<ClientId> = {
            let ctx = state.transition.as_ref().unwrap();
            let mut ids: Vec<ClientId> = ctx.pending_parallel.iter().copied().collect();
            if let Some(seq) = ctx.current_sequential {
                ids.push(seq);
            }
            ids
        };

        for id in outstanding {
            if let Some(handle) = state.client_timers.remove(&id) {
                self.timers.cancel(handle);
            }
            if let Some(client) = state.registry.find_by_id_mut(id) {
                client.is_shut_down = direction == Direction::Shutdown;
            }
        }
        if let Some(ctx) = state.transition.as_mut() {
            ctx.pending_parallel.clear();
            ctx.current_sequential = None;
            ctx.sequential_queue.clear();
        }

        self.complete_phase(&mut state);
    }

    fn handle_timer_expired(&self, id: ClientId, generation: u64) {
        let mut state = self.state.lock().unwrap();
        if state.current_generation != generation {
            return;
        }
        state.client_timers.remove(&id);

        let in_sequential = state
            .transition
            .as_ref()
            .is_some_and(|ctx| ctx.current_sequential == Some(id));
        if in_sequential {
            let direction = state.transition.as_ref().unwrap().direction;
            if let Some(client) = state.registry.find_by_id_mut(id) {
                client.is_shut_down = direction == Direction::Shutdown;
            }
            tracing::warn!(client = %id, "per-client timer expired; treating as acknowledged");
            if let Some(ctx) = state.transition.as_mut() {
                ctx.current_sequential = None;
            }
            self.advance_sequential(&mut state);
            return;
        }

        let was_parallel = state
            .transition
            .as_mut()
            .is_some_and(|ctx| ctx.pending_parallel.remove(&id));
        if was_parallel {
            let direction = state.transition.as_ref().unwrap().direction;
            if let Some(client) = state.registry.find_by_id_mut(id) {
                client.is_shut_down = direction == Direction::Shutdown;
            }
            tracing::warn!(client = %id, "per-client timer expired in parallel phase");
            let empty = state.transition.as_ref().unwrap().pending_parallel.is_empty();
            if empty {
                self.complete_phase(&mut state);
            }
        }
    }

    fn reconcile_late(&self, state: &mut EngineState, id: ClientId) {
        let expect_shut_down =
            state.node_state.is_shutting_down() || state.node_state == NodeState::Shutdown;
        let fast = state.node_state == NodeState::FastShutdown;
        let Some(client) = state.registry.find_by_id_mut(id) else {
            return;
        };

        if expect_shut_down && !client.is_shut_down {
            client.is_shut_down = true;
            let kind = if fast { ShutdownKind::FAST } else { ShutdownKind::NORMAL };
            tracing::info!(client = %id, "late reply disagreed with node state; sending out-of-band shutdown reconciliation");
            self.transport.send_notification(id, kind);
        } else if !expect_shut_down && client.is_shut_down {
            client.is_shut_down = false;
            tracing::info!(client = %id, "late reply disagreed with node state; sending out-of-band run-up reconciliation");
            self.transport.send_notification(id, ShutdownKind::RUN_UP);
        }
    }

    /// Aggregate-timeout bookkeeping (§3): not enforced, logged only. Sums
    /// the registered timeout of every client that will be notified
    /// sequentially in this transition and adds the largest timeout among
    /// those notified in parallel, then warns if that total is above the
    /// configured ceiling.
    fn warn_if_aggregate_exceeds_ceiling(&self, state: &EngineState, direction: Direction, fast: bool) {
        let kind_bit = match direction {
            Direction::Shutdown => {
                if fast {
                    ShutdownKind::FAST
                } else {
                    ShutdownKind::NORMAL
                }
            }
            Direction::RunUp => ShutdownKind::RUN_UP,
        };

        let mut sequential_sum_ms: u64 = 0;
        let mut parallel_max_ms: u64 = 0;
        for client in state.registry.iterate_forward() {
            if !client.registered_mask.contains(kind_bit) {
                continue;
            }
            let timeout_ms = u64::from(client.timeout_ms);
            if client.registered_mask.is_parallel() {
                parallel_max_ms = parallel_max_ms.max(timeout_ms);
            } else {
                sequential_sum_ms += timeout_ms;
            }
        }

        let aggregate_ms = sequential_sum_ms + parallel_max_ms;
        if aggregate_ms > u64::from(self.limits.aggregate_ceiling_ms) {
            tracing::warn!(
                aggregate_ms,
                ceiling_ms = self.limits.aggregate_ceiling_ms,
                sequential_sum_ms,
                parallel_max_ms,
                "aggregate per-client timeout bookkeeping exceeds configured ceiling"
            );
        }
    }
}

fn client_matches_phase(
    client: &LifecycleClient,
    direction: Direction,
    fast: bool,
    parallel_phase: bool,
) -> bool {
    let base_matches = match direction {
        Direction::Shutdown => {
            if fast {
                client.registered_mask.contains(ShutdownKind::FAST)
            } else {
                client.registered_mask.contains(ShutdownKind::NORMAL)
            }
        }
        Direction::RunUp => client.registered_mask.contains(ShutdownKind::RUN_UP),
    };
    base_matches && client.registered_mask.is_parallel() == parallel_phase
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::transport::{NullPlatform, RecordingTransport};
    use std::sync::Arc;

    fn engine_with_test_clock() -> (Arc<LifecycleEngine<TestClock>>, TestClock, Arc<RecordingTransport>) {
        let clock = TestClock::new();
        let transport = Arc::new(RecordingTransport::new());
        let engine = LifecycleEngine::with_clock(clock.clone(), transport.clone(), Arc::new(NullPlatform));
        (engine, clock, transport)
    }

    fn wait_for<F: Fn() -> bool>(predicate: F) {
        let start = Instant::now();
        while !predicate() {
            if start.elapsed() > Duration::from_secs(2) {
                panic!("condition never became true");
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    // S1: clean shutdown, parallel then reverse-sequential, all ack in time.
    #[test]
    fn s1_clean_shutdown_order() {
        let (engine, _clock, transport) = engine_with_test_clock();
        let a = ClientId::new(1);
        let b = ClientId::new(2);
        let c = ClientId::new(3);
        engine.register_client(a, ShutdownKind::NORMAL, 500);
        engine.register_client(b, ShutdownKind::NORMAL, 500);
        engine.register_client(c, ShutdownKind::NORMAL.union(ShutdownKind::PARALLEL), 500);

        assert_eq!(engine.set_node_state(NodeState::ShuttingDown, true), ErrorStatus::Ok);

        wait_for(|| !transport.sent().is_empty());
        assert_eq!(transport.sent(), vec![(c, ShutdownKind::NORMAL.union(ShutdownKind::PARALLEL))]);

        assert_eq!(engine.acknowledge(c), ErrorStatus::Ok);
        wait_for(|| transport.sent().len() >= 2);
        assert_eq!(transport.sent()[1], (b, ShutdownKind::NORMAL));

        assert_eq!(engine.acknowledge(b), ErrorStatus::Ok);
        wait_for(|| transport.sent().len() >= 3);
        assert_eq!(transport.sent()[2], (a, ShutdownKind::NORMAL));

        assert_eq!(engine.acknowledge(a), ErrorStatus::Ok);
        wait_for(|| engine.query_node_state() == NodeState::Shutdown);
    }

    // S2: sequential per-client timeout still lets the transition proceed,
    // and the late ack afterwards is reported as WrongClient.
    #[test]
    fn s2_sequential_timeout_then_late_ack() {
        let (engine, clock, _transport) = engine_with_test_clock();
        let a = ClientId::new(1);
        let b = ClientId::new(2);
        engine.register_client(a, ShutdownKind::NORMAL, 100);
        engine.register_client(b, ShutdownKind::NORMAL, 5000);

        engine.set_node_state(NodeState::ShuttingDown, true);
        // B is notified first (reverse-insertion order).
        assert_eq!(engine.acknowledge(b), ErrorStatus::Ok);

        clock.advance(Duration::from_millis(150));
        wait_for(|| engine.query_node_state() == NodeState::Shutdown);

        assert_eq!(engine.acknowledge(a), ErrorStatus::WrongClient);
    }

    // S3: a run-up request arriving mid-shutdown cancels the in-flight
    // timers and drives the node through run-up's own two phases instead
    // (sequential first, then parallel), reaching FullyOperational.
    #[test]
    fn s3_run_up_interrupts_in_flight_shutdown() {
        let (engine, _clock, transport) = engine_with_test_clock();
        let a = ClientId::new(1);
        let b = ClientId::new(2);
        let c = ClientId::new(3);
        let run_up_normal = ShutdownKind::NORMAL.union(ShutdownKind::RUN_UP);
        engine.register_client(a, run_up_normal, 500);
        engine.register_client(b, run_up_normal, 500);
        engine.register_client(c, run_up_normal.union(ShutdownKind::PARALLEL), 500);

        assert_eq!(engine.set_node_state(NodeState::ShuttingDown, true), ErrorStatus::Ok);
        wait_for(|| !transport.sent().is_empty());
        assert_eq!(transport.sent()[0], (c, ShutdownKind::NORMAL.union(ShutdownKind::PARALLEL)));

        assert_eq!(engine.acknowledge(c), ErrorStatus::Ok);
        wait_for(|| transport.sent().len() >= 2);
        assert_eq!(transport.sent()[1], (b, ShutdownKind::NORMAL));

        // Before B acks, the node is asked to come back up.
        assert_eq!(engine.set_node_state(NodeState::BaseRunning, true), ErrorStatus::Ok);
        wait_for(|| transport.sent().len() >= 3);
        assert_eq!(transport.sent()[2], (a, ShutdownKind::RUN_UP));

        assert_eq!(engine.acknowledge(a), ErrorStatus::Ok);
        wait_for(|| transport.sent().len() >= 4);
        assert_eq!(transport.sent()[3], (b, ShutdownKind::RUN_UP));

        assert_eq!(engine.acknowledge(b), ErrorStatus::Ok);
        wait_for(|| transport.sent().len() >= 5);
        assert_eq!(
            transport.sent()[4],
            (c, ShutdownKind::RUN_UP.union(ShutdownKind::PARALLEL))
        );

        assert_eq!(engine.acknowledge(c), ErrorStatus::Ok);
        wait_for(|| engine.query_node_state() == NodeState::FullyOperational);
    }

    // S4: reset in progress rejects unrelated external transitions but
    // still accepts the shutdown it triggers.
    #[test]
    fn s4_reset_in_progress_blocks_running_transitions() {
        let (engine, _clock, _transport) = engine_with_test_clock();
        let a = ClientId::new(1);
        engine.register_client(a, ShutdownKind::NORMAL, 5000);
        engine.set_node_state(NodeState::FullyRunning, false);
        engine.request_reset(ResetReason(1), false);

        // A pending client keeps the transition parked at ShuttingDown so
        // the external rejection below is actually exercised mid-reset.
        assert_eq!(engine.query_node_state(), NodeState::ShuttingDown);
        assert_eq!(engine.set_node_state(NodeState::FullyRunning, true), ErrorStatus::Error);
        assert_eq!(engine.query_node_state(), NodeState::ShuttingDown);

        assert_eq!(engine.acknowledge(a), ErrorStatus::Ok);
        wait_for(|| engine.query_node_state() == NodeState::Shutdown);
        assert!(!engine.is_reset_active());
    }

    // S5: a client's shutdown ack goes missing, its per-client timer fires,
    // the node comes back up without that client ever being touched again
    // (it has no run-up interest), and the stale ack arrives afterwards.
    // It is reported as WrongClient and resynced out of band.
    #[test]
    fn s5_late_shutdown_ack_after_run_up_resync() {
        let (engine, clock, transport) = engine_with_test_clock();
        let x = ClientId::new(11);
        let y = ClientId::new(12);
        // Registered in this order so reverse (shutdown) traversal notifies
        // x first: x's timeout fires while y is still queued, keeping the
        // transition alive for the run-up request below.
        engine.register_client(y, ShutdownKind::NORMAL.union(ShutdownKind::RUN_UP), 5_000);
        engine.register_client(x, ShutdownKind::NORMAL, 100);

        assert_eq!(engine.set_node_state(NodeState::ShuttingDown, true), ErrorStatus::Ok);
        wait_for(|| !transport.sent().is_empty());
        assert_eq!(transport.sent()[0], (x, ShutdownKind::NORMAL));

        // x never acks; its per-client timer expires and y is notified next.
        clock.advance(Duration::from_millis(150));
        wait_for(|| transport.sent().len() >= 2);
        assert_eq!(transport.sent()[1], (y, ShutdownKind::NORMAL));
        assert_eq!(engine.query_node_state(), NodeState::ShuttingDown);

        // The node is brought back up before y acks; x has no run-up
        // interest so it is not touched by this second transition.
        assert_eq!(engine.set_node_state(NodeState::BaseRunning, true), ErrorStatus::Ok);
        wait_for(|| transport.sent().len() >= 3);
        assert_eq!(transport.sent()[2], (y, ShutdownKind::RUN_UP));

        assert_eq!(engine.acknowledge(y), ErrorStatus::Ok);
        wait_for(|| engine.query_node_state() == NodeState::FullyOperational);

        // x's long-delayed shutdown ack finally arrives.
        assert_eq!(engine.acknowledge(x), ErrorStatus::WrongClient);
        wait_for(|| transport.sent().len() >= 4);
        assert_eq!(transport.sent()[3], (x, ShutdownKind::RUN_UP));
    }

    // S6: collective expiry forces Shutdown even with no acks at all.
    #[test]
    fn s6_collective_timeout_forces_shutdown() {
        let (engine, clock, _transport) = engine_with_test_clock();
        let y = ClientId::new(7);
        engine.register_client(y, ShutdownKind::FAST, 60_000);

        engine.set_node_state(NodeState::FastShutdown, true);
        assert_eq!(engine.query_node_state(), NodeState::FastShutdown);

        clock.advance(Duration::from_secs(3));
        wait_for(|| engine.query_node_state() == NodeState::Shutdown);
    }

    // A fresh registration with `timeout_ms == 0` gets the configured
    // default rather than an un-timed notification; if it hadn't, the
    // per-client timer would arm with a zero duration and the transition
    // would race to completion without ever waiting on the test clock.
    #[test]
    fn zero_timeout_on_new_registration_falls_back_to_configured_default() {
        let clock = TestClock::new();
        let transport = Arc::new(RecordingTransport::new());
        let limits = EngineLimits {
            default_client_timeout_ms: 5_000,
            aggregate_ceiling_ms: 120_000,
        };
        let engine = LifecycleEngine::with_clock_and_limits(
            clock,
            transport.clone(),
            Arc::new(NullPlatform),
            limits,
        );
        let a = ClientId::new(1);
        engine.register_client(a, ShutdownKind::NORMAL, 0);

        assert_eq!(engine.set_node_state(NodeState::ShuttingDown, true), ErrorStatus::Ok);
        wait_for(|| !transport.sent().is_empty());

        // The clock never advances past the fallback default, so the
        // per-client timer cannot have fired; the transition is still
        // waiting on an explicit acknowledgement.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(engine.query_node_state(), NodeState::ShuttingDown);

        assert_eq!(engine.acknowledge(a), ErrorStatus::Ok);
        wait_for(|| engine.query_node_state() == NodeState::Shutdown);
    }

    #[test]
    fn registration_is_idempotent_and_reports_update() {
        let (engine, _clock, _transport) = engine_with_test_clock();
        let a = ClientId::new(42);
        assert_eq!(engine.register_client(a, ShutdownKind::NORMAL, 500), ErrorStatus::Ok);
        assert_eq!(engine.register_client(a, ShutdownKind::NORMAL, 500), ErrorStatus::Last);
    }

    #[test]
    fn repeated_shutdown_request_is_idempotent() {
        let (engine, _clock, _transport) = engine_with_test_clock();
        engine.set_node_state(NodeState::FullyRunning, false);
        assert_eq!(engine.set_node_state(NodeState::ShuttingDown, true), ErrorStatus::Ok);
        assert_eq!(engine.set_node_state(NodeState::ShuttingDown, true), ErrorStatus::Ok);
    }
}
