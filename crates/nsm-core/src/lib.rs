//! Core lifecycle engine: node-state machine, ordered client registry, and
//! the two-phase shutdown/run-up transition protocol.
//!
//! This crate has no transport opinions of its own — [`transport`] defines
//! the seam a concrete IPC binding and platform integration plug into.

mod clock;
mod engine;
mod phase;
mod registry;
mod surface;
mod timer;
mod transport;

pub use clock::{Clock, SystemClock, TestClock};
pub use engine::LifecycleEngine;
pub use phase::{Direction, EngineLimits, EnginePhase};
pub use registry::{
    clamp_timeout_ms, ClientRegistry, LifecycleClient, RemoveOutcome, UpsertOutcome, TIMEOUT_MAX_MS,
    TIMEOUT_MIN_MS,
};
pub use surface::RequestSurface;
pub use timer::{TimerHandle, TimerService};
pub use transport::{ClientTransport, NullPlatform, PlatformStateMachine, RecordingTransport, ResetReason};

pub use nsm_types::{ClientId, ErrorStatus, NodeState, NsmError, ShutdownKind};
