//! Interfaces to the two collaborators the design document keeps outside
//! the core: the IPC/RPC transport that actually delivers notifications to
//! clients, and the platform state-machine extension consulted for LUC and
//! restart decisions. Both are out of scope for this crate's own
//! implementation; it only defines the seam.

use nsm_types::{ClientId, ShutdownKind};

/// Delivers a lifecycle notification to a client. Implementations must not
/// block the calling thread on the client's reply — the dispatcher never
/// waits for an acknowledgement; it arrives later through the request
/// surface.
pub trait ClientTransport: Send + Sync + 'static {
    fn send_notification(&self, client: ClientId, kind: ShutdownKind);
}

/// Reason code accompanying a reset request, forwarded verbatim to the
/// platform collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetReason(pub u32);

/// The pluggable platform state-machine collaborator consulted for
/// last-user-context (LUC) and restart decisions (§4.4.5).
pub trait PlatformStateMachine: Send + Sync + 'static {
    /// Whether the previous session's context should be restored rather
    /// than a clean boot.
    fn last_user_context(&self) -> bool;

    /// Forwards a reset request with its reason and shutdown kind. The
    /// platform collaborator owns the decision of *how* the reset is
    /// ultimately carried out; the core's only obligation is to drive the
    /// node through the shutdown path and refuse unrelated state changes
    /// while the reset is in progress.
    fn request_reset(&self, reason: ResetReason, kind: ShutdownKind);
}

/// A transport that records every notification it was asked to send,
/// without delivering it anywhere. Used by tests and as a default for
/// environments that have not wired up a real transport yet.
#[derive(Default)]
pub struct RecordingTransport {
    sent: std::sync::Mutex<Vec<(ClientId, ShutdownKind)>>,
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        RecordingTransport::default()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<(ClientId, ShutdownKind)> {
        self.sent.lock().unwrap().clone()
    }
}

impl ClientTransport for RecordingTransport {
    fn send_notification(&self, client: ClientId, kind: ShutdownKind) {
        self.sent.lock().unwrap().push((client, kind));
    }
}

/// A platform collaborator with no last-user-context and a no-op reset
/// hook, suitable for tests and for deployments that do not yet have a
/// real platform extension.
#[derive(Default)]
pub struct NullPlatform;

impl PlatformStateMachine for NullPlatform {
    fn last_user_context(&self) -> bool {
        false
    }

    fn request_reset(&self, _reason: ResetReason, _kind: ShutdownKind) {}
}
