//! The ordered registry of lifecycle clients (§4.2). Insertion order is
//! significant: shutdown traversal visits clients in reverse-insertion
//! order, run-up traversal in insertion order (the "LIFO shutdown, FIFO
//! bring-up" property).
//!
//! Implemented as an indexed arena (`Vec<ClientId>` for order) with a side
//! hash map for O(1) lookup by id, per the design notes' recommendation.

use std::collections::HashMap;

use nsm_types::{ClientId, ShutdownKind};

/// Minimum and maximum allowed per-client timeout, in milliseconds.
pub const TIMEOUT_MIN_MS: u32 = 0;
pub const TIMEOUT_MAX_MS: u32 = 60_000;

#[must_use]
pub fn clamp_timeout_ms(timeout_ms: u32) -> u32 {
    timeout_ms.clamp(TIMEOUT_MIN_MS, TIMEOUT_MAX_MS)
}

/// A registered lifecycle client.
#[derive(Debug, Clone)]
pub struct LifecycleClient {
    pub id: ClientId,
    pub registered_mask: ShutdownKind,
    pub timeout_ms: u32,
    /// Notified of and acknowledged a shutdown in the current lifecycle,
    /// not yet run back up.
    pub is_shut_down: bool,
    /// A notification is in flight awaiting acknowledgement, or has timed
    /// out but may still be reconciled as a late reply.
    pub has_pending_call: bool,
}

impl LifecycleClient {
    fn new(id: ClientId, registered_mask: ShutdownKind, timeout_ms: u32) -> Self {
        LifecycleClient {
            id,
            registered_mask,
            timeout_ms: clamp_timeout_ms(timeout_ms),
            is_shut_down: false,
            has_pending_call: false,
        }
    }
}

/// Outcome of `ClientRegistry::upsert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Outcome of `ClientRegistry::remove_kinds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Ok,
    NotFound,
}

#[derive(Default)]
pub struct ClientRegistry {
    order: Vec<ClientId>,
    clients: HashMap<ClientId, LifecycleClient>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        ClientRegistry::default()
    }

    pub fn upsert(&mut self, id: ClientId, kinds: ShutdownKind, timeout_ms: u32) -> UpsertOutcome {
        if let Some(existing) = self.clients.get_mut(&id) {
            existing.registered_mask = existing.registered_mask.union(kinds);
            if timeout_ms != 0 {
                existing.timeout_ms = clamp_timeout_ms(timeout_ms);
            }
            UpsertOutcome::Updated
        } else {
            self.order.push(id);
            self.clients
                .insert(id, LifecycleClient::new(id, kinds, timeout_ms));
            UpsertOutcome::Created
        }
    }

    pub fn remove_kinds(&mut self, id: ClientId, kinds: ShutdownKind) -> RemoveOutcome {
        let Some(client) = self.clients.get_mut(&id) else {
            return RemoveOutcome::NotFound;
        };
        client.registered_mask = client.registered_mask.difference(kinds);
        if client.registered_mask.is_empty() {
            self.evict(id);
        }
        RemoveOutcome::Ok
    }

    /// Removes the client outright, regardless of its registered mask.
    /// Used when a client disconnects or when its mask has already been
    /// reduced to `Not`.
    pub fn evict(&mut self, id: ClientId) {
        if self.clients.remove(&id).is_some() {
            self.order.retain(|existing| *existing != id);
        }
    }

    #[must_use]
    pub fn find_by_id(&self, id: ClientId) -> Option<&LifecycleClient> {
        self.clients.get(&id)
    }

    pub fn find_by_id_mut(&mut self, id: ClientId) -> Option<&mut LifecycleClient> {
        self.clients.get_mut(&id)
    }

    /// Clients in insertion order (oldest first) — the run-up traversal
    /// order.
    pub fn iterate_forward(&self) -> impl Iterator<Item = &LifecycleClient> {
        self.order.iter().filter_map(|id| self.clients.get(id))
    }

    /// Clients in reverse-insertion order (newest first) — the shutdown
    /// traversal order.
    pub fn iterate_reverse(&self) -> impl Iterator<Item = &LifecycleClient> {
        self.order.iter().rev().filter_map(|id| self.clients.get(id))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
