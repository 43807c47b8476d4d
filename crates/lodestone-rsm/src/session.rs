//! Live-session tracking for a state machine instance.
//!
//! The substrate reports session transitions (open, expire, close) as
//! callbacks on the total order. Each state machine keeps its own registry
//! so that ephemerality checks and event publication consult replicated
//! state rather than anything node-local.

use std::collections::BTreeSet;

use lodestone_types::SessionId;

/// The set of sessions currently active on this state machine.
///
/// Backed by an ordered set: iteration order is part of the replicated
/// behavior (listener notification order, deterministic sweeps), so an
/// unordered container would be a correctness bug, not a style choice.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    live: BTreeSet<SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly opened session.
    pub fn open(&mut self, session: SessionId) {
        let inserted = self.live.insert(session);
        debug_assert!(inserted, "{session} opened twice");
    }

    /// Removes a session that timed out.
    pub fn expire(&mut self, session: SessionId) {
        self.live.remove(&session);
    }

    /// Removes a session that closed explicitly.
    pub fn close(&mut self, session: SessionId) {
        self.live.remove(&session);
    }

    /// Whether the session is live and may receive events.
    pub fn is_active(&self, session: SessionId) -> bool {
        self.live.contains(&session)
    }

    /// Live sessions in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.live.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
