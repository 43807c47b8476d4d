//! Ordered event deliveries from a state machine to client sessions.
//!
//! Handlers publish events mid-apply; the substrate drains the outbox after
//! each commit and pushes the deliveries to the named sessions. Publication
//! order within a handler is preserved — observers rely on it (a member is
//! closed before its `leave` is published, a `resign` precedes the `term`
//! that precedes the `elect`).

use lodestone_types::SessionId;

use crate::session::SessionRegistry;

/// One event addressed to one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery<E> {
    pub session: SessionId,
    pub event: E,
}

/// Buffer of deliveries produced during commit application.
///
/// Publishing to a session that is not active is a silent no-op: the
/// session's client is gone (or going), and events are best-effort
/// notifications, not replicated state.
#[derive(Debug, Clone, Default)]
pub struct Outbox<E> {
    deliveries: Vec<Delivery<E>>,
}

impl<E> Outbox<E> {
    pub fn new() -> Self {
        Self {
            deliveries: Vec::new(),
        }
    }

    /// Queues `event` for `session` if the session is active.
    pub fn publish(&mut self, sessions: &SessionRegistry, session: SessionId, event: E) {
        if sessions.is_active(session) {
            self.deliveries.push(Delivery { session, event });
        }
    }

    /// Takes every delivery queued since the last drain, in publish order.
    pub fn drain(&mut self) -> Vec<Delivery<E>> {
        std::mem::take(&mut self.deliveries)
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}
