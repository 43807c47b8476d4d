//! The state machine contract with the consensus substrate.

use lodestone_types::{ConsistencyLevel, LogIndex, OperationKind, SessionId};

use crate::commit::{Commit, LogContext};
use crate::outbox::Delivery;

/// Which compaction pass is consulting the filter.
///
/// Minor compaction runs frequently and may only drop records whose state
/// is fully superseded. Major compaction additionally reclaims tombstones
/// once it has advanced past them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionKind {
    Minor,
    Major,
}

/// Context handed to the filter for each retained commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compaction {
    /// Highest index the compaction pass has caught up to.
    pub index: LogIndex,
    pub kind: CompactionKind,
}

impl Compaction {
    pub fn is_major(&self) -> bool {
        matches!(self.kind, CompactionKind::Major)
    }
}

/// An operation understood by a state machine.
pub trait Operation {
    /// Whether the operation mutates state.
    fn kind(&self) -> OperationKind;

    /// The consistency level a query was tagged with; `None` for commands.
    fn consistency(&self) -> Option<ConsistencyLevel> {
        None
    }
}

/// A deterministic replicated state machine.
///
/// The substrate calls the methods of one instance from a single thread, in
/// total order, with no suspension points inside a handler. Determinism is
/// the whole contract: given the same prefix of commits and callbacks,
/// every replica must hold identical state, publish identical events, and
/// answer the filter identically.
pub trait StateMachine {
    type Operation: Operation;
    type Output;
    type Event;
    type Error: std::error::Error;

    /// A client session opened.
    fn on_open(&mut self, session: SessionId, ctx: LogContext);

    /// A client session timed out.
    fn on_expire(&mut self, session: SessionId, ctx: LogContext);

    /// A client session closed explicitly.
    fn on_close(&mut self, session: SessionId, ctx: LogContext);

    /// Applies one committed operation.
    ///
    /// On return, the commit must be either retained (stored by the
    /// machine or left for the filter to judge) or released. On error the
    /// commit must be released and state left untouched — handlers
    /// validate before mutating.
    fn apply(&mut self, commit: Commit<Self::Operation>) -> Result<Self::Output, Self::Error>;

    /// Decides whether a retained commit's bytes are still live.
    ///
    /// Must be a deterministic function of current machine state and the
    /// compaction context. `true` keeps the record, `false` lets the
    /// compaction drop it.
    fn filter(&self, commit: &Commit<Self::Operation>, compaction: Compaction) -> bool;

    /// A keep-alive entry: advances logical time without an operation.
    ///
    /// Machines with scheduled work override this to fire due timers.
    fn tick(&mut self, ctx: LogContext) {
        let _ = ctx;
    }

    /// Takes the events published since the last drain, in publish order.
    fn drain_events(&mut self) -> Vec<Delivery<Self::Event>>;
}
