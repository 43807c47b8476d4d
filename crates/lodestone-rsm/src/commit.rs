//! The commit envelope delivered by the consensus substrate.
//!
//! A [`Commit`] wraps one operation with its log index, its replicated
//! timestamp, and the session that submitted it. The envelope doubles as a
//! retention handle: as long as the state machine holds the commit without
//! releasing it, the underlying log bytes are semantically live and
//! compaction must keep them (subject to the machine's filter). Calling
//! [`Commit::release`] hands the record back to the log for reclamation.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use lodestone_types::{LogIndex, SessionId, Timestamp};

/// Index and timestamp of the log entry currently being applied.
///
/// Passed to session callbacks and tick entries, which carry no operation
/// payload of their own but still occupy a slot in the total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogContext {
    pub index: LogIndex,
    pub timestamp: Timestamp,
}

struct CommitInner<T> {
    index: LogIndex,
    timestamp: Timestamp,
    session: SessionId,
    operation: T,
    released: Cell<bool>,
}

/// A durably ordered record delivered to a state machine.
///
/// `Commit` is a cheap-clone shared handle: clones refer to the same log
/// record and the same retention slot. State machine instances are
/// single-threaded by contract, so the handle is `Rc`-based and not `Send`.
///
/// Ownership of the record transfers from the substrate to the machine on
/// apply and back to the log on [`Commit::release`]. Releasing the same
/// record twice is a logic error and is asserted in debug builds.
pub struct Commit<T> {
    inner: Rc<CommitInner<T>>,
}

impl<T> Commit<T> {
    pub fn new(index: LogIndex, timestamp: Timestamp, session: SessionId, operation: T) -> Self {
        Self {
            inner: Rc::new(CommitInner {
                index,
                timestamp,
                session,
                operation,
                released: Cell::new(false),
            }),
        }
    }

    /// The position of this record in the total order.
    pub fn index(&self) -> LogIndex {
        self.inner.index
    }

    /// The replicated timestamp assigned by the substrate.
    pub fn timestamp(&self) -> Timestamp {
        self.inner.timestamp
    }

    /// The session that submitted the operation.
    pub fn session(&self) -> SessionId {
        self.inner.session
    }

    /// The wrapped operation.
    pub fn operation(&self) -> &T {
        &self.inner.operation
    }

    /// Hands the record back to the log so compaction may drop its bytes.
    pub fn release(&self) {
        debug_assert!(
            !self.inner.released.get(),
            "commit {} released twice",
            self.inner.index
        );
        self.inner.released.set(true);
    }

    /// Whether the record has been handed back to the log.
    pub fn is_released(&self) -> bool {
        self.inner.released.get()
    }
}

impl<T> Clone for Commit<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Commit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commit")
            .field("index", &self.inner.index)
            .field("timestamp", &self.inner.timestamp)
            .field("session", &self.inner.session)
            .field("operation", &self.inner.operation)
            .field("released", &self.inner.released.get())
            .finish()
    }
}
