//! Member state: identity, session binding, and the message pipeline slots.

use std::collections::VecDeque;

use lodestone_rsm::Commit;
use lodestone_types::{LogIndex, MemberId, SessionId};

use crate::ops::{GroupCommand, SubmitRequest};

/// A message delivered (or queued for delivery) to one member.
///
/// Holds the Submit commit; broadcast copies at different members share the
/// same commit handle, which is released exactly once when the submission
/// finalizes.
#[derive(Debug, Clone)]
pub(crate) struct Message {
    pub(crate) commit: Commit<GroupCommand>,
    pub(crate) direct: bool,
}

impl Message {
    /// The Submit commit's index; doubles as the acknowledgement id.
    pub(crate) fn index(&self) -> LogIndex {
        self.commit.index()
    }

    /// The session that submitted the message.
    pub(crate) fn producer(&self) -> SessionId {
        self.commit.session()
    }

    pub(crate) fn submit(&self) -> &SubmitRequest {
        match self.commit.operation() {
            GroupCommand::Submit(request) => request,
            other => unreachable!("message holds a non-submit commit: {other:?}"),
        }
    }
}

/// One registered group member.
#[derive(Debug)]
pub(crate) struct Member {
    pub(crate) id: MemberId,
    /// Index of the original Join commit — the stable identity tag; it
    /// survives persistent re-joins.
    pub(crate) index: LogIndex,
    pub(crate) persistent: bool,
    /// `None` for a persistent member whose session was lost.
    pub(crate) session: Option<SessionId>,
    /// The original Join commit, retained as the authoritative membership
    /// record until the member is removed.
    pub(crate) join_commit: Commit<GroupCommand>,
    /// At most one in-flight message.
    pub(crate) current: Option<Message>,
    /// Messages waiting for the in-flight slot, FIFO.
    pub(crate) queue: VecDeque<Message>,
}

impl Member {
    pub(crate) fn new(id: MemberId, persistent: bool, join_commit: Commit<GroupCommand>) -> Self {
        Self {
            id,
            index: join_commit.index(),
            persistent,
            session: Some(join_commit.session()),
            join_commit,
            current: None,
            queue: VecDeque::new(),
        }
    }

    /// Takes the in-flight message and every queued message, in order.
    pub(crate) fn drain_messages(&mut self) -> Vec<Message> {
        self.current
            .take()
            .into_iter()
            .chain(self.queue.drain(..))
            .collect()
    }
}
