//! Events the group publishes to client sessions.
//!
//! Membership and leadership events go to every listener session; `message`
//! goes to the receiving member's session; `ack`/`fail` go to the producing
//! session with the original submission echoed. Publication to an inactive
//! session is silently skipped by the outbox.

use bytes::Bytes;
use lodestone_types::{LogIndex, MemberId};
use serde::{Deserialize, Serialize};

use crate::ops::SubmitRequest;

/// A group event, named on the wire by [`GroupEvent::name`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupEvent {
    /// A member joined, or a persistent member reattached a session.
    Join { member: MemberId },

    /// A member left, was removed with its session, or outlived its grace
    /// period without reattaching.
    Leave { member: MemberId },

    /// The term advanced.
    Term { term: u64 },

    /// A leader was elected.
    Elect { leader: MemberId },

    /// The leader stepped down.
    Resign { leader: MemberId },

    /// A message arrived at a member. `index` is the Submit commit's index
    /// and doubles as the acknowledgement id.
    Message {
        index: LogIndex,
        member: MemberId,
        kind: String,
        payload: Bytes,
    },

    /// A submission completed; echoes the original request.
    Ack(SubmitRequest),

    /// A submission failed; echoes the original request.
    Fail(SubmitRequest),
}

impl GroupEvent {
    /// The stable wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Term { .. } => "term",
            Self::Elect { .. } => "elect",
            Self::Resign { .. } => "resign",
            Self::Message { .. } => "message",
            Self::Ack(_) => "ack",
            Self::Fail(_) => "fail",
        }
    }
}
