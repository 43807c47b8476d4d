//! Group operations and results.
//!
//! All five group operations are commands: even `Listen`, which returns a
//! membership snapshot, registers the submitting session as a listener and
//! must therefore be linearized through the log.

use bytes::Bytes;
use lodestone_rsm::Operation;
use lodestone_types::{LogIndex, MemberId, OperationKind, Persistence};
use serde::{Deserialize, Serialize};

/// How a submitted message is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dispatch {
    /// To the named target member only.
    Direct = 0,
    /// To one member chosen by the group's deterministic random stream.
    Random = 1,
    /// To every member.
    Broadcast = 2,
}

impl Dispatch {
    /// Stable wire ordinal.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Inverse of [`Dispatch::ordinal`].
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Direct),
            1 => Some(Self::Random),
            2 => Some(Self::Broadcast),
            _ => None,
        }
    }
}

/// What happens to an undelivered message when its holder terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryPolicy {
    /// Fail the producer.
    Once = 0,
    /// Random-dispatch messages are reassigned to a remaining member.
    Retry = 1,
}

impl DeliveryPolicy {
    /// Stable wire ordinal.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Inverse of [`DeliveryPolicy::ordinal`].
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Once),
            1 => Some(Self::Retry),
            _ => None,
        }
    }
}

/// One message submission. `target` is set iff the dispatch is direct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub target: Option<MemberId>,
    pub dispatch: Dispatch,
    pub delivery: DeliveryPolicy,
    /// Producer-chosen correlation id, echoed back in `ack`/`fail`.
    pub message_id: u64,
    /// Application message type.
    pub kind: String,
    pub payload: Bytes,
}

/// The group's command set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupCommand {
    /// Registers `member_id`, or reattaches a session to a persistent
    /// member of that name.
    Join {
        member_id: MemberId,
        persistence: Persistence,
    },

    /// Deregisters `member_id`.
    Leave { member_id: MemberId },

    /// Registers the submitting session as a group listener.
    Listen,

    /// Enqueues a message to one or all members.
    Submit(SubmitRequest),

    /// Acknowledges (or fails) the in-flight message `id` at `member_id`.
    Ack {
        member_id: MemberId,
        id: LogIndex,
        succeeded: bool,
    },
}

impl Operation for GroupCommand {
    fn kind(&self) -> OperationKind {
        OperationKind::Command
    }
}

/// A member as reported to clients: its name and the index of its original
/// Join commit (the stable identity tag).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: MemberId,
    pub index: LogIndex,
}

/// Result of applying one group command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupOutput {
    /// The joined (or rebound) member.
    Member(MemberInfo),
    /// Membership snapshot in insertion order (`Listen`).
    Members(Vec<MemberInfo>),
    /// No payload.
    Unit,
}
