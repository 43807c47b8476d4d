//! # lodestone-types: Core types for Lodestone
//!
//! This crate contains shared types used across the Lodestone system:
//! - Entity IDs ([`LogIndex`], [`SessionId`], [`MemberId`])
//! - Temporal types ([`Timestamp`], [`Ttl`])
//! - Operation metadata ([`ConsistencyLevel`], [`Persistence`], [`OperationKind`])
//! - Session lifecycle ([`SessionState`])
//!
//! Everything here is deliberately small and deterministic: these types flow
//! through the replicated log, so their semantics (ordering, ordinals,
//! equality) are part of the replication contract.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

// ============================================================================
// Entity IDs - All Copy (cheap 8-byte values)
// ============================================================================

/// Position of a committed operation in the replicated log.
///
/// Indices are strictly monotonic across all commits a state machine
/// receives. They double as identity tags: a group member is identified by
/// the index of its original Join commit, and a message is acknowledged by
/// the index of its Submit commit.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct LogIndex(u64);

impl LogIndex {
    pub const ZERO: LogIndex = LogIndex(0);

    pub fn new(index: u64) -> Self {
        Self(index)
    }

    /// Returns the index as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for LogIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for LogIndex {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<LogIndex> for u64 {
    fn from(index: LogIndex) -> Self {
        index.0
    }
}

/// Unique identifier for a client session.
///
/// Sessions are opened, expired, and closed by the consensus substrate;
/// the transitions arrive as state-machine callbacks on the total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the session ID as a `u64`.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SessionId> for u64 {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Application-chosen name of a group member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for MemberId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Temporal types
// ============================================================================

/// A millisecond timestamp on the replicated timeline.
///
/// Timestamps are assigned by the consensus substrate and are monotonic
/// non-decreasing across commits. State machines derive their logical clock
/// exclusively from these values; no system clock is ever consulted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds.
    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Milliseconds elapsed since `earlier`.
    ///
    /// Saturates at zero rather than going negative; callers compare
    /// durations against TTLs and grace periods, where a negative elapsed
    /// time is meaningless.
    pub fn millis_since(&self, earlier: Timestamp) -> i64 {
        (self.0 - earlier.0).max(0)
    }

    /// The timestamp `millis` later than this one.
    pub fn plus_millis(&self, millis: i64) -> Timestamp {
        Timestamp(self.0.saturating_add(millis))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for i64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

/// A per-entry time-to-live in milliseconds.
///
/// `Ttl::NONE` (zero) means the entry never expires.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Ttl(u64);

impl Ttl {
    /// No expiry.
    pub const NONE: Ttl = Ttl(0);

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Returns true if the entry never expires.
    pub fn is_unbounded(&self) -> bool {
        self.0 == 0
    }
}

impl Display for Ttl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unbounded() {
            write!(f, "unbounded")
        } else {
            write!(f, "{}ms", self.0)
        }
    }
}

// ============================================================================
// Operation metadata
// ============================================================================

/// Read consistency requested by a query.
///
/// Commands are always linearized through the log and carry no level.
/// The ordinals are stable wire values; the enum order is weakest-first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum ConsistencyLevel {
    Serializable = 0,
    Causal = 1,
    Bounded = 2,
    #[default]
    LinearizableLease = 3,
    Linearizable = 4,
}

impl ConsistencyLevel {
    /// Stable wire ordinal.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Inverse of [`ConsistencyLevel::ordinal`].
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Serializable),
            1 => Some(Self::Causal),
            2 => Some(Self::Bounded),
            3 => Some(Self::LinearizableLease),
            4 => Some(Self::Linearizable),
            _ => None,
        }
    }
}

/// Entity lifetime policy.
///
/// Ephemeral entities are bound to their creating session and disappear
/// when it does; persistent entities survive session loss.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Persistence {
    #[default]
    Persistent = 0,
    Ephemeral = 1,
}

impl Persistence {
    /// Stable wire ordinal.
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Inverse of [`Persistence::ordinal`].
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(Self::Persistent),
            1 => Some(Self::Ephemeral),
            _ => None,
        }
    }

    pub fn is_ephemeral(self) -> bool {
        matches!(self, Self::Ephemeral)
    }
}

/// Whether an operation mutates state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Mutating; always linearized via the log.
    Command,
    /// Read-only; carries a [`ConsistencyLevel`].
    Query,
}

// ============================================================================
// Session lifecycle
// ============================================================================

/// Lifecycle state of a client session.
///
/// Only `Active` sessions receive published events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Active,
    Expired,
    Closed,
}

impl SessionState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

// ============================================================================
// Tests
// ============================================================================
