//! Map operations and results.

use bytes::Bytes;
use lodestone_rsm::Operation;
use lodestone_types::{ConsistencyLevel, OperationKind, Persistence, Ttl};
use serde::{Deserialize, Serialize};

/// Mutating map operations, linearized through the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapCommand {
    /// Installs `key → value`, replacing any prior entry.
    Put {
        key: Bytes,
        value: Bytes,
        persistence: Persistence,
        ttl: Ttl,
    },

    /// Installs only if the key has no active entry.
    PutIfAbsent {
        key: Bytes,
        value: Bytes,
        persistence: Persistence,
        ttl: Ttl,
    },

    /// Removes the entry; with `expected` set, only when the current value
    /// compares equal (compare-and-remove).
    Remove {
        key: Bytes,
        expected: Option<Bytes>,
    },

    /// Drops every entry.
    Clear,
}

/// Read-only map operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapQuery {
    Get { key: Bytes },
    GetOrDefault { key: Bytes, default: Bytes },
    ContainsKey { key: Bytes },
    Size,
    IsEmpty,
}

/// The full operation set the map applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapOperation {
    Command(MapCommand),
    Query {
        consistency: ConsistencyLevel,
        query: MapQuery,
    },
}

impl Operation for MapOperation {
    fn kind(&self) -> OperationKind {
        match self {
            Self::Command(_) => OperationKind::Command,
            Self::Query { .. } => OperationKind::Query,
        }
    }

    fn consistency(&self) -> Option<ConsistencyLevel> {
        match self {
            Self::Command(_) => None,
            Self::Query { consistency, .. } => Some(*consistency),
        }
    }
}

/// Result of applying one map operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapOutput {
    /// A value-shaped answer: prior value for `Put`/`Remove`, current value
    /// for `Get`, existing value for a rejected `PutIfAbsent`.
    Value(Option<Bytes>),
    /// A boolean answer: `ContainsKey`, compare-and-remove, `IsEmpty`.
    Flag(bool),
    /// Raw entry count (lazily-expired entries included).
    Size(u64),
    /// No payload (`Clear`).
    Unit,
}
