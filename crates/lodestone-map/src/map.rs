//! The TTL map state machine.

use std::collections::BTreeMap;

use bytes::Bytes;
use lodestone_rsm::{Commit, Compaction, Delivery, LogContext, SessionRegistry, StateMachine};
use lodestone_types::{Persistence, SessionId, Timestamp, Ttl};

use crate::ops::{MapCommand, MapOperation, MapOutput, MapQuery};

/// Map handlers cannot fail: every operation has a defined result on every
/// state, and internal invariant violations are fatal assertions rather
/// than recoverable errors.
#[derive(thiserror::Error, Debug)]
pub enum MapError {}

/// One live entry: the retained Put/PutIfAbsent commit that created it.
///
/// Keeping the whole commit (rather than just the value) is load-bearing:
/// ttl checks need the commit timestamp, ephemerality needs the authoring
/// session, and the compaction filter needs the index.
#[derive(Debug, Clone)]
struct Entry {
    commit: Commit<MapOperation>,
}

impl Entry {
    fn value(&self) -> &Bytes {
        match self.commit.operation() {
            MapOperation::Command(
                MapCommand::Put { value, .. } | MapCommand::PutIfAbsent { value, .. },
            ) => value,
            other => unreachable!("map entry holds a non-put commit: {other:?}"),
        }
    }

    fn persistence(&self) -> Persistence {
        match self.commit.operation() {
            MapOperation::Command(
                MapCommand::Put { persistence, .. } | MapCommand::PutIfAbsent { persistence, .. },
            ) => *persistence,
            other => unreachable!("map entry holds a non-put commit: {other:?}"),
        }
    }

    fn ttl(&self) -> Ttl {
        match self.commit.operation() {
            MapOperation::Command(
                MapCommand::Put { ttl, .. } | MapCommand::PutIfAbsent { ttl, .. },
            ) => *ttl,
            other => unreachable!("map entry holds a non-put commit: {other:?}"),
        }
    }
}

/// Replicated key/value store with per-entry TTL and persistence modes.
#[derive(Debug, Default)]
pub struct TtlMap {
    entries: BTreeMap<Bytes, Entry>,
    sessions: SessionRegistry,
    /// Logical clock: the maximum commit timestamp applied so far.
    time: Timestamp,
}

impl TtlMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// The map's logical clock.
    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// Raw entry count, lazily-expired entries included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Advances the logical clock. Runs first in every handler so TTL
    /// checks within the same commit use the commit's own timestamp.
    fn update_time(&mut self, timestamp: Timestamp) {
        self.time = self.time.max(timestamp);
    }

    /// Whether the entry is observable under the current clock and session
    /// set: not ephemeral-with-dead-session, and not past its ttl.
    fn is_active(&self, entry: &Entry) -> bool {
        if entry.persistence().is_ephemeral() && !self.sessions.is_active(entry.commit.session()) {
            return false;
        }
        let ttl = entry.ttl();
        // millis_since saturates at zero, so the cast is lossless.
        let elapsed = self.time.millis_since(entry.commit.timestamp()) as u64;
        ttl.is_unbounded() || elapsed <= ttl.as_millis()
    }

    /// Lazy expiry: drops the entry under `key` if it is no longer active,
    /// releasing its commit. Keyed accesses call this first, so a "present"
    /// answer is always an active entry.
    fn evict_if_inactive(&mut self, key: &Bytes) {
        let inactive = self.entries.get(key).is_some_and(|e| !self.is_active(e));
        if inactive {
            if let Some(stale) = self.entries.remove(key) {
                tracing::trace!(index = %stale.commit.index(), "evicted inactive map entry");
                stale.commit.release();
            }
        }
    }

    /// The active value under `key`, evicting a stale entry on the way.
    fn active_value(&mut self, key: &Bytes) -> Option<Bytes> {
        self.evict_if_inactive(key);
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn apply_command(&mut self, command: &MapCommand, commit: &Commit<MapOperation>) -> MapOutput {
        match command {
            MapCommand::Put { key, .. } => {
                let prior = self
                    .entries
                    .insert(key.clone(), Entry {
                        commit: commit.clone(),
                    });
                let previous = prior.and_then(|entry| {
                    let active = self.is_active(&entry);
                    entry.commit.release();
                    active.then(|| entry.value().clone())
                });
                MapOutput::Value(previous)
            }

            MapCommand::PutIfAbsent { key, .. } => {
                if let Some(existing) = self.entries.get(key) {
                    if self.is_active(existing) {
                        let value = existing.value().clone();
                        commit.release();
                        return MapOutput::Value(Some(value));
                    }
                }
                // Any survivor here is inactive; this access evicts it.
                self.evict_if_inactive(key);
                self.entries.insert(key.clone(), Entry {
                    commit: commit.clone(),
                });
                MapOutput::Value(None)
            }

            MapCommand::Remove { key, expected } => match expected {
                None => {
                    self.evict_if_inactive(key);
                    let previous = self.entries.remove(key).map(|entry| {
                        let value = entry.value().clone();
                        entry.commit.release();
                        value
                    });
                    MapOutput::Value(previous)
                }
                Some(expected) => {
                    self.evict_if_inactive(key);
                    let matched = self.entries.get(key).is_some_and(|e| e.value() == expected);
                    if matched {
                        if let Some(entry) = self.entries.remove(key) {
                            entry.commit.release();
                        }
                    }
                    MapOutput::Flag(matched)
                }
            },

            MapCommand::Clear => {
                let dropped = std::mem::take(&mut self.entries);
                tracing::debug!(entries = dropped.len(), "cleared map");
                for (_, entry) in dropped {
                    entry.commit.release();
                }
                MapOutput::Unit
            }
        }
    }

    fn apply_query(&mut self, query: &MapQuery) -> MapOutput {
        match query {
            MapQuery::Get { key } => MapOutput::Value(self.active_value(key)),

            MapQuery::GetOrDefault { key, default } => {
                let value = self.active_value(key).unwrap_or_else(|| default.clone());
                MapOutput::Value(Some(value))
            }

            MapQuery::ContainsKey { key } => {
                self.evict_if_inactive(key);
                MapOutput::Flag(self.entries.contains_key(key))
            }

            // Size and IsEmpty report raw cardinality without evicting, so
            // lazily-expired entries are counted until a keyed access drops
            // them. Preserved source behavior.
            MapQuery::Size => MapOutput::Size(self.entries.len() as u64),
            MapQuery::IsEmpty => MapOutput::Flag(self.entries.is_empty()),
        }
    }

    #[cfg(debug_assertions)]
    fn debug_invariants(&self) {
        for entry in self.entries.values() {
            debug_assert!(
                !entry.commit.is_released(),
                "live map entry holds a released commit"
            );
        }
    }

    #[cfg(not(debug_assertions))]
    fn debug_invariants(&self) {}
}

impl StateMachine for TtlMap {
    type Operation = MapOperation;
    type Output = MapOutput;
    type Event = ();
    type Error = MapError;

    fn on_open(&mut self, session: SessionId, ctx: LogContext) {
        self.update_time(ctx.timestamp);
        self.sessions.open(session);
    }

    fn on_expire(&mut self, session: SessionId, ctx: LogContext) {
        self.update_time(ctx.timestamp);
        self.sessions.expire(session);
    }

    fn on_close(&mut self, session: SessionId, ctx: LogContext) {
        self.update_time(ctx.timestamp);
        self.sessions.close(session);
    }

    fn apply(&mut self, commit: Commit<MapOperation>) -> Result<MapOutput, MapError> {
        self.update_time(commit.timestamp());

        let output = match commit.operation() {
            // Put/PutIfAbsent commits are retained by the entry that holds
            // them (or released on rejection). Remove and Clear stay
            // retained as tombstones for the filter.
            MapOperation::Command(command) => self.apply_command(command, &commit),
            MapOperation::Query { query, .. } => {
                let output = self.apply_query(query);
                // Queries are never semantically live in the log.
                commit.release();
                output
            }
        };

        self.debug_invariants();
        Ok(output)
    }

    fn filter(&self, commit: &Commit<MapOperation>, compaction: Compaction) -> bool {
        match commit.operation() {
            // A put is live iff it still backs the current entry for its
            // key and that entry is active.
            MapOperation::Command(
                MapCommand::Put { key, .. } | MapCommand::PutIfAbsent { key, .. },
            ) => self
                .entries
                .get(key)
                .is_some_and(|e| e.commit.index() == commit.index() && self.is_active(e)),

            // Tombstones are reclaimable only once a major compaction has
            // caught up past them.
            MapOperation::Command(MapCommand::Remove { .. } | MapCommand::Clear) => {
                if compaction.is_major() {
                    commit.index() > compaction.index
                } else {
                    true
                }
            }

            MapOperation::Query { .. } => false,
        }
    }

    fn tick(&mut self, ctx: LogContext) {
        self.update_time(ctx.timestamp);
    }

    fn drain_events(&mut self) -> Vec<Delivery<()>> {
        Vec::new()
    }
}
