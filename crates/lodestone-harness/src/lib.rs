//! # lodestone-harness: A reference substrate for tests
//!
//! [`LogDriver`] plays the consensus substrate against a single state
//! machine instance: it assigns strictly monotonic log indices, carries the
//! replicated clock, delivers session transitions and commits in total
//! order, collects published events, audits retention, and runs compaction
//! by consulting the machine's filter.
//!
//! The driver is deliberately boring — no faults, no concurrency — because
//! its job is to make state-machine behavior *exactly* reproducible. Two
//! drivers fed the same call sequence produce two machines in identical
//! states, which is what the determinism suites assert.

use std::collections::BTreeSet;

use lodestone_rsm::{Commit, Compaction, CompactionKind, Delivery, LogContext, StateMachine};
use lodestone_types::{LogIndex, SessionId, Timestamp};

/// What a compaction pass did with the retained commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompactionReport {
    /// Retained commits the filter kept.
    pub kept: usize,
    /// Retained commits the filter dropped (now released).
    pub dropped: usize,
}

/// Drives one state machine as the consensus substrate would.
pub struct LogDriver<M: StateMachine> {
    machine: M,
    last_index: u64,
    time: Timestamp,
    /// Every delivered commit, in order, for retention auditing.
    delivered: Vec<Commit<M::Operation>>,
    /// Indices whose bytes a compaction pass has reclaimed.
    compacted: BTreeSet<LogIndex>,
    events: Vec<Delivery<M::Event>>,
}

impl<M: StateMachine> LogDriver<M> {
    pub fn new(machine: M) -> Self {
        Self {
            machine,
            last_index: 0,
            time: Timestamp::ZERO,
            delivered: Vec::new(),
            compacted: BTreeSet::new(),
            events: Vec::new(),
        }
    }

    /// The machine under test.
    pub fn machine(&self) -> &M {
        &self.machine
    }

    /// Index of the most recently delivered log entry.
    pub fn last_index(&self) -> LogIndex {
        LogIndex::new(self.last_index)
    }

    /// The replicated clock as of the next delivery.
    pub fn time(&self) -> Timestamp {
        self.time
    }

    /// Advances the replicated clock; subsequent deliveries carry the new
    /// timestamp.
    pub fn advance_time(&mut self, millis: i64) {
        self.time = self.time.plus_millis(millis);
    }

    fn next_ctx(&mut self) -> LogContext {
        self.last_index += 1;
        LogContext {
            index: LogIndex::new(self.last_index),
            timestamp: self.time,
        }
    }

    fn collect_events(&mut self) {
        self.events.extend(self.machine.drain_events());
    }

    /// Delivers a session-open entry.
    pub fn open_session(&mut self, session: SessionId) {
        let ctx = self.next_ctx();
        self.machine.on_open(session, ctx);
        self.collect_events();
    }

    /// Delivers a session-expiry entry.
    pub fn expire_session(&mut self, session: SessionId) {
        let ctx = self.next_ctx();
        self.machine.on_expire(session, ctx);
        self.collect_events();
    }

    /// Delivers a session-close entry.
    pub fn close_session(&mut self, session: SessionId) {
        let ctx = self.next_ctx();
        self.machine.on_close(session, ctx);
        self.collect_events();
    }

    /// Delivers one committed operation from `session`.
    pub fn commit(
        &mut self,
        session: SessionId,
        operation: M::Operation,
    ) -> Result<M::Output, M::Error> {
        let ctx = self.next_ctx();
        let commit = Commit::new(ctx.index, ctx.timestamp, session, operation);
        self.delivered.push(commit.clone());
        let output = self.machine.apply(commit);
        self.collect_events();
        output
    }

    /// Delivers a keep-alive entry: advances logical time only.
    pub fn tick(&mut self) {
        let ctx = self.next_ctx();
        self.machine.tick(ctx);
        self.collect_events();
    }

    /// Takes every event published since the last take, in publish order.
    pub fn take_events(&mut self) -> Vec<Delivery<M::Event>> {
        std::mem::take(&mut self.events)
    }

    /// Indices of commits whose bytes are still held by the log: delivered,
    /// not released by the machine, not reclaimed by compaction.
    pub fn retained(&self) -> Vec<LogIndex> {
        self.delivered
            .iter()
            .filter(|c| !c.is_released() && !self.compacted.contains(&c.index()))
            .map(Commit::index)
            .collect()
    }

    /// Whether the machine handed the commit at `index` back to the log.
    pub fn is_released(&self, index: LogIndex) -> bool {
        self.delivered
            .iter()
            .find(|c| c.index() == index)
            .is_some_and(Commit::is_released)
    }

    /// Whether a compaction pass reclaimed the bytes at `index`.
    pub fn is_compacted(&self, index: LogIndex) -> bool {
        self.compacted.contains(&index)
    }

    /// Runs one compaction pass caught up to the current head: reclaims
    /// released commits outright and consults the machine's filter for each
    /// commit the machine still retains.
    ///
    /// Dropping a record does not touch the machine's handle — the machine
    /// may still hold (and later release) its in-memory copy; only the log
    /// bytes are gone.
    pub fn compact(&mut self, kind: CompactionKind) -> CompactionReport {
        let compaction = Compaction {
            index: LogIndex::new(self.last_index),
            kind,
        };
        let mut report = CompactionReport::default();
        let machine = &self.machine;
        for commit in &self.delivered {
            if self.compacted.contains(&commit.index()) {
                continue;
            }
            if commit.is_released() {
                self.compacted.insert(commit.index());
                continue;
            }
            if machine.filter(commit, compaction) {
                report.kept += 1;
            } else {
                self.compacted.insert(commit.index());
                report.dropped += 1;
            }
        }
        report
    }
}
