//! The group membership and messaging state machine.

use std::collections::BTreeMap;

use lodestone_rsm::{
    Commit, Compaction, Delivery, Lcg48, LogContext, Outbox, Scheduler, SessionRegistry,
    StateMachine,
};
use lodestone_types::{LogIndex, MemberId, Persistence, SessionId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::events::GroupEvent;
use crate::member::{Member, Message};
use crate::ops::{DeliveryPolicy, Dispatch, GroupCommand, GroupOutput, MemberInfo, SubmitRequest};

/// Seed of the group's random-dispatch stream. Fixed at machine
/// construction so every replica draws the same member for the same
/// sequence of random submits.
pub const DISPATCH_SEED: u64 = 141_650_939;

#[derive(thiserror::Error, Debug)]
pub enum GroupError {
    /// Ephemeral identities die with their session and cannot be recreated
    /// under the same name.
    #[error("ephemeral member {0} already exists")]
    EphemeralMemberExists(MemberId),

    /// A direct submit must name its target.
    #[error("direct submit without a target member")]
    MissingSubmitTarget,
}

/// Group configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupConfig {
    /// Grace period, in milliseconds, before a persistent member that lost
    /// its session is announced as departed. Zero announces immediately.
    /// A Join that reattaches a session within the grace period suppresses
    /// the announcement.
    pub member_expiration_ms: u64,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            member_expiration_ms: 0,
        }
    }
}

impl GroupConfig {
    /// Configuration for testing (short grace period).
    pub fn testing() -> Self {
        Self {
            member_expiration_ms: 100,
        }
    }
}

/// Logical timer tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
enum GroupTask {
    /// Grace period elapsed for a sessionless persistent member: announce
    /// the departure unless a later Join reattached a session.
    MemberExpiry { member: MemberId },
}

/// A non-direct submission awaiting the completion low-watermark.
#[derive(Debug, Clone)]
struct PendingSubmit {
    commit: Commit<GroupCommand>,
    /// Set when any member failed or dropped its copy; the finalization
    /// event becomes `fail` instead of `ack`.
    failed: bool,
}

/// Replicated membership registry with deterministic leader election and
/// per-member message queues.
#[derive(Debug)]
pub struct Group {
    config: GroupConfig,
    members: BTreeMap<MemberId, Member>,
    /// Member ids in insertion order; kept in lock-step with `members`.
    member_order: Vec<MemberId>,
    /// Members eligible for leadership. Never contains the leader.
    candidates: Vec<MemberId>,
    leader: Option<MemberId>,
    /// Commit index of the last leadership change; zero before the first.
    term: u64,
    /// Listener sessions and their retained Listen commits.
    listeners: BTreeMap<SessionId, Commit<GroupCommand>>,
    /// Non-direct submissions not yet finalized, by Submit commit index.
    pending: BTreeMap<LogIndex, PendingSubmit>,
    sessions: SessionRegistry,
    outbox: Outbox<GroupEvent>,
    scheduler: Scheduler<GroupTask>,
    dispatch_rng: Lcg48,
    /// Logical clock: the maximum commit timestamp applied so far.
    time: Timestamp,
}

impl Group {
    pub fn new(config: GroupConfig) -> Self {
        Self {
            config,
            members: BTreeMap::new(),
            member_order: Vec::new(),
            candidates: Vec::new(),
            leader: None,
            term: 0,
            listeners: BTreeMap::new(),
            pending: BTreeMap::new(),
            sessions: SessionRegistry::new(),
            outbox: Outbox::new(),
            scheduler: Scheduler::new(),
            dispatch_rng: Lcg48::new(DISPATCH_SEED),
            time: Timestamp::ZERO,
        }
    }

    // ========================================================================
    // Observers
    // ========================================================================

    pub fn leader(&self) -> Option<&MemberId> {
        self.leader.as_ref()
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    /// Member ids in insertion order.
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.member_order.clone()
    }

    pub fn is_member(&self, id: &MemberId) -> bool {
        self.members.contains_key(id)
    }

    /// Whether `id` currently holds candidacy.
    pub fn is_candidate(&self, id: &MemberId) -> bool {
        self.candidates.contains(id)
    }

    /// The index of the in-flight message at `id`, if any.
    pub fn in_flight(&self, id: &MemberId) -> Option<LogIndex> {
        self.members
            .get(id)?
            .current
            .as_ref()
            .map(Message::index)
    }

    /// Queued (not in-flight) message count at `id`.
    pub fn queued(&self, id: &MemberId) -> usize {
        self.members.get(id).map_or(0, |m| m.queue.len())
    }

    /// The group's logical clock.
    pub fn time(&self) -> Timestamp {
        self.time
    }

    // ========================================================================
    // Time
    // ========================================================================

    /// Advances the logical clock and fires due timers. Runs first in every
    /// handler and callback.
    fn advance(&mut self, timestamp: Timestamp) {
        self.time = self.time.max(timestamp);
        for task in self.scheduler.due(self.time) {
            self.run_task(task);
        }
    }

    fn run_task(&mut self, task: GroupTask) {
        match task {
            GroupTask::MemberExpiry { member } => {
                // Only announce if no later Join reattached a session.
                let still_unbound = self
                    .members
                    .get(&member)
                    .is_some_and(|m| m.session.is_none());
                if still_unbound {
                    tracing::debug!(member = %member, "persistent member grace period expired");
                    self.broadcast(GroupEvent::Leave { member });
                }
            }
        }
    }

    // ========================================================================
    // Event publication
    // ========================================================================

    /// Publishes `event` to every listener session, in session-id order.
    fn broadcast(&mut self, event: GroupEvent) {
        for session in self.listeners.keys() {
            self.outbox.publish(&self.sessions, *session, event.clone());
        }
    }

    fn publish_to(&mut self, session: SessionId, event: GroupEvent) {
        self.outbox.publish(&self.sessions, session, event);
    }

    // ========================================================================
    // Leadership
    // ========================================================================

    /// Advances the term to the applying commit's index and announces it.
    /// Always precedes an election.
    fn bump_term(&mut self, index: LogIndex) {
        debug_assert!(
            index.as_u64() > self.term,
            "term must advance: {} -> {}",
            self.term,
            index
        );
        self.term = index.as_u64();
        self.broadcast(GroupEvent::Term { term: self.term });
    }

    /// Steps the leader down. With `recycle` the resigned member returns to
    /// the candidate pool (leadership handoff); without, it stays out
    /// (departure).
    fn resign(&mut self, recycle: bool) {
        if let Some(leader) = self.leader.take() {
            self.broadcast(GroupEvent::Resign {
                leader: leader.clone(),
            });
            if recycle {
                self.candidates.push(leader);
            }
        }
    }

    /// Deterministic election: a term-seeded random stream draws from the
    /// candidate pool until a candidate with an active session is found.
    /// Every replica computes the same leader because term, candidate
    /// order, and session states all derive from the total order.
    fn elect(&mut self) {
        let mut rng = Lcg48::new(self.term);
        while !self.candidates.is_empty() {
            let pick = rng.next_index(self.candidates.len());
            let id = self.candidates.remove(pick);
            let active = self
                .members
                .get(&id)
                .is_some_and(|m| m.session.is_some_and(|s| self.sessions.is_active(s)));
            if active {
                tracing::debug!(leader = %id, term = self.term, "elected leader");
                self.leader = Some(id.clone());
                self.broadcast(GroupEvent::Elect { leader: id });
                return;
            }
        }
    }

    // ========================================================================
    // Membership
    // ========================================================================

    fn join(
        &mut self,
        commit: &Commit<GroupCommand>,
        member_id: &MemberId,
        persistence: Persistence,
    ) -> Result<GroupOutput, GroupError> {
        if let Some(existing) = self.members.get(member_id) {
            if !existing.persistent {
                // Validation before mutation: the failed handler releases
                // its commit and touches nothing.
                commit.release();
                return Err(GroupError::EphemeralMemberExists(member_id.clone()));
            }
            return Ok(self.rejoin(commit, member_id));
        }

        let member = Member::new(
            member_id.clone(),
            !persistence.is_ephemeral(),
            commit.clone(),
        );
        let info = MemberInfo {
            id: member_id.clone(),
            index: member.index,
        };
        self.members.insert(member_id.clone(), member);
        self.member_order.push(member_id.clone());
        self.candidates.push(member_id.clone());
        self.broadcast(GroupEvent::Join {
            member: member_id.clone(),
        });
        if self.term == 0 {
            self.bump_term(commit.index());
        }
        if self.leader.is_none() {
            self.elect();
        }
        Ok(GroupOutput::Member(info))
    }

    /// Reattaches a session to an existing persistent member. The new Join
    /// commit is released; the original remains the authoritative
    /// membership record and the member keeps its original index.
    fn rejoin(&mut self, commit: &Commit<GroupCommand>, member_id: &MemberId) -> GroupOutput {
        let Some(member) = self.members.get_mut(member_id) else {
            unreachable!("rejoin of a member that was just looked up");
        };
        member.session = Some(commit.session());
        let info = MemberInfo {
            id: member.id.clone(),
            index: member.index,
        };
        // The in-flight message, if any, was published to a session that is
        // gone; the new session must see it or it would wait forever.
        let republish = member.current.as_ref().map(|msg| GroupEvent::Message {
            index: msg.index(),
            member: member_id.clone(),
            kind: msg.submit().kind.clone(),
            payload: msg.submit().payload.clone(),
        });

        if !self.candidates.contains(member_id) && self.leader.as_ref() != Some(member_id) {
            self.candidates.push(member_id.clone());
        }
        self.broadcast(GroupEvent::Join {
            member: member_id.clone(),
        });

        if self.leader.as_ref() == Some(member_id) {
            // Forced handoff: the leader's client restarted, so leadership
            // is renegotiated. The re-election may land on the same id.
            self.resign(true);
            self.bump_term(commit.index());
            self.elect();
        } else if self.leader.is_none() {
            // A re-bound candidate can fill a vacant leadership.
            self.elect();
        }

        if let Some(event) = republish {
            self.publish_to(commit.session(), event);
        }

        commit.release();
        GroupOutput::Member(info)
    }

    fn leave(&mut self, commit: &Commit<GroupCommand>, member_id: &MemberId) -> GroupOutput {
        if let Some(member) = self.remove_member(member_id) {
            if self.leader.as_ref() == Some(member_id) {
                self.resign(false);
                self.bump_term(commit.index());
                self.elect();
            }
            let join_commit = member.join_commit.clone();
            self.close_member(member);
            self.broadcast(GroupEvent::Leave {
                member: member_id.clone(),
            });
            join_commit.release();
        }
        commit.release();
        GroupOutput::Unit
    }

    /// Removes `id` from the member map, the insertion-order list, and the
    /// candidate pool.
    fn remove_member(&mut self, id: &MemberId) -> Option<Member> {
        let member = self.members.remove(id)?;
        self.member_order.retain(|m| m != id);
        self.candidates.retain(|m| m != id);
        Some(member)
    }

    fn listen(&mut self, commit: &Commit<GroupCommand>) -> GroupOutput {
        // A re-listen from the same session replaces the registration.
        if let Some(prior) = self.listeners.insert(commit.session(), commit.clone()) {
            prior.release();
        }
        let members = self
            .member_order
            .iter()
            .filter_map(|id| {
                self.members.get(id).map(|m| MemberInfo {
                    id: id.clone(),
                    index: m.index,
                })
            })
            .collect();
        GroupOutput::Members(members)
    }

    // ========================================================================
    // Message pipeline
    // ========================================================================

    fn submit(
        &mut self,
        commit: &Commit<GroupCommand>,
        request: &SubmitRequest,
    ) -> Result<GroupOutput, GroupError> {
        match (&request.target, request.dispatch) {
            (Some(target), _) => {
                if self.members.contains_key(target) {
                    self.deliver(target, Message {
                        commit: commit.clone(),
                        direct: true,
                    });
                } else {
                    tracing::debug!(target = %target, "direct submit to unknown member");
                    self.publish_to(commit.session(), GroupEvent::Fail(request.clone()));
                    commit.release();
                }
            }

            (None, Dispatch::Direct) => {
                commit.release();
                return Err(GroupError::MissingSubmitTarget);
            }

            (None, Dispatch::Random) => {
                if self.member_order.is_empty() {
                    tracing::debug!("random submit to an empty group");
                    self.publish_to(commit.session(), GroupEvent::Fail(request.clone()));
                    commit.release();
                } else {
                    let pick = self.dispatch_rng.next_index(self.member_order.len());
                    let target = self.member_order[pick].clone();
                    self.pending.insert(commit.index(), PendingSubmit {
                        commit: commit.clone(),
                        failed: false,
                    });
                    self.deliver(&target, Message {
                        commit: commit.clone(),
                        direct: false,
                    });
                }
            }

            (None, Dispatch::Broadcast) => {
                if self.member_order.is_empty() {
                    // Vacuously complete: no member will ever hold it.
                    self.publish_to(commit.session(), GroupEvent::Ack(request.clone()));
                    commit.release();
                } else {
                    self.pending.insert(commit.index(), PendingSubmit {
                        commit: commit.clone(),
                        failed: false,
                    });
                    for target in self.member_order.clone() {
                        self.deliver(&target, Message {
                            commit: commit.clone(),
                            direct: false,
                        });
                    }
                }
            }
        }
        Ok(GroupOutput::Unit)
    }

    /// Hands a message to a member: into the in-flight slot if idle
    /// (publishing the `message` event), otherwise onto the FIFO queue.
    fn deliver(&mut self, member_id: &MemberId, msg: Message) {
        let Some(member) = self.members.get_mut(member_id) else {
            debug_assert!(false, "delivery to unknown member {member_id}");
            return;
        };
        if member.current.is_some() {
            member.queue.push_back(msg);
            return;
        }
        let session = member.session;
        let event = GroupEvent::Message {
            index: msg.index(),
            member: member_id.clone(),
            kind: msg.submit().kind.clone(),
            payload: msg.submit().payload.clone(),
        };
        member.current = Some(msg);
        if let Some(session) = session {
            self.publish_to(session, event);
        }
    }

    fn ack(&mut self, member_id: &MemberId, id: LogIndex, succeeded: bool) {
        // Spurious acks (unknown member, empty slot, stale id) are guarded
        // no-ops: the slot may legitimately have been cleared by a member
        // close or a competing ack that committed first.
        let matches = self
            .members
            .get(member_id)
            .is_some_and(|m| m.current.as_ref().is_some_and(|c| c.index() == id));
        if !matches {
            tracing::debug!(member = %member_id, id = %id, "spurious ack ignored");
            return;
        }

        let Some(msg) = self
            .members
            .get_mut(member_id)
            .and_then(|m| m.current.take())
        else {
            return;
        };

        // Advance the queue before finalizing: the next message becomes
        // in-flight and its event is published.
        let next = self
            .members
            .get_mut(member_id)
            .and_then(|m| m.queue.pop_front());
        if let Some(next) = next {
            self.deliver(member_id, next);
        }

        if msg.direct {
            let request = msg.submit().clone();
            let producer = msg.producer();
            let event = if succeeded {
                GroupEvent::Ack(request)
            } else {
                GroupEvent::Fail(request)
            };
            self.publish_to(producer, event);
            msg.commit.release();
        } else {
            if !succeeded {
                // The failure is recorded; finalization still waits for the
                // completion low-watermark.
                if let Some(pending) = self.pending.get_mut(&id) {
                    pending.failed = true;
                }
            }
            self.flush_completions();
        }
    }

    /// Whether no member holds — in flight or queued — a message with index
    /// at or below `index`.
    fn is_complete(&self, index: LogIndex) -> bool {
        self.members.values().all(|m| {
            m.current.as_ref().is_none_or(|c| c.index() > index)
                && m.queue.iter().all(|q| q.index() > index)
        })
    }

    /// Finalizes every pending non-direct submission whose completion
    /// low-watermark has been reached: the producer receives `ack` (or
    /// `fail` if a failure was recorded) exactly once and the Submit commit
    /// is released.
    fn flush_completions(&mut self) {
        let ready: Vec<LogIndex> = self
            .pending
            .keys()
            .copied()
            .filter(|&index| self.is_complete(index))
            .collect();
        for index in ready {
            if let Some(pending) = self.pending.remove(&index) {
                let request = match pending.commit.operation() {
                    GroupCommand::Submit(request) => request.clone(),
                    other => unreachable!("pending completion holds a non-submit: {other:?}"),
                };
                let producer = pending.commit.session();
                let event = if pending.failed {
                    GroupEvent::Fail(request)
                } else {
                    GroupEvent::Ack(request)
                };
                self.publish_to(producer, event);
                pending.commit.release();
            }
        }
    }

    /// Unilateral termination: drains the member's messages. Random+Retry
    /// messages are reassigned to a random remaining member; direct
    /// messages fail their producer; other non-direct copies record a
    /// failure and finalize through the completion sweep.
    fn close_member(&mut self, mut member: Member) {
        for msg in member.drain_messages() {
            let request = msg.submit();
            let retryable = !msg.direct
                && request.dispatch == Dispatch::Random
                && request.delivery == DeliveryPolicy::Retry;
            if retryable && !self.member_order.is_empty() {
                let pick = self.dispatch_rng.next_index(self.member_order.len());
                let target = self.member_order[pick].clone();
                tracing::debug!(index = %msg.index(), target = %target, "reassigned message");
                self.deliver(&target, msg);
            } else if msg.direct {
                let request = request.clone();
                let producer = msg.producer();
                self.publish_to(producer, GroupEvent::Fail(request));
                msg.commit.release();
            } else {
                if let Some(pending) = self.pending.get_mut(&msg.index()) {
                    pending.failed = true;
                }
            }
        }
        self.flush_completions();
    }

    // ========================================================================
    // Session departure
    // ========================================================================

    /// Shared handling for session expiry and explicit close.
    fn session_departed(&mut self, session: SessionId, ctx: LogContext) {
        if let Some(listen) = self.listeners.remove(&session) {
            listen.release();
        }

        let bound: Vec<MemberId> = self
            .member_order
            .iter()
            .filter(|id| {
                self.members
                    .get(*id)
                    .is_some_and(|m| m.session == Some(session))
            })
            .cloned()
            .collect();

        let mut removed: Vec<Member> = Vec::new();
        let mut departed: Vec<MemberId> = Vec::new();
        for id in bound {
            let persistent = self.members.get(&id).is_some_and(|m| m.persistent);
            if persistent {
                if let Some(member) = self.members.get_mut(&id) {
                    member.session = None;
                }
                self.candidates.retain(|c| c != &id);
                if self.config.member_expiration_ms == 0 {
                    self.broadcast(GroupEvent::Leave { member: id.clone() });
                } else {
                    let deadline = self.time.plus_millis(self.config.member_expiration_ms as i64);
                    self.scheduler
                        .schedule(deadline, GroupTask::MemberExpiry { member: id.clone() });
                }
            } else if let Some(member) = self.remove_member(&id) {
                removed.push(member);
            }
            departed.push(id);
        }

        if self
            .leader
            .as_ref()
            .is_some_and(|leader| departed.contains(leader))
        {
            self.resign(false);
            self.bump_term(ctx.index);
            self.elect();
        }

        // Close before announcing: observers must see the terminal state.
        for member in removed {
            let id = member.id.clone();
            let join_commit = member.join_commit.clone();
            self.close_member(member);
            self.broadcast(GroupEvent::Leave { member: id });
            join_commit.release();
        }
    }

    // ========================================================================
    // Invariants
    // ========================================================================

    #[cfg(debug_assertions)]
    fn debug_invariants(&self) {
        debug_assert_eq!(
            self.members.len(),
            self.member_order.len(),
            "member map and order list out of step"
        );
        if let Some(leader) = &self.leader {
            debug_assert!(self.members.contains_key(leader), "leader is not a member");
            debug_assert!(
                !self.candidates.contains(leader),
                "leader still holds candidacy"
            );
        }
        for id in &self.candidates {
            debug_assert!(self.members.contains_key(id), "candidate is not a member");
        }
        for member in self.members.values() {
            debug_assert!(
                !member.join_commit.is_released(),
                "live member holds a released join commit"
            );
        }
    }

    #[cfg(not(debug_assertions))]
    fn debug_invariants(&self) {}
}

impl Default for Group {
    fn default() -> Self {
        Self::new(GroupConfig::default())
    }
}

impl StateMachine for Group {
    type Operation = GroupCommand;
    type Output = GroupOutput;
    type Event = GroupEvent;
    type Error = GroupError;

    fn on_open(&mut self, session: SessionId, ctx: LogContext) {
        self.advance(ctx.timestamp);
        self.sessions.open(session);
    }

    fn on_expire(&mut self, session: SessionId, ctx: LogContext) {
        self.advance(ctx.timestamp);
        self.sessions.expire(session);
        self.session_departed(session, ctx);
        self.debug_invariants();
    }

    fn on_close(&mut self, session: SessionId, ctx: LogContext) {
        self.advance(ctx.timestamp);
        self.sessions.close(session);
        self.session_departed(session, ctx);
        self.debug_invariants();
    }

    fn apply(&mut self, commit: Commit<GroupCommand>) -> Result<GroupOutput, GroupError> {
        self.advance(commit.timestamp());

        let result = match commit.operation() {
            GroupCommand::Join {
                member_id,
                persistence,
            } => self.join(&commit, member_id, *persistence),
            GroupCommand::Leave { member_id } => Ok(self.leave(&commit, member_id)),
            GroupCommand::Listen => Ok(self.listen(&commit)),
            GroupCommand::Submit(request) => self.submit(&commit, request),
            GroupCommand::Ack {
                member_id,
                id,
                succeeded,
            } => {
                self.ack(member_id, *id, *succeeded);
                // Acks are transient: applied and immediately released.
                commit.release();
                Ok(GroupOutput::Unit)
            }
        };

        self.debug_invariants();
        result
    }

    fn filter(&self, commit: &Commit<GroupCommand>, _compaction: Compaction) -> bool {
        match commit.operation() {
            // A Join is the membership record of a live member; only the
            // original (identity-tagged) Join is live.
            GroupCommand::Join { member_id, .. } => self
                .members
                .get(member_id)
                .is_some_and(|m| m.index == commit.index()),

            // A Listen is live while the registration it created is.
            GroupCommand::Listen => self
                .listeners
                .get(&commit.session())
                .is_some_and(|c| c.index() == commit.index()),

            // A Submit is live while any member holds it or it awaits its
            // completion low-watermark.
            GroupCommand::Submit(_) => {
                let index = commit.index();
                self.pending.contains_key(&index)
                    || self.members.values().any(|m| {
                        m.current.as_ref().is_some_and(|c| c.index() == index)
                            || m.queue.iter().any(|q| q.index() == index)
                    })
            }

            // Leave and Ack are released during apply and never retained.
            GroupCommand::Leave { .. } | GroupCommand::Ack { .. } => false,
        }
    }

    fn tick(&mut self, ctx: LogContext) {
        self.advance(ctx.timestamp);
        self.debug_invariants();
    }

    fn drain_events(&mut self) -> Vec<Delivery<GroupEvent>> {
        self.outbox.drain()
    }
}
