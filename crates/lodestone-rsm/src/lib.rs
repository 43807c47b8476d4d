//! # lodestone-rsm: The replicated state machine substrate boundary
//!
//! The consensus substrate delivers a totally ordered stream of [`Commit`]
//! records; a [`StateMachine`] applies each commit and returns a result.
//! State is mutated **only** through commit application — there is no
//! external mutator — so any two replicas that apply the same prefix of the
//! log hold identical state.
//!
//! This crate holds everything a state machine needs at that boundary:
//!
//! - [`commit`]: the commit envelope and its retention handle
//! - [`session`]: the live-session registry fed by substrate callbacks
//! - [`outbox`]: ordered event deliveries to client sessions
//! - [`scheduler`]: logical, replay-safe timers
//! - [`rng`]: bit-reproducible randomness ([`Lcg48`])
//! - [`machine`]: the [`StateMachine`] trait and compaction context
//!
//! ## Determinism rules
//!
//! No system clocks, no ambient randomness, no iteration over unordered
//! containers. Time comes from commit timestamps, randomness from seeded
//! [`Lcg48`] streams, and every collection that is iterated during apply is
//! ordered.

pub mod commit;
pub mod machine;
pub mod outbox;
pub mod rng;
pub mod scheduler;
pub mod session;

pub use commit::{Commit, LogContext};
pub use machine::{Compaction, CompactionKind, Operation, StateMachine};
pub use outbox::{Delivery, Outbox};
pub use rng::Lcg48;
pub use scheduler::Scheduler;
pub use session::SessionRegistry;
