//! # lodestone-group: Replicated membership and messaging
//!
//! [`Group`] is a deterministic state machine that coordinates a set of
//! named members over the consensus log:
//!
//! - **Membership**: persistent members survive session loss (with a
//!   configurable grace period before their departure is announced);
//!   ephemeral members die with their session.
//! - **Leadership**: a single leader per group, elected deterministically
//!   from the candidate pool by a term-seeded random stream. Terms are
//!   commit indices.
//! - **Messaging**: per-member FIFO queues with at-most-one-in-flight
//!   delivery, direct/random/broadcast dispatch, and exactly-once
//!   acknowledgement back to the producer.
//!
//! All coordination state — members, candidates, leader, term, queues —
//! derives solely from the totally ordered commit stream, so every replica
//! holds identical state and publishes identical events.

pub mod events;
pub mod group;
mod member;
pub mod ops;

#[cfg(test)]
mod tests;

pub use events::GroupEvent;
pub use group::{DISPATCH_SEED, Group, GroupConfig, GroupError};
pub use ops::{
    DeliveryPolicy, Dispatch, GroupCommand, GroupOutput, MemberInfo, SubmitRequest,
};
