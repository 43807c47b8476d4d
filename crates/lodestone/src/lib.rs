//! # Lodestone: Replicated data structures on a consensus log
//!
//! Lodestone layers deterministic replicated state machines on top of a
//! consensus substrate. The substrate — any engine that delivers committed
//! operations in total order — is a black box; everything here is the part
//! that runs *above* it:
//!
//! - [`map`]: a replicated key/value store with per-entry TTL, ephemeral
//!   and persistent entries, and compaction filters ([`map::TtlMap`]).
//! - [`group`]: a replicated membership registry with deterministic leader
//!   election and per-member message queues ([`group::Group`]).
//! - [`rsm`]: the substrate boundary — commit envelope, session registry,
//!   event outbox, logical timers, reproducible randomness.
//! - [`wire`]: the framed binary operation codec.
//! - [`types`]: the shared vocabulary (indices, sessions, timestamps,
//!   consistency levels).
//!
//! State machines here never consult a system clock, never use ambient
//! randomness, and never iterate an unordered container: replicas stay
//! identical because every input derives from the replicated log.

pub use lodestone_group as group;
pub use lodestone_map as map;
pub use lodestone_rsm as rsm;
pub use lodestone_types as types;
pub use lodestone_wire as wire;
