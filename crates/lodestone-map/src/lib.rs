//! # lodestone-map: Replicated key/value store with per-entry TTL
//!
//! [`TtlMap`] is a deterministic state machine over the consensus log. Every
//! entry remembers the commit that created it, so persistence mode, ttl,
//! value, and authoring session are all recoverable from the entry itself —
//! which is also what makes the compaction filter a pure function of
//! machine state.
//!
//! ## Time
//!
//! The map never reads a system clock. It keeps a logical clock advanced to
//! the maximum commit timestamp seen so far, and every TTL check compares
//! against that clock. Expiry is lazy: an entry past its ttl lingers until
//! the next keyed access evicts it.
//!
//! ## Ephemerality
//!
//! An `Ephemeral` entry is bound to the session that wrote it. When that
//! session expires or closes, the entry stops being observable and is
//! evicted on next access.

pub mod map;
pub mod ops;


pub use map::{MapError, TtlMap};
pub use ops::{MapCommand, MapOperation, MapOutput, MapQuery};
