//! Storage seams for Lattica KeyDir.
//!
//! The directory core is written against three traits — [`MapBackend`],
//! [`LogBackend`], and [`QueueStore`] — so the sparse map engine, the
//! append-only log engine, and the mutation queue are pluggable. This crate
//! defines those traits and ships in-memory reference engines used by tests
//! and single-node deployments:
//!
//! - [`InMemoryMapBackend`]: persistent sparse Merkle map over the 2^256
//!   index space, one immutable snapshot per revision
//! - [`InMemoryLogBackend`]: RFC 6962 Merkle log with inclusion and
//!   consistency proofs
//! - [`InMemoryQueueStore`]: per-directory FIFO with strictly increasing
//!   sequence numbers

pub mod log;
pub mod map;
pub mod queue;
pub mod signer;

pub use log::{InMemoryLogBackend, LogBackend};
pub use map::{InMemoryMapBackend, MapBackend, MapLeafUpdate};
pub use queue::{InMemoryQueueStore, QueueStore};
pub use signer::Ed25519Signer;
