//! Core types, errors, and cryptographic primitives for Lattica KeyDir.
//!
//! This crate provides the foundational types used throughout the directory:
//! - Identifier newtypes (DirectoryId, UserId, Index)
//! - The entry data model (Entry, SignedEntry, Committed, EntryUpdate)
//! - Authorized key sets and Ed25519 entry signatures
//! - Cryptographic hashing (SHA-256) and the HMAC-SHA512/256 commitment scheme
//! - The canonical postcard codec
//! - Error types using snafu

pub mod codec;
pub mod commitment;
pub mod config;
pub mod error;
pub mod hash;
pub mod keyset;
pub mod logproof;
pub mod sparse;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::{decode, encode, CodecError};
pub use error::{KeydirError, Result};
pub use hash::{sha256, sha256_concat, Hash, ZERO_HASH};
pub use keyset::{AuthorizedKey, EntrySignature, KeyAlgorithm, KeySet};
pub use types::*;
