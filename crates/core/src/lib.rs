//! Protocol core for Lattica KeyDir.
//!
//! This crate implements the verifiable identity map protocol over the
//! storage seams defined in `lattica-keydir-backend`:
//!
//! - [`validator`]: pure mutation validation and authorization
//! - [`sequencer`]: the per-directory revision builder that folds queued
//!   mutations into the sparse map and anchors each root in the log
//! - [`prover`]: the proof-carrying read path (point, batch, history,
//!   mutation listings, streams)
//! - [`registry`]: process-wide directory registry and admin lifecycle
//! - [`paginate`]: HMAC-protected opaque page tokens
//! - [`audit`]: rejected-mutation audit logging
//! - [`keymaterial`]: opaque typed key carriers for the admin surface

pub mod audit;
pub mod keymaterial;
pub mod paginate;
pub mod prover;
pub mod registry;
pub mod sequencer;
pub mod validator;

pub use prover::Prover;
pub use registry::{DirectoryRegistry, RegistryOptions};
pub use sequencer::{PublishedRevision, Sequencer, SequencerHandle};
pub use validator::{validate_update, MutationError, ValidatedMutation};
