//! Lattica KeyDir server library.
//!
//! The binary in `main.rs` wires these pieces together: configuration
//! loading, the HTTP gateway over the directory registry, and graceful
//! shutdown.

pub mod config;
pub mod http;
pub mod shutdown;
