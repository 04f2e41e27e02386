//! Core types and trait definitions for the sharded post gallery.
//!
//! This crate holds the data model (records, shards, the master directory),
//! the pure algorithms that operate on it (schema normalisation, merging,
//! shard resolution, the scan gate), and the traits that the remote blob
//! store and the external collector implement. It has no HTTP dependencies.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod collect;
pub mod directory;
pub mod error;
pub mod gate;
pub mod memory;
pub mod merge;
pub mod owner;
pub mod record;
pub mod resolver;
pub mod schema;
pub mod shard;
pub mod store;

pub use error::{Error, Result};
