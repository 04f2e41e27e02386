//! Error types for `gallery-core`.

use thiserror::Error;

use crate::store::BlobId;

#[derive(Debug, Error)]
pub enum Error {
  /// The blob did not match any recognised document shape.
  #[error("unrecognised document shape: {shape}")]
  Schema { shape: String },

  /// A shard write would exceed the fixed capacity. Promotion should have
  /// prevented this; seeing it is a bug in the caller.
  #[error("shard {shard} would hold {total} records (capacity {capacity})")]
  CapacityExceeded {
    shard:    BlobId,
    total:    usize,
    capacity: usize,
  },

  /// One owner's records alone are more than any shard can hold.
  #[error("owner {key:?} has {count} records, more than a shard holds ({capacity})")]
  OwnerExceedsCapacity {
    key:      String,
    count:    usize,
    capacity: usize,
  },

  #[error("cannot write owners {keys:?} as a single-owner document")]
  SingleOwnerConflict { keys: Vec<String> },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
