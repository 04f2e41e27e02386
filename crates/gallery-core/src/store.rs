//! The `BlobStore` trait — the only way this system talks to remote storage.
//!
//! A blob is one JSON document addressed by an opaque identifier. Shards and
//! the master directory are both blobs. Writes are full-content replaces, so
//! repeating one is always safe.

use std::{fmt, future::Future};

use serde::{Deserialize, Serialize};

/// File names a blob's payload may live under, in lookup order. Older
/// blobs used the second spelling.
pub const CANDIDATE_FILENAMES: [&str; 2] = ["data.json", "gallary_data.json"];

/// File name used when creating a blob.
pub const DEFAULT_FILENAME: &str = CANDIDATE_FILENAMES[0];

// ─── Identifiers ─────────────────────────────────────────────────────────────

/// Opaque remote identifier of a blob (a shard or the master directory).
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BlobId(String);

impl BlobId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for BlobId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for BlobId {
  fn from(s: &str) -> Self { Self::new(s) }
}

impl From<String> for BlobId {
  fn from(s: String) -> Self { Self(s) }
}

// ─── Payload ─────────────────────────────────────────────────────────────────

/// A fetched blob: which candidate file held the payload, and its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
  pub filename: String,
  pub content:  String,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the remote blob store.
///
/// Implementations own transport concerns: candidate file lookup, any
/// fallback retrieval path, and retries. Callers see one call per
/// operation and never retry themselves.
pub trait BlobStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch a blob's payload from the first candidate file present.
  fn get(
    &self,
    id: BlobId,
  ) -> impl Future<Output = Result<Blob, Self::Error>> + Send + '_;

  /// Create a new blob holding `content` under [`DEFAULT_FILENAME`] and
  /// return its identifier.
  fn create(
    &self,
    content: String,
    description: String,
  ) -> impl Future<Output = Result<BlobId, Self::Error>> + Send + '_;

  /// Replace the content of `filename` in an existing blob.
  fn replace(
    &self,
    id: BlobId,
    filename: String,
    content: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
