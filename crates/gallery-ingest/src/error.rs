//! Error type for `gallery-ingest`.

use gallery_core::store::BlobId;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] gallery_core::Error),

  /// A blob store call failed. Nothing later in the run was written.
  #[error("blob store error: {0}")]
  Transport(#[source] BoxError),

  #[error("collector error: {0}")]
  Collector(#[source] BoxError),

  /// A key that should already have history came back empty.
  #[error(
    "{key:?} is mapped to a shard but has no records there; rerun with \
     force-empty to write anyway"
  )]
  EmptyHistory { key: String },

  /// A shard was used before it was fetched into the run's cache.
  #[error("shard {0} is not loaded")]
  NotLoaded(BlobId),

  #[error("collector output is not a tweets export: {0}")]
  Feed(String),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

impl Error {
  pub(crate) fn transport(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Transport(Box::new(e))
  }

  pub(crate) fn collector(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Collector(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
