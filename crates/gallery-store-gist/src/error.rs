//! Error type for `gallery-store-gist`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{method} {url} → {status}")]
  Status {
    method: &'static str,
    url:    String,
    status: reqwest::StatusCode,
  },

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The gist exists but holds none of the candidate files.
  #[error("gist {0} holds no data file")]
  MissingFile(String),

  #[error("git clone of gist {id} failed: {stderr}")]
  Clone { id: String, stderr: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
