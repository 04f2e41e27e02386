//! GitHub Gist backend for the gallery's blob store.
//!
//! Each blob is one gist. The payload lives in the first
//! [`CANDIDATE_FILENAMES`](gallery_core::store::CANDIDATE_FILENAMES) entry
//! the gist holds. Reads go through the REST API and fall back to a
//! shallow `git clone` when the API or the raw download fails.

mod clone;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{GistConfig, GistStore};
