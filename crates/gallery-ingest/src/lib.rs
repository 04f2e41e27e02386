//! The merge/promotion engine of the gallery.
//!
//! An [`Ingestor`] runs operations against one master directory through any
//! [`gallery_core::store::BlobStore`]. Every run plans its changes in memory
//! and only then writes, so an aborted run leaves the remote store as it
//! was.

mod ingestor;

pub mod cache;
pub mod error;
pub mod feed;
pub mod promotion;
pub mod report;

pub use error::{Error, Result};
pub use ingestor::{DEFAULT_LIMIT, IngestConfig, Ingestor};
