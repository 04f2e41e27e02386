//! An in-process [`BlobStore`], used by tests and dry runs.
//!
//! Every operation is recorded so callers can assert on exactly which
//! remote writes a run would have issued. Individual blobs can be made to
//! reject writes to exercise failure paths.

use std::{
  collections::HashSet,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use indexmap::IndexMap;
use thiserror::Error;

use crate::store::{Blob, BlobId, BlobStore, DEFAULT_FILENAME};

#[derive(Debug, Error)]
pub enum MemoryError {
  #[error("blob not found: {0}")]
  NotFound(BlobId),

  #[error("injected write failure for {0}")]
  InjectedReplace(BlobId),

  #[error("injected create failure")]
  InjectedCreate,
}

/// One call made against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
  Get(BlobId),
  Create(BlobId),
  Replace(BlobId),
}

#[derive(Default)]
struct Inner {
  blobs:        IndexMap<BlobId, Blob>,
  descriptions: IndexMap<BlobId, String>,
  next_id:      u64,
  failing:      HashSet<BlobId>,
  fail_creates: bool,
  ops:          Vec<Op>,
}

/// A blob store held entirely in memory.
///
/// Clones share the same contents.
#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Seed a blob under the default file name.
  pub fn insert(&self, id: impl Into<BlobId>, content: impl Into<String>) {
    self.insert_as(id, DEFAULT_FILENAME, content);
  }

  /// Seed a blob under a specific file name.
  pub fn insert_as(
    &self,
    id: impl Into<BlobId>,
    filename: &str,
    content: impl Into<String>,
  ) {
    self.lock().blobs.insert(id.into(), Blob {
      filename: filename.to_owned(),
      content:  content.into(),
    });
  }

  pub fn blob(&self, id: &BlobId) -> Option<Blob> {
    self.lock().blobs.get(id).cloned()
  }

  /// The blob's content parsed as JSON, if present and valid.
  pub fn json(&self, id: &BlobId) -> Option<serde_json::Value> {
    let blob = self.blob(id)?;
    serde_json::from_str(&blob.content).ok()
  }

  pub fn description(&self, id: &BlobId) -> Option<String> {
    self.lock().descriptions.get(id).cloned()
  }

  /// Identifiers of every blob, in creation order.
  pub fn ids(&self) -> Vec<BlobId> { self.lock().blobs.keys().cloned().collect() }

  /// Make every later `replace` of `id` fail.
  pub fn fail_replace(&self, id: impl Into<BlobId>) {
    self.lock().failing.insert(id.into());
  }

  /// Make every later `create` fail.
  pub fn fail_creates(&self) { self.lock().fail_creates = true; }

  pub fn ops(&self) -> Vec<Op> { self.lock().ops.clone() }

  /// Number of creates and replaces attempted, successful or not.
  pub fn write_count(&self) -> usize {
    self
      .lock()
      .ops
      .iter()
      .filter(|op| !matches!(op, Op::Get(_)))
      .count()
  }

  pub fn clear_ops(&self) { self.lock().ops.clear(); }
}

impl BlobStore for MemoryStore {
  type Error = MemoryError;

  async fn get(&self, id: BlobId) -> Result<Blob, MemoryError> {
    let mut inner = self.lock();
    inner.ops.push(Op::Get(id.clone()));
    inner
      .blobs
      .get(&id)
      .cloned()
      .ok_or(MemoryError::NotFound(id))
  }

  async fn create(
    &self,
    content: String,
    description: String,
  ) -> Result<BlobId, MemoryError> {
    let mut inner = self.lock();
    inner.next_id += 1;
    let id = BlobId::new(format!("mem-{}", inner.next_id));
    inner.ops.push(Op::Create(id.clone()));
    if inner.fail_creates {
      return Err(MemoryError::InjectedCreate);
    }
    inner.blobs.insert(id.clone(), Blob {
      filename: DEFAULT_FILENAME.to_owned(),
      content,
    });
    inner.descriptions.insert(id.clone(), description);
    Ok(id)
  }

  async fn replace(
    &self,
    id: BlobId,
    filename: String,
    content: String,
  ) -> Result<(), MemoryError> {
    let mut inner = self.lock();
    inner.ops.push(Op::Replace(id.clone()));
    if inner.failing.contains(&id) {
      return Err(MemoryError::InjectedReplace(id));
    }
    let Some(blob) = inner.blobs.get_mut(&id) else {
      return Err(MemoryError::NotFound(id));
    };
    blob.filename = filename;
    blob.content = content;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn create_then_get_round_trips() {
    let store = MemoryStore::new();
    let id = store.create("{}".into(), "desc".into()).await.unwrap();
    let blob = store.get(id.clone()).await.unwrap();
    assert_eq!(blob.filename, DEFAULT_FILENAME);
    assert_eq!(blob.content, "{}");
    assert_eq!(store.description(&id).as_deref(), Some("desc"));
  }

  #[tokio::test]
  async fn injected_failures_are_recorded_as_attempts() {
    let store = MemoryStore::new();
    store.insert("a", "{}");
    store.fail_replace("a");
    let err = store.replace("a".into(), "data.json".into(), "[]".into()).await;
    assert!(matches!(err, Err(MemoryError::InjectedReplace(_))));
    assert_eq!(store.write_count(), 1);
    assert_eq!(store.blob(&"a".into()).unwrap().content, "{}");
  }

  #[tokio::test]
  async fn replace_keeps_the_given_filename() {
    let store = MemoryStore::new();
    store.insert_as("a", "gallary_data.json", "{}");
    store
      .replace("a".into(), "gallary_data.json".into(), "[]".into())
      .await
      .unwrap();
    assert_eq!(store.blob(&"a".into()).unwrap().filename, "gallary_data.json");
  }
}
