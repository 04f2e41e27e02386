//! [`ShardCache`] holds every shard a run touches, each fetched at most once.
//!
//! A shard referenced by several keys is fetched once and every key's
//! changes are applied to the same in-memory copy. New shards are planned
//! here under provisional ids and only created remotely at commit.

use gallery_core::{
  record::Record,
  schema::{self, WireShape},
  shard::Shard,
  store::{BlobId, BlobStore, DEFAULT_FILENAME},
};
use indexmap::IndexMap;

use crate::{Error, Result};

/// Prefix of provisional ids handed out for shards not yet created.
pub const PENDING_PREFIX: &str = "~pending-";

pub fn is_pending(id: &BlobId) -> bool { id.as_str().starts_with(PENDING_PREFIX) }

/// How badly a cached shard needs writing back.
///
/// Ordered, so marking only ever raises the level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Dirty {
  Clean,
  /// Only a key was removed after promotion. Losing this write leaves a
  /// stale duplicate behind, never a missing record.
  Advisory,
  /// Holds merged records that exist nowhere else.
  Required,
}

#[derive(Debug)]
struct Entry {
  shard:       Shard,
  filename:    String,
  shape:       WireShape,
  dirty:       Dirty,
  description: String,
}

/// One shard write produced by [`ShardCache::writes`].
#[derive(Debug, Clone)]
pub struct ShardWrite {
  pub id:          BlobId,
  pub filename:    String,
  pub content:     String,
  /// Used when the shard is created.
  pub description: String,
  pub dirty:       Dirty,
}

impl ShardWrite {
  pub fn is_create(&self) -> bool { is_pending(&self.id) }
}

#[derive(Debug, Default)]
pub struct ShardCache {
  entries: IndexMap<BlobId, Entry>,
  pending: usize,
}

impl ShardCache {
  pub fn new() -> Self { Self::default() }

  /// Fetch and normalise `id` unless it is already cached.
  ///
  /// `context_key` names the owner of a single-owner document that does
  /// not name itself.
  pub async fn load<S: BlobStore>(
    &mut self,
    store: &S,
    id: &BlobId,
    context_key: Option<&str>,
  ) -> Result<&Shard> {
    if !self.entries.contains_key(id) {
      let blob = store.get(id.clone()).await.map_err(Error::transport)?;
      let normalized = schema::normalize_str(&blob.content, context_key)?;
      tracing::debug!(
        shard = %id,
        file = %blob.filename,
        shape = ?normalized.shape,
        owners = normalized.shard.owner_count(),
        records = normalized.shard.total(),
        "loaded shard"
      );
      self.entries.insert(id.clone(), Entry {
        shard:       normalized.shard,
        filename:    blob.filename,
        shape:       normalized.shape,
        dirty:       Dirty::Clean,
        description: String::new(),
      });
    }
    self.get(id)
  }

  pub fn get(&self, id: &BlobId) -> Result<&Shard> {
    self
      .entries
      .get(id)
      .map(|e| &e.shard)
      .ok_or_else(|| Error::NotLoaded(id.clone()))
  }

  pub fn contains(&self, id: &BlobId) -> bool { self.entries.contains_key(id) }

  pub fn dirty(&self, id: &BlobId) -> Option<Dirty> {
    self.entries.get(id).map(|e| e.dirty)
  }

  fn entry_mut(&mut self, id: &BlobId) -> Result<&mut Entry> {
    self
      .entries
      .get_mut(id)
      .ok_or_else(|| Error::NotLoaded(id.clone()))
  }

  fn mark(entry: &mut Entry, dirty: Dirty) { entry.dirty = entry.dirty.max(dirty); }

  /// Plan a new shard holding `shard`, under a provisional id.
  pub fn create_pending(&mut self, shard: Shard, description: String) -> BlobId {
    self.pending += 1;
    let id = BlobId::new(format!("{PENDING_PREFIX}{}", self.pending));
    self.entries.insert(id.clone(), Entry {
      shard,
      filename: DEFAULT_FILENAME.to_owned(),
      shape: WireShape::Multi,
      dirty: Dirty::Required,
      description,
    });
    id
  }

  /// Replace `key`'s records in shard `id`.
  pub fn set_records(
    &mut self,
    id: &BlobId,
    key: &str,
    records: Vec<Record>,
  ) -> Result<()> {
    let entry = self.entry_mut(id)?;
    entry.shard.set_records(key, records);
    Self::mark(entry, Dirty::Required);
    Ok(())
  }

  /// Remove `key` from shard `id`. Returns whether it was there.
  pub fn remove_owner(&mut self, id: &BlobId, key: &str) -> Result<bool> {
    let entry = self.entry_mut(id)?;
    let removed = entry.shard.remove_owner(key).is_some();
    if removed {
      Self::mark(entry, Dirty::Advisory);
    }
    Ok(removed)
  }

  /// Every write the cache needs, creates first, then required replaces,
  /// then advisory replaces.
  ///
  /// Shards holding merged records are checked against `capacity` here,
  /// before anything is sent. A cleanup write only removes records, so it
  /// goes out even when the shard was already over capacity. Planned
  /// shards that ended up empty are never created.
  pub fn writes(&self, capacity: usize) -> Result<Vec<ShardWrite>> {
    let mut writes = Vec::new();
    for (id, entry) in &self.entries {
      if entry.dirty == Dirty::Clean || (is_pending(id) && entry.shard.is_drained()) {
        continue;
      }
      if entry.dirty == Dirty::Required {
        entry.shard.ensure_within(id, capacity)?;
      } else if entry.shard.total() > capacity {
        tracing::debug!(
          shard = %id,
          total = entry.shard.total(),
          capacity,
          "cleaning up an oversized shard"
        );
      }
      if entry.shape != WireShape::Multi {
        tracing::debug!(shard = %id, shape = ?entry.shape, "rewriting as multi-owner");
      }
      writes.push(ShardWrite {
        id:          id.clone(),
        filename:    entry.filename.clone(),
        content:     schema::to_wire_string(&entry.shard)?,
        description: entry.description.clone(),
        dirty:       entry.dirty,
      });
    }
    writes.sort_by_key(|w| (!w.is_create(), std::cmp::Reverse(w.dirty)));
    Ok(writes)
  }

  /// Re-key a pending shard under its real id and mark it clean.
  pub fn settle(&mut self, pending: &BlobId, created: BlobId) {
    if let Some(mut entry) = self.entries.shift_remove(pending) {
      entry.dirty = Dirty::Clean;
      self.entries.insert(created, entry);
    }
  }

  /// Cached shards, in the order they were first touched.
  pub fn shards(&self) -> impl Iterator<Item = (&BlobId, &Shard)> {
    self.entries.iter().map(|(id, e)| (id, &e.shard))
  }
}
