//! A shard is a bounded remote document holding records for several owners.
//!
//! [`Shard`] is the canonical in-memory form. Whatever shape the blob had on
//! the wire, [`crate::schema`] turns it into this.

use indexmap::IndexMap;

use crate::{Error, Result, record::Record, store::BlobId};

/// Historical shard capacity, in records across all owners.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Per-owner ordered record lists, newest first. Owner order is insertion
/// order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Shard {
  owners: IndexMap<String, Vec<Record>>,
}

impl Shard {
  pub fn new() -> Self { Self::default() }

  /// A shard holding only `key`.
  pub fn with_owner(key: impl Into<String>, records: Vec<Record>) -> Self {
    let mut shard = Self::new();
    shard.set_records(key, records);
    shard
  }

  /// Records for `key`; empty when the shard does not own it.
  pub fn records(&self, key: &str) -> &[Record] {
    self.owners.get(key).map(Vec::as_slice).unwrap_or(&[])
  }

  pub fn contains_owner(&self, key: &str) -> bool {
    self.owners.contains_key(key)
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.owners.keys().map(String::as_str)
  }

  pub fn owners(&self) -> impl Iterator<Item = (&str, &[Record])> {
    self.owners.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
  }

  pub fn owner_count(&self) -> usize { self.owners.len() }

  /// Total records across every owner.
  pub fn total(&self) -> usize { self.owners.values().map(Vec::len).sum() }

  /// Total records across every owner except `key`.
  pub fn total_excluding(&self, key: &str) -> usize {
    self
      .owners
      .iter()
      .filter(|(k, _)| k.as_str() != key)
      .map(|(_, v)| v.len())
      .sum()
  }

  /// Replace `key`'s records. An existing owner keeps its position.
  pub fn set_records(
    &mut self,
    key: impl Into<String>,
    records: Vec<Record>,
  ) -> Option<Vec<Record>> {
    self.owners.insert(key.into(), records)
  }

  /// Remove `key`, keeping the other owners in order.
  pub fn remove_owner(&mut self, key: &str) -> Option<Vec<Record>> {
    self.owners.shift_remove(key)
  }

  /// A drained shard owns nothing. Shards are never deleted, only drained.
  pub fn is_drained(&self) -> bool { self.owners.is_empty() }

  pub fn contains_id(&self, id: &str) -> bool {
    self.owners.values().flatten().any(|r| r.id == id)
  }

  /// Fail with [`Error::CapacityExceeded`] if the shard holds more than
  /// `capacity` records.
  pub fn ensure_within(&self, id: &BlobId, capacity: usize) -> Result<()> {
    let total = self.total();
    if total > capacity {
      return Err(Error::CapacityExceeded {
        shard: id.clone(),
        total,
        capacity,
      });
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn recs(prefix: &str, n: usize) -> Vec<Record> {
    (0..n)
      .map(|i| Record::new(format!("{prefix}{i}"), vec![format!("u{i}")]))
      .collect()
  }

  #[test]
  fn totals_count_every_owner() {
    let mut shard = Shard::with_owner("a", recs("a", 3));
    shard.set_records("b", recs("b", 2));
    assert_eq!(shard.total(), 5);
    assert_eq!(shard.total_excluding("a"), 2);
    assert_eq!(shard.total_excluding("zzz"), 5);
  }

  #[test]
  fn replacing_an_owner_keeps_its_position() {
    let mut shard = Shard::with_owner("a", recs("a", 1));
    shard.set_records("b", recs("b", 1));
    shard.set_records("a", recs("a", 4));
    assert_eq!(shard.keys().collect::<Vec<_>>(), ["a", "b"]);
    assert_eq!(shard.records("a").len(), 4);
  }

  #[test]
  fn removing_the_last_owner_drains() {
    let mut shard = Shard::with_owner("a", recs("a", 1));
    assert!(shard.remove_owner("a").is_some());
    assert!(shard.is_drained());
    assert!(shard.records("a").is_empty());
  }

  #[test]
  fn capacity_check_reports_the_overflow() {
    let shard = Shard::with_owner("a", recs("a", 3));
    let id = BlobId::new("s1");
    assert!(shard.ensure_within(&id, 3).is_ok());
    match shard.ensure_within(&id, 2) {
      Err(Error::CapacityExceeded { total, capacity, .. }) => {
        assert_eq!((total, capacity), (3, 2));
      }
      other => panic!("expected capacity error, got {other:?}"),
    }
  }
}
