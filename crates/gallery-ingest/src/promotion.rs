//! Promotion: deciding where a key's merged records end up.
//!
//! Planning only touches the [`ShardCache`]; nothing is written until the
//! run commits.

use gallery_core::{
  Error as CoreError, owner::Namespace, record::Record, shard::Shard,
  store::BlobId,
};

use crate::{Result, cache::ShardCache};

/// Where [`PromotionController::apply`] put a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
  /// There was no shard to use; a new one was planned.
  Created(BlobId),
  /// The records fit beside the other keys of the resolved shard.
  InPlace(BlobId),
  /// The resolved shard would overflow, so the key moved to a new shard.
  /// `vacated` is set when the old shard held the key and now needs the
  /// advisory cleanup write.
  Promoted {
    from:    BlobId,
    to:      BlobId,
    vacated: bool,
  },
}

impl Placement {
  /// The shard now holding the key.
  pub fn shard(&self) -> &BlobId {
    match self {
      Self::Created(id) | Self::InPlace(id) => id,
      Self::Promoted { to, .. } => to,
    }
  }

  pub(crate) fn rename(&mut self, from: &BlobId, to: &BlobId) {
    let ids: Vec<&mut BlobId> = match self {
      Self::Created(id) | Self::InPlace(id) => vec![id],
      Self::Promoted { from: a, to: b, .. } => vec![a, b],
    };
    for id in ids.into_iter().filter(|id| **id == *from) {
      *id = to.clone();
    }
  }
}

#[derive(Debug, Clone, Copy)]
pub struct PromotionController {
  capacity: usize,
}

impl PromotionController {
  pub fn new(capacity: usize) -> Self { Self { capacity } }

  pub fn capacity(&self) -> usize { self.capacity }

  /// Place `key`'s full merged list.
  ///
  /// `current` is the resolved shard, already loaded into `cache`. If the
  /// other keys there plus `merged` would exceed the capacity, a new shard
  /// holding only `key` is planned and the key is removed from `current`.
  pub fn apply(
    &self,
    cache: &mut ShardCache,
    ns: Namespace,
    key: &str,
    merged: Vec<Record>,
    current: Option<&BlobId>,
  ) -> Result<Placement> {
    if merged.len() > self.capacity {
      return Err(
        CoreError::OwnerExceedsCapacity {
          key:      key.to_owned(),
          count:    merged.len(),
          capacity: self.capacity,
        }
        .into(),
      );
    }

    let Some(current) = current else {
      let id = cache.create_pending(Shard::with_owner(key, merged), describe(ns, key));
      return Ok(Placement::Created(id));
    };

    let other = cache.get(current)?.total_excluding(key);
    if other + merged.len() > self.capacity {
      let to = cache.create_pending(Shard::with_owner(key, merged), describe(ns, key));
      let vacated = cache.remove_owner(current, key)?;
      tracing::info!(
        key,
        from = %current,
        other,
        capacity = self.capacity,
        "promoting to a new shard"
      );
      return Ok(Placement::Promoted {
        from: current.clone(),
        to,
        vacated,
      });
    }

    cache.set_records(current, key, merged)?;
    Ok(Placement::InPlace(current.clone()))
  }
}

fn describe(ns: Namespace, key: &str) -> String {
  match ns {
    Namespace::User => format!("Gallery Data for @{key}"),
    Namespace::Character => format!("Character Gallery: {key}"),
  }
}

#[cfg(test)]
mod tests {
  use gallery_core::store::DEFAULT_FILENAME;

  use super::*;
  use crate::{Error, cache::Dirty};

  fn recs(prefix: &str, n: usize) -> Vec<Record> {
    (0..n)
      .map(|i| Record::new(format!("{prefix}{i}"), vec![format!("m{i}")]))
      .collect()
  }

  /// A cache holding one clean, already "fetched" shard.
  fn cache_with(shard: Shard) -> (ShardCache, BlobId) {
    let mut cache = ShardCache::new();
    let id = cache.create_pending(shard, String::new());
    let real = BlobId::new("s1");
    cache.settle(&id, real.clone());
    (cache, real)
  }

  #[test]
  fn fits_in_place() {
    let mut shard = Shard::with_owner("a", recs("a", 3));
    shard.set_records("b", recs("b", 5));
    let (mut cache, s1) = cache_with(shard);

    let p = PromotionController::new(10)
      .apply(&mut cache, Namespace::User, "a", recs("n", 5), Some(&s1))
      .unwrap();
    assert_eq!(p, Placement::InPlace(s1.clone()));
    assert_eq!(cache.get(&s1).unwrap().total(), 10);
    assert_eq!(cache.dirty(&s1), Some(Dirty::Required));
  }

  #[test]
  fn overflow_promotes_and_leaves_other_keys_alone() {
    let (mut cache, s1) = cache_with(Shard::with_owner("other", recs("o", 999)));

    let p = PromotionController::new(1000)
      .apply(&mut cache, Namespace::User, "alice", recs("n", 5), Some(&s1))
      .unwrap();
    let Placement::Promoted { from, to, vacated } = p else {
      panic!("expected promotion");
    };
    assert_eq!(from, s1);
    assert!(!vacated);
    assert_eq!(cache.get(&to).unwrap().total(), 5);
    assert_eq!(cache.get(&s1).unwrap().records("other").len(), 999);
    assert_eq!(cache.dirty(&s1), Some(Dirty::Clean));
  }

  #[test]
  fn promoted_key_is_vacated_from_its_old_shard() {
    let mut shard = Shard::with_owner("alice", recs("a", 6));
    shard.set_records("bob", recs("b", 4));
    let (mut cache, s1) = cache_with(shard);

    let mut merged = recs("n", 1);
    merged.extend(recs("a", 6));
    let p = PromotionController::new(10)
      .apply(&mut cache, Namespace::User, "alice", merged, Some(&s1))
      .unwrap();
    assert!(matches!(p, Placement::Promoted { vacated: true, .. }));
    assert!(!cache.get(&s1).unwrap().contains_owner("alice"));
    assert_eq!(cache.dirty(&s1), Some(Dirty::Advisory));
    assert_eq!(cache.get(p.shard()).unwrap().records("alice").len(), 7);
  }

  #[test]
  fn no_shard_plans_a_creation() {
    let mut cache = ShardCache::new();
    let p = PromotionController::new(10)
      .apply(&mut cache, Namespace::Character, "hero", recs("h", 2), None)
      .unwrap();
    let Placement::Created(id) = p else {
      panic!("expected creation");
    };
    let writes = cache.writes(10).unwrap();
    assert_eq!(writes[0].id, id);
    assert_eq!(writes[0].filename, DEFAULT_FILENAME);
    assert_eq!(writes[0].description, "Character Gallery: hero");
  }

  #[test]
  fn a_key_larger_than_any_shard_is_rejected() {
    let mut cache = ShardCache::new();
    let err = PromotionController::new(3)
      .apply(&mut cache, Namespace::User, "a", recs("a", 4), None)
      .unwrap_err();
    assert!(matches!(
      err,
      Error::Core(CoreError::OwnerExceedsCapacity { count: 4, .. })
    ));
  }

  #[test]
  fn capacity_holds_after_every_placement() {
    let (mut cache, s1) = cache_with(Shard::with_owner("x", recs("x", 7)));
    let controller = PromotionController::new(10);
    for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
      controller
        .apply(&mut cache, Namespace::User, key, recs(key, i + 2), Some(&s1))
        .unwrap();
    }
    for (id, shard) in cache.shards() {
      assert!(shard.total() <= 10, "{id} holds {}", shard.total());
    }
  }
}
