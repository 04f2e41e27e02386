//! Deduplicating merge of newly collected records into an existing list.
//!
//! Two records are duplicates iff their ids match. A stored record is never
//! overwritten: on a clash the existing copy wins and the incoming one is
//! dropped. Merging a batch a second time changes nothing, which is what
//! lets a failed run simply be repeated.

use std::collections::HashSet;

use crate::record::Record;

/// Where previously unseen records go relative to the existing list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InsertionPolicy {
  /// All unseen records, in their incoming order, ahead of the existing
  /// list.
  #[default]
  Prepend,
  /// The first unseen record at the head, the rest after the existing
  /// list. Kept for replaying shards built under the older policy.
  FirstToFront,
}

/// The outcome of a merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
  pub records: Vec<Record>,
  /// How many previously unseen records were inserted.
  pub added:   usize,
}

impl Merged {
  /// A no-op merge must not trigger any downstream write.
  pub fn is_noop(&self) -> bool { self.added == 0 }

  /// The newest record, at index 0 of the merged list.
  pub fn latest(&self) -> Option<&Record> { self.records.first() }
}

/// [`merge_with`] under [`InsertionPolicy::Prepend`].
pub fn merge(existing: Vec<Record>, incoming: Vec<Record>) -> Merged {
  merge_with(existing, incoming, InsertionPolicy::Prepend)
}

/// Merge `incoming` into `existing`.
///
/// Incoming records are deduplicated against the existing list and against
/// each other (first occurrence wins). Incoming records with an empty id
/// cannot be deduplicated and are dropped. The existing list is returned
/// untouched when nothing new arrives.
pub fn merge_with(
  existing: Vec<Record>,
  incoming: Vec<Record>,
  policy: InsertionPolicy,
) -> Merged {
  let mut seen: HashSet<String> = existing.iter().map(|r| r.id.clone()).collect();
  let unseen: Vec<Record> = incoming
    .into_iter()
    .filter(|r| !r.id.is_empty() && seen.insert(r.id.clone()))
    .collect();

  let added = unseen.len();
  if added == 0 {
    return Merged {
      records: existing,
      added,
    };
  }

  let records = match policy {
    InsertionPolicy::Prepend => {
      let mut out = unseen;
      out.extend(existing);
      out
    }
    InsertionPolicy::FirstToFront => {
      let mut rest = unseen.into_iter();
      let mut out: Vec<Record> = rest.next().into_iter().collect();
      out.extend(existing);
      out.extend(rest);
      out
    }
  };
  Merged { records, added }
}

/// Drop later records whose id was already seen, keeping order.
pub fn dedup(records: Vec<Record>) -> Vec<Record> {
  let mut seen = HashSet::new();
  records
    .into_iter()
    .filter(|r| r.id.is_empty() || seen.insert(r.id.clone()))
    .collect()
}
