//! What a run did, returned to the caller once it has committed.

use chrono::{DateTime, Utc};
use gallery_core::{directory::Violation, owner::Namespace, store::BlobId};

use crate::promotion::Placement;

/// The outcome for one owner key.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerReport {
  pub namespace: Namespace,
  pub key:       String,
  /// Records the key held before the run.
  pub existing:  usize,
  pub added:     usize,
  /// `None` when nothing new arrived and the key was left alone.
  pub placement: Option<Placement>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
  pub started_at:        DateTime<Utc>,
  pub owners:            Vec<OwnerReport>,
  /// New records kept on the directory because their owner is unknown.
  pub loose_added:       usize,
  pub created:           Vec<BlobId>,
  pub replaced:          Vec<BlobId>,
  /// Advisory cleanup writes that failed and were skipped.
  pub skipped_cleanups:  Vec<BlobId>,
  /// Shards that could not be read and were left out of the run.
  pub skipped_shards:    Vec<BlobId>,
  pub directory_written: bool,
  pub dry_run:           bool,
}

impl RunReport {
  pub(crate) fn new(dry_run: bool) -> Self {
    Self {
      started_at: Utc::now(),
      owners: Vec::new(),
      loose_added: 0,
      created: Vec::new(),
      replaced: Vec::new(),
      skipped_cleanups: Vec::new(),
      skipped_shards: Vec::new(),
      directory_written: false,
      dry_run,
    }
  }

  /// Total new records across keys and the loose list.
  pub fn added(&self) -> usize {
    self.owners.iter().map(|o| o.added).sum::<usize>() + self.loose_added
  }

  /// Whether the run issued no writes at all.
  pub fn is_noop(&self) -> bool {
    self.created.is_empty()
      && self.replaced.is_empty()
      && self.skipped_cleanups.is_empty()
      && !self.directory_written
  }

  pub fn owner(&self, key: &str) -> Option<&OwnerReport> {
    self.owners.iter().find(|o| o.key == key)
  }

  /// Swap a provisional shard id for the id it was created under.
  pub(crate) fn rename(&mut self, from: &BlobId, to: &BlobId) {
    for placement in self.owners.iter_mut().filter_map(|o| o.placement.as_mut()) {
      placement.rename(from, to);
    }
  }
}

/// Result of rebuilding the user mapping from a list of shards.
#[derive(Debug, Clone)]
pub struct RestoreReport {
  pub mapped:            usize,
  /// Representatives whose key was not found in any shard; they are kept
  /// as loose records.
  pub demoted:           usize,
  pub skipped_shards:    Vec<BlobId>,
  pub directory_written: bool,
}

/// Result of rewriting the directory in slim form.
#[derive(Debug, Clone)]
pub struct SlimReport {
  /// `tweets` entries before and after.
  pub before:            usize,
  pub after:             usize,
  /// Entries whose written form changed.
  pub slimmed:           usize,
  pub directory_written: bool,
}

/// One problem found by an audit.
#[derive(Debug, Clone, PartialEq)]
pub enum Finding {
  Directory(Violation),
  OverCapacity {
    shard:    BlobId,
    total:    usize,
    capacity: usize,
  },
  /// The mapping points at a shard that does not hold the key.
  MissingFromShard {
    namespace: Namespace,
    key:       String,
    shard:     BlobId,
  },
  /// The representative names a record or media reference the shard does
  /// not hold.
  StaleRepresentative {
    key:   String,
    shard: BlobId,
    id:    String,
  },
  Unreadable {
    shard: BlobId,
    error: String,
  },
}

impl std::fmt::Display for Finding {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Directory(v) => write!(f, "{v}"),
      Self::OverCapacity {
        shard,
        total,
        capacity,
      } => write!(f, "shard {shard} holds {total} records (capacity {capacity})"),
      Self::MissingFromShard {
        namespace,
        key,
        shard,
      } => write!(f, "{namespace:?} key {key:?} is mapped to {shard} but absent there"),
      Self::StaleRepresentative { key, shard, id } => {
        write!(f, "representative {id} of {key:?} is not in shard {shard}")
      }
      Self::Unreadable { shard, error } => write!(f, "shard {shard} is unreadable: {error}"),
    }
  }
}
