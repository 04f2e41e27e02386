//! Shard resolution: which shard should receive a key's records.
//!
//! Selection is optimistic and ignores capacity. The selected shard may
//! already be full; the promotion step deals with that after the merge.

use crate::{directory::Directory, owner::Namespace, store::BlobId};

/// Where a key's records go, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
  /// The key is already mapped to this shard.
  Mapped(BlobId),
  /// Unmapped; the caller named a target shard.
  Override(BlobId),
  /// Unmapped; the most recently added shard in the directory.
  Fallback(BlobId),
  /// Nothing to fall back on; a new shard must be created.
  Create,
}

impl Resolution {
  pub fn shard(&self) -> Option<&BlobId> {
    match self {
      Self::Mapped(id) | Self::Override(id) | Self::Fallback(id) => Some(id),
      Self::Create => None,
    }
  }

  pub fn is_mapped(&self) -> bool { matches!(self, Self::Mapped(_)) }
}

/// Resolve `key` in namespace `ns`.
///
/// Fallback only considers shards of the key's own namespace, so the
/// first character key gets a shard of its own instead of joining a user
/// shard.
pub fn resolve(
  ns: Namespace,
  key: &str,
  directory: &Directory,
  promote_to: Option<&BlobId>,
) -> Resolution {
  if let Some(id) = directory.shard_of(ns, key) {
    return Resolution::Mapped(id.clone());
  }
  if let Some(id) = promote_to {
    return Resolution::Override(id.clone());
  }
  directory
    .latest_shard(ns)
    .map(|id| Resolution::Fallback(id.clone()))
    .unwrap_or(Resolution::Create)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn dir() -> Directory {
    let mut dir = Directory::new();
    dir.set_mapping(Namespace::User, "alice", "s1".into());
    dir.set_mapping(Namespace::User, "bob", "s2".into());
    dir.set_mapping(Namespace::User, "carol", "s1".into());
    dir
  }

  #[test]
  fn mapped_key_wins_over_override() {
    let over = BlobId::new("forced");
    assert_eq!(
      resolve(Namespace::User, "alice", &dir(), Some(&over)),
      Resolution::Mapped("s1".into())
    );
  }

  #[test]
  fn override_applies_to_unmapped_keys() {
    let over = BlobId::new("forced");
    assert_eq!(
      resolve(Namespace::User, "dave", &dir(), Some(&over)),
      Resolution::Override(over)
    );
  }

  #[test]
  fn fallback_is_most_recently_added_distinct_shard() {
    assert_eq!(
      resolve(Namespace::User, "dave", &dir(), None),
      Resolution::Fallback("s2".into())
    );
  }

  #[test]
  fn fallback_stays_within_the_namespace() {
    let d = dir();
    assert_eq!(resolve(Namespace::Character, "hero", &d, None), Resolution::Create);

    let mut d = d;
    d.set_mapping(Namespace::Character, "villain", "c1".into());
    assert_eq!(
      resolve(Namespace::Character, "hero", &d, None),
      Resolution::Fallback("c1".into())
    );
  }

  #[test]
  fn empty_directory_requests_creation() {
    let r = resolve(Namespace::User, "alice", &Directory::new(), None);
    assert_eq!(r, Resolution::Create);
    assert_eq!(r.shard(), None);
  }
}
