//! Owner keys: the user handle or character label a record is filed under.
//!
//! Collected records do not always name their owner. The key is derived
//! from content in a fixed order; records whose owner cannot be determined
//! are filed under [`UNKNOWN_OWNER`] and never sharded.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Reserved key for records with no derivable owner.
pub const UNKNOWN_OWNER: &str = "_unknown";

/// Which directory mapping an owner key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
  /// Keys of `user_gists`: account handles.
  User,
  /// Keys of `character_gists`: labels grouped across many accounts.
  Character,
}

/// Derive the owner of `record`.
///
/// Order: explicit `username`, then a leading `@name:` in the text, then the
/// path segment before `/status/` in the post URL.
pub fn derive_owner(record: &Record) -> Option<String> {
  if let Some(name) = record.owner.as_deref().map(str::trim)
    && !name.is_empty()
  {
    return Some(name.to_owned());
  }
  if let Some(name) = record.full_text.as_deref().and_then(owner_from_text) {
    return Some(name.to_owned());
  }
  record
    .post_url
    .as_deref()
    .and_then(owner_from_url)
    .map(str::to_owned)
}

/// [`derive_owner`], falling back to [`UNKNOWN_OWNER`].
pub fn owner_key(record: &Record) -> String {
  derive_owner(record).unwrap_or_else(|| UNKNOWN_OWNER.to_owned())
}

pub fn is_unknown(key: &str) -> bool { key == UNKNOWN_OWNER }

/// Whether `record` was posted by `key`, judged from text or URL only.
pub fn belongs_to(record: &Record, key: &str) -> bool {
  record.full_text.as_deref().and_then(owner_from_text) == Some(key)
    || record.post_url.as_deref().and_then(owner_from_url) == Some(key)
}

/// Group records by derived owner, preserving first-seen key order and the
/// relative order of records within each key.
pub fn group_by_owner(
  records: impl IntoIterator<Item = Record>,
) -> IndexMap<String, Vec<Record>> {
  let mut groups: IndexMap<String, Vec<Record>> = IndexMap::new();
  for record in records {
    groups.entry(owner_key(&record)).or_default().push(record);
  }
  groups
}

fn owner_from_text(text: &str) -> Option<&str> {
  let (name, _) = text.strip_prefix('@')?.split_once(':')?;
  let name = name.trim();
  (!name.is_empty()).then_some(name)
}

fn owner_from_url(url: &str) -> Option<&str> {
  let (head, _) = url.split_once("/status/")?;
  let (_, name) = head.rsplit_once('/')?;
  (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rec(id: &str) -> Record { Record::new(id, vec![format!("https://img/{id}")]) }

  #[test]
  fn explicit_owner_wins() {
    let r = rec("1").with_owner("carol").with_text("@alice: hi");
    assert_eq!(derive_owner(&r).as_deref(), Some("carol"));
  }

  #[test]
  fn text_marker_then_url() {
    let r = rec("1").with_text("@alice : hi there");
    assert_eq!(derive_owner(&r).as_deref(), Some("alice"));

    let r = rec("2")
      .with_text("no marker")
      .with_post_url("https://x.com/bob/status/2");
    assert_eq!(derive_owner(&r).as_deref(), Some("bob"));
  }

  #[test]
  fn underivable_records_use_reserved_key() {
    let r = rec("1").with_text("plain text");
    assert_eq!(derive_owner(&r), None);
    assert_eq!(owner_key(&r), UNKNOWN_OWNER);
    assert!(is_unknown(&owner_key(&r)));
  }

  #[test]
  fn blank_explicit_owner_is_ignored() {
    let r = rec("1").with_owner("  ").with_text("@dave: x");
    assert_eq!(derive_owner(&r).as_deref(), Some("dave"));
  }

  #[test]
  fn grouping_preserves_order() {
    let groups = group_by_owner(vec![
      rec("1").with_text("@b: one"),
      rec("2").with_text("@a: two"),
      rec("3").with_text("nobody"),
      rec("4").with_text("@b: four"),
    ]);
    let keys: Vec<_> = groups.keys().map(String::as_str).collect();
    assert_eq!(keys, ["b", "a", UNKNOWN_OWNER]);
    let b_ids: Vec<_> = groups["b"].iter().map(|r| r.id.as_str()).collect();
    assert_eq!(b_ids, ["1", "4"]);
  }

  #[test]
  fn belongs_to_ignores_explicit_owner() {
    let r = rec("1").with_owner("x").with_post_url("https://x.com/erin/status/1");
    assert!(belongs_to(&r, "erin"));
    assert!(!belongs_to(&r, "x"));
  }
}
