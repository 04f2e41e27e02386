//! The master directory, the single root document of the gallery.
//!
//! It maps owner keys to the shard holding their records and keeps a slim
//! representative of each sharded user's newest record, so existence checks
//! never have to open a shard. Records whose owner cannot be derived live
//! here directly as loose records.
//!
//! Wire format:
//!
//! ```text
//! {
//!   "user_screen_name": "",
//!   "user_gists":      { "<key>": "<shard>" | {"gist_id": "<shard>"} },
//!   "character_gists": { "<label>": "<shard>" | {"gist_id": "<shard>"} },
//!   "tweets":          [ representative..., loose record... ]
//! }
//! ```

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  Error, Result,
  merge::{InsertionPolicy, merge_with},
  owner::{Namespace, derive_owner},
  record::{Record, Representative},
  schema::describe,
  store::BlobId,
};

// ─── Wire documents ──────────────────────────────────────────────────────────

/// A mapping value: older directories nest the id in an object.
#[derive(Deserialize)]
#[serde(untagged)]
enum MappingEntry {
  Id(BlobId),
  Nested { gist_id: BlobId },
}

impl From<MappingEntry> for BlobId {
  fn from(entry: MappingEntry) -> Self {
    match entry {
      MappingEntry::Id(id) | MappingEntry::Nested { gist_id: id } => id,
    }
  }
}

#[derive(Deserialize)]
struct DirectoryIn {
  #[serde(default)]
  user_gists:      IndexMap<String, MappingEntry>,
  #[serde(default)]
  character_gists: IndexMap<String, MappingEntry>,
  #[serde(default)]
  tweets:          Vec<Record>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum TweetEntry<'a> {
  Representative(&'a Representative),
  Loose(&'a Record),
}

#[derive(Serialize)]
struct DirectoryOut<'a> {
  user_screen_name: &'static str,
  #[serde(skip_serializing_if = "is_empty_mapping")]
  user_gists:       &'a IndexMap<String, BlobId>,
  #[serde(skip_serializing_if = "is_empty_mapping")]
  character_gists:  &'a IndexMap<String, BlobId>,
  tweets:           Vec<TweetEntry<'a>>,
}

fn is_empty_mapping(m: &&IndexMap<String, BlobId>) -> bool { m.is_empty() }

// ─── Violations ──────────────────────────────────────────────────────────────

/// A broken directory invariant, found by [`Directory::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
  /// A mapped user has no representative entry.
  MissingRepresentative { key: String },
  /// A representative exists for a user with no mapping.
  OrphanRepresentative { key: String },
}

impl fmt::Display for Violation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::MissingRepresentative { key } => {
        write!(f, "{key:?} is mapped but has no representative")
      }
      Self::OrphanRepresentative { key } => {
        write!(f, "{key:?} has a representative but no mapping")
      }
    }
  }
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// In-memory master directory.
///
/// Mapping order is the order keys were first added. Remapping a key keeps
/// its position, so the last distinct shard is the most recently added one
/// rather than the most recently touched. Representatives are ordered most
/// recently moved first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Directory {
  users:           IndexMap<String, BlobId>,
  characters:      IndexMap<String, BlobId>,
  representatives: IndexMap<String, Representative>,
  loose:           Vec<Record>,
}

impl Directory {
  pub fn new() -> Self { Self::default() }

  /// Parse the directory from blob text.
  pub fn parse(body: &str) -> Result<Self> {
    let raw: Value = serde_json::from_str(body)?;
    Self::from_value(&raw)
  }

  /// Read a directory document.
  ///
  /// A `tweets` entry becomes the representative of its owner when that
  /// owner is a mapped user without one yet; every other entry is loose.
  pub fn from_value(raw: &Value) -> Result<Self> {
    let Value::Object(map) = raw else {
      return Err(Error::Schema {
        shape: format!("directory as {}", describe(raw)),
      });
    };
    let recognised = ["user_gists", "character_gists", "tweets"]
      .iter()
      .any(|k| map.contains_key(*k));
    if !map.is_empty() && !recognised {
      return Err(Error::Schema {
        shape: format!("directory as {}", describe(raw)),
      });
    }

    let doc: DirectoryIn = serde_json::from_value(raw.clone())?;
    let mut dir = Self {
      users: doc.user_gists.into_iter().map(|(k, v)| (k, v.into())).collect(),
      characters: doc
        .character_gists
        .into_iter()
        .map(|(k, v)| (k, v.into()))
        .collect(),
      ..Self::default()
    };

    for record in doc.tweets {
      match derive_owner(&record) {
        Some(owner)
          if dir.users.contains_key(&owner)
            && !dir.representatives.contains_key(&owner) =>
        {
          let rep = record.representative(&owner);
          dir.representatives.insert(owner, rep);
        }
        _ => dir.loose.push(record),
      }
    }
    Ok(dir)
  }

  pub fn to_value(&self) -> Result<Value> {
    let tweets = self
      .representatives
      .values()
      .map(TweetEntry::Representative)
      .chain(self.loose.iter().map(TweetEntry::Loose))
      .collect();
    Ok(serde_json::to_value(DirectoryOut {
      user_screen_name: "",
      user_gists: &self.users,
      character_gists: &self.characters,
      tweets,
    })?)
  }

  pub fn to_wire_string(&self) -> Result<String> {
    Ok(serde_json::to_string_pretty(&self.to_value()?)?)
  }

  // ── Mappings ──────────────────────────────────────────────────────────────

  pub fn mapping(&self, ns: Namespace) -> &IndexMap<String, BlobId> {
    match ns {
      Namespace::User => &self.users,
      Namespace::Character => &self.characters,
    }
  }

  fn mapping_mut(&mut self, ns: Namespace) -> &mut IndexMap<String, BlobId> {
    match ns {
      Namespace::User => &mut self.users,
      Namespace::Character => &mut self.characters,
    }
  }

  pub fn shard_of(&self, ns: Namespace, key: &str) -> Option<&BlobId> {
    self.mapping(ns).get(key)
  }

  /// Distinct shards in order of first appearance in the mapping.
  pub fn distinct_shards(&self, ns: Namespace) -> Vec<&BlobId> {
    let mut out: Vec<&BlobId> = Vec::new();
    for id in self.mapping(ns).values() {
      if !out.contains(&id) {
        out.push(id);
      }
    }
    out
  }

  /// The most recently added distinct shard of `ns`.
  pub fn latest_shard(&self, ns: Namespace) -> Option<&BlobId> {
    self.distinct_shards(ns).pop()
  }

  /// Every key of `ns` mapped to `shard`.
  pub fn owners_of(&self, ns: Namespace, shard: &BlobId) -> Vec<&str> {
    self
      .mapping(ns)
      .iter()
      .filter(|(_, id)| *id == shard)
      .map(|(k, _)| k.as_str())
      .collect()
  }

  /// Point `key` at `shard` without touching representatives. A key that
  /// is already mapped keeps its position; new keys go to the end.
  pub fn set_mapping(&mut self, ns: Namespace, key: impl Into<String>, shard: BlobId) {
    self.mapping_mut(ns).insert(key.into(), shard);
  }

  /// Record that `key`'s records now live in `shard`, with `latest` as
  /// their newest record. User keys get a fresh representative.
  pub fn record_move(
    &mut self,
    ns: Namespace,
    key: &str,
    shard: BlobId,
    latest: &Record,
  ) {
    self.set_mapping(ns, key, shard);
    if ns == Namespace::User {
      self.set_representative(key, latest.representative(key));
    }
  }

  /// Install `rep` as `key`'s representative, at the front.
  pub fn set_representative(&mut self, key: &str, rep: Representative) {
    self.representatives.shift_remove(key);
    self.representatives.shift_insert(0, key.to_owned(), rep);
  }

  /// Replace every occurrence of `from` with `to` in both mappings.
  /// Returns how many keys were repointed.
  pub fn rename_shard(&mut self, from: &BlobId, to: &BlobId) -> usize {
    let mut renamed = 0;
    for id in self.users.values_mut().chain(self.characters.values_mut()) {
      if id == from {
        *id = to.clone();
        renamed += 1;
      }
    }
    renamed
  }

  /// Drop every user mapping. Representatives stay until
  /// [`Directory::demote_unmapped_representatives`] runs.
  pub fn clear_users(&mut self) { self.users.clear(); }

  /// Turn representatives whose key has no mapping into loose records
  /// stamped with their owner. Returns how many were demoted.
  pub fn demote_unmapped_representatives(&mut self) -> usize {
    let (kept, orphaned): (IndexMap<_, _>, IndexMap<_, _>) =
      std::mem::take(&mut self.representatives)
        .into_iter()
        .partition(|(key, _)| self.users.contains_key(key));
    self.representatives = kept;
    let demoted = orphaned.len();
    for (key, rep) in orphaned {
      if !self.loose.iter().any(|r| r.id == rep.id) {
        self.loose.push(Record::new(rep.id, rep.media_urls).with_owner(key));
      }
    }
    demoted
  }

  // ── Representatives & loose records ───────────────────────────────────────

  pub fn representative(&self, key: &str) -> Option<&Representative> {
    self.representatives.get(key)
  }

  pub fn representatives(&self) -> impl Iterator<Item = &Representative> {
    self.representatives.values()
  }

  pub fn loose(&self) -> &[Record] { &self.loose }

  /// Copies of the loose records whose derived owner is `key`.
  pub fn loose_owned_by(&self, key: &str) -> Vec<Record> {
    self
      .loose
      .iter()
      .filter(|r| derive_owner(r).as_deref() == Some(key))
      .cloned()
      .collect()
  }

  /// Remove and return loose records whose derived owner is `key`.
  pub fn take_loose_owned_by(&mut self, key: &str) -> Vec<Record> {
    let (taken, kept): (Vec<Record>, Vec<Record>) = std::mem::take(&mut self.loose)
      .into_iter()
      .partition(|r| derive_owner(r).as_deref() == Some(key));
    self.loose = kept;
    taken
  }

  /// Merge records of unknown owner into the loose list. Returns how many
  /// were new.
  pub fn merge_loose(&mut self, incoming: Vec<Record>, policy: InsertionPolicy) -> usize {
    let merged = merge_with(std::mem::take(&mut self.loose), incoming, policy);
    self.loose = merged.records;
    merged.added
  }

  /// Fast existence check over representatives and loose records.
  pub fn contains_id(&self, id: &str) -> bool {
    self.representatives.values().any(|r| r.id == id)
      || self.loose.iter().any(|r| r.id == id)
  }

  /// Every id the directory itself knows, representatives first.
  pub fn known_ids(&self) -> Vec<String> {
    self
      .representatives
      .values()
      .map(|r| r.id.clone())
      .chain(self.loose.iter().map(|r| r.id.clone()))
      .filter(|id| !id.is_empty())
      .collect()
  }

  /// Check the mapping/representative pairing for users.
  pub fn check(&self) -> Vec<Violation> {
    let missing = self
      .users
      .keys()
      .filter(|k| !self.representatives.contains_key(*k))
      .map(|k| Violation::MissingRepresentative { key: k.clone() });
    let orphans = self
      .representatives
      .keys()
      .filter(|k| !self.users.contains_key(*k))
      .map(|k| Violation::OrphanRepresentative { key: k.clone() });
    missing.chain(orphans).collect()
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn rec(id: &str, owner: &str) -> Record {
    Record::new(id, vec![format!("https://img/{id}/1"), format!("https://img/{id}/2")])
      .with_text(format!("@{owner}: post {id}"))
  }

  #[test]
  fn reads_both_mapping_entry_variants() {
    let dir = Directory::from_value(&json!({
      "user_gists": {"alice": "s1", "bob": {"gist_id": "s2"}},
      "character_gists": {"hero": {"gist_id": "c1"}},
      "tweets": []
    }))
    .unwrap();
    assert_eq!(dir.shard_of(Namespace::User, "alice"), Some(&BlobId::new("s1")));
    assert_eq!(dir.shard_of(Namespace::User, "bob"), Some(&BlobId::new("s2")));
    assert_eq!(dir.shard_of(Namespace::Character, "hero"), Some(&BlobId::new("c1")));
  }

  #[test]
  fn classifies_tweets_into_representatives_and_loose() {
    let dir = Directory::from_value(&json!({
      "user_gists": {"alice": "s1"},
      "tweets": [
        {"id_str": "9", "full_text": "@alice: newest", "media_urls": ["a", "b"],
         "gist_id": "s1"},
        {"id_str": "8", "full_text": "@alice: older", "media_urls": ["c"]},
        {"id_str": "5", "full_text": "no owner", "media_urls": ["d"]}
      ]
    }))
    .unwrap();
    let rep = dir.representative("alice").unwrap();
    assert_eq!(rep.id, "9");
    assert_eq!(rep.media_urls, ["a"]);
    let loose: Vec<_> = dir.loose().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(loose, ["8", "5"]);
    assert!(dir.contains_id("9"));
    assert!(dir.contains_id("5"));
    assert!(!dir.contains_id("1"));
  }

  #[test]
  fn written_form_is_slim() {
    let mut dir = Directory::new();
    dir.record_move(Namespace::User, "alice", "s1".into(), &rec("9", "alice"));
    let value = dir.to_value().unwrap();
    assert_eq!(value["user_gists"]["alice"], "s1");
    assert_eq!(value["tweets"][0], json!({
      "id_str": "9", "username": "alice", "media_urls": ["https://img/9/1"]
    }));
    assert!(value.get("character_gists").is_none());

    let back = Directory::from_value(&value).unwrap();
    assert_eq!(back, dir);
  }

  #[test]
  fn record_move_keeps_mapping_position_and_refreshes_representative() {
    let mut dir = Directory::new();
    dir.record_move(Namespace::User, "alice", "s1".into(), &rec("1", "alice"));
    dir.record_move(Namespace::User, "bob", "s2".into(), &rec("2", "bob"));
    assert_eq!(dir.latest_shard(Namespace::User), Some(&BlobId::new("s2")));

    dir.record_move(Namespace::User, "alice", "s1".into(), &rec("5", "alice"));
    assert_eq!(dir.latest_shard(Namespace::User), Some(&BlobId::new("s2")));
    let keys: Vec<_> = dir.mapping(Namespace::User).keys().cloned().collect();
    assert_eq!(keys, ["alice", "bob"]);

    dir.record_move(Namespace::User, "alice", "s3".into(), &rec("7", "alice"));
    assert_eq!(dir.shard_of(Namespace::User, "alice"), Some(&BlobId::new("s3")));
    assert_eq!(dir.representative("alice").unwrap().id, "7");
    let first = dir.representatives().next().unwrap();
    assert_eq!(first.owner, "alice");
  }

  #[test]
  fn latest_shard_is_last_first_appearance() {
    let dir = Directory::from_value(&json!({
      "user_gists": {"a": "s1", "b": "s2", "c": "s1"}
    }))
    .unwrap();
    assert_eq!(dir.distinct_shards(Namespace::User).len(), 2);
    assert_eq!(dir.latest_shard(Namespace::User), Some(&BlobId::new("s2")));
    assert_eq!(dir.owners_of(Namespace::User, &"s1".into()), ["a", "c"]);
  }

  #[test]
  fn character_moves_keep_no_representative() {
    let mut dir = Directory::new();
    dir.record_move(Namespace::Character, "hero", "c1".into(), &rec("1", "alice"));
    assert!(dir.representative("hero").is_none());
    assert!(dir.check().is_empty());
  }

  #[test]
  fn rename_repoints_every_key() {
    let mut dir = Directory::new();
    dir.set_mapping(Namespace::User, "a", "tmp".into());
    dir.set_mapping(Namespace::Character, "h", "tmp".into());
    assert_eq!(dir.rename_shard(&"tmp".into(), &"real".into()), 2);
    assert_eq!(dir.shard_of(Namespace::Character, "h"), Some(&BlobId::new("real")));
  }

  #[test]
  fn check_reports_unpaired_entries() {
    let mut dir = Directory::new();
    dir.set_mapping(Namespace::User, "alice", "s1".into());
    dir.set_representative("bob", rec("1", "bob").representative("bob"));
    assert_eq!(dir.check(), vec![
      Violation::MissingRepresentative { key: "alice".into() },
      Violation::OrphanRepresentative { key: "bob".into() },
    ]);
  }

  #[test]
  fn clearing_users_demotes_their_representatives() {
    let mut dir = Directory::new();
    dir.record_move(Namespace::User, "alice", "s1".into(), &rec("9", "alice"));
    dir.record_move(Namespace::User, "bob", "s1".into(), &rec("8", "bob"));
    dir.clear_users();
    dir.set_mapping(Namespace::User, "bob", "s2".into());

    assert_eq!(dir.demote_unmapped_representatives(), 1);
    assert!(dir.representative("bob").is_some());
    assert_eq!(dir.loose()[0].owner.as_deref(), Some("alice"));
    assert!(dir.contains_id("9"));
    assert!(dir.check().is_empty());
  }

  #[test]
  fn loose_records_merge_and_can_be_claimed() {
    let mut dir = Directory::new();
    let added = dir.merge_loose(
      vec![rec("1", "alice"), Record::new("2", vec!["m".into()])],
      InsertionPolicy::Prepend,
    );
    assert_eq!(added, 2);
    assert_eq!(dir.merge_loose(vec![rec("1", "alice")], InsertionPolicy::Prepend), 0);

    let claimed = dir.take_loose_owned_by("alice");
    assert_eq!(claimed.len(), 1);
    assert_eq!(dir.loose().len(), 1);
  }

  #[test]
  fn rejects_non_directory_documents() {
    assert!(matches!(
      Directory::from_value(&json!([1, 2])),
      Err(Error::Schema { .. })
    ));
    assert!(matches!(
      Directory::from_value(&json!({"users": {}})),
      Err(Error::Schema { .. })
    ));
    assert!(Directory::from_value(&json!({})).unwrap().check().is_empty());
  }
}
