//! Schema normalisation: every historical shard shape in, one canonical
//! [`Shard`] out, and back again.
//!
//! Recognised shapes form a closed set ([`WireShape`]). Detection looks only
//! at the top level of the document; anything unrecognised is rejected with
//! [`Error::Schema`] naming what was seen, never read as empty.
//!
//! ```text
//! Multi   {"users": {"<key>": {"tweets": [Record, ...]}}}
//! Flat    [Record, ...]                       (owner from each record)
//! Single  {"user_screen_name"?: "<key>", "tweets": [Record, ...]}
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
  Error, Result,
  owner::{UNKNOWN_OWNER, derive_owner},
  record::Record,
  shard::Shard,
};

/// The recognised on-wire shard shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireShape {
  /// Owner key → `{ "tweets": [...] }`. The shape every write uses.
  Multi,
  /// A bare array; each record names or implies its owner.
  Flat,
  /// One owner's records; the key is in the document or supplied by the
  /// caller.
  Single,
}

/// A normalised shard together with the shape it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
  pub shape: WireShape,
  pub shard: Shard,
}

// ─── Wire documents ──────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct MultiDoc {
  users: IndexMap<String, OwnerEntry>,
}

/// Extra fields (a legacy `gist_id` pointer, for one) are ignored.
#[derive(Serialize, Deserialize)]
struct OwnerEntry {
  #[serde(default)]
  tweets: Vec<Record>,
}

#[derive(Serialize, Deserialize)]
struct SingleDoc {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  user_screen_name: Option<String>,
  tweets:           Vec<Record>,
}

// ─── Detection ───────────────────────────────────────────────────────────────

/// Classify the top level of `raw`.
pub fn detect(raw: &Value) -> Result<WireShape> {
  match raw {
    Value::Array(_) => Ok(WireShape::Flat),
    Value::Object(map) if map.contains_key("user_gists") => {
      Err(schema_error("master directory document"))
    }
    Value::Object(map) => match (map.get("users"), map.get("tweets")) {
      (Some(Value::Object(_)), _) => Ok(WireShape::Multi),
      (Some(other), _) => Err(schema_error(format!(
        "object whose `users` is {}",
        describe(other)
      ))),
      (None, Some(Value::Array(_))) => Ok(WireShape::Single),
      _ => Err(schema_error(describe(raw))),
    },
    other => Err(schema_error(describe(other))),
  }
}

/// A short description of a JSON value's shape, for error messages.
pub fn describe(value: &Value) -> String {
  match value {
    Value::Null => "null".into(),
    Value::Bool(_) => "boolean".into(),
    Value::Number(_) => "number".into(),
    Value::String(_) => "string".into(),
    Value::Array(_) => "array".into(),
    Value::Object(map) if map.is_empty() => "empty object".into(),
    Value::Object(map) => {
      let keys: Vec<&str> = map.keys().map(String::as_str).collect();
      format!("object with keys [{}]", keys.join(", "))
    }
  }
}

fn schema_error(shape: impl Into<String>) -> Error {
  Error::Schema {
    shape: shape.into(),
  }
}

// ─── Normalise ───────────────────────────────────────────────────────────────

/// Parse `body` and normalise it. See [`normalize`].
pub fn normalize_str(body: &str, context_key: Option<&str>) -> Result<Normalized> {
  let raw: Value = serde_json::from_str(body)?;
  normalize(&raw, context_key)
}

/// Turn any recognised shape into a [`Shard`].
///
/// `context_key` names the owner when the document itself does not: a
/// single-owner document without `user_screen_name`, or flat records whose
/// owner cannot be derived.
pub fn normalize(raw: &Value, context_key: Option<&str>) -> Result<Normalized> {
  let shape = detect(raw)?;
  let shard = match shape {
    WireShape::Multi => {
      let doc: MultiDoc = serde_json::from_value(raw.clone())?;
      let mut shard = Shard::new();
      for (key, entry) in doc.users {
        shard.set_records(key, entry.tweets);
      }
      shard
    }
    WireShape::Flat => {
      let records: Vec<Record> = serde_json::from_value(raw.clone())?;
      let mut grouped: IndexMap<String, Vec<Record>> = IndexMap::new();
      for record in records {
        let key = derive_owner(&record)
          .or_else(|| context_key.map(str::to_owned))
          .unwrap_or_else(|| UNKNOWN_OWNER.to_owned());
        grouped.entry(key).or_default().push(record);
      }
      let mut shard = Shard::new();
      for (key, records) in grouped {
        shard.set_records(key, records);
      }
      shard
    }
    WireShape::Single => {
      let doc: SingleDoc = serde_json::from_value(raw.clone())?;
      let named = doc
        .user_screen_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
      match named.or(context_key) {
        Some(key) => Shard::with_owner(key, doc.tweets),
        None if doc.tweets.is_empty() => Shard::new(),
        None => {
          return Err(schema_error("single-owner document with no owner key"));
        }
      }
    }
  };
  Ok(Normalized { shape, shard })
}

// ─── Denormalise ─────────────────────────────────────────────────────────────

/// Project `shard` back to the given wire shape.
///
/// Flat output stamps each record's owner explicitly so that reading it
/// back needs no derivation. Single output fails if the shard holds more
/// than one owner.
pub fn denormalize(shard: &Shard, shape: WireShape) -> Result<Value> {
  let value = match shape {
    WireShape::Multi => {
      let users = shard
        .owners()
        .map(|(key, records)| {
          (key.to_owned(), OwnerEntry {
            tweets: records.to_vec(),
          })
        })
        .collect();
      serde_json::to_value(MultiDoc { users })?
    }
    WireShape::Flat => {
      let records: Vec<Record> = shard
        .owners()
        .flat_map(|(key, records)| {
          records.iter().cloned().map(move |r| r.with_owner(key))
        })
        .collect();
      serde_json::to_value(records)?
    }
    WireShape::Single => {
      let keys: Vec<&str> = shard.keys().collect();
      let doc = match keys.as_slice() {
        [] => SingleDoc {
          user_screen_name: None,
          tweets:           Vec::new(),
        },
        [key] => SingleDoc {
          user_screen_name: Some((*key).to_owned()),
          tweets:           shard.records(key).to_vec(),
        },
        _ => {
          return Err(Error::SingleOwnerConflict {
            keys: keys.iter().map(|k| (*k).to_owned()).collect(),
          });
        }
      };
      serde_json::to_value(doc)?
    }
  };
  Ok(value)
}

/// Pretty-printed canonical ([`WireShape::Multi`]) form of `shard`.
pub fn to_wire_string(shard: &Shard) -> Result<String> {
  Ok(serde_json::to_string_pretty(&denormalize(shard, WireShape::Multi)?)?)
}
