//! Reading collector output and local record feeds.
//!
//! The collector writes an archive-style export:
//!
//! ```text
//! window.YTD.tweets.part0 = [ {"tweet": {"id_str": ..., "full_text": ...,
//!   "created_at": ..., "extended_entities": {"media": [...]}}}, ... ]
//! ```
//!
//! Local feeds handed to a batched merge may be that export, a bare record
//! array, a `{"tweets": [...]}` document, or a shard document.

use gallery_core::{
  owner::{UNKNOWN_OWNER, derive_owner, is_unknown},
  record::Record,
  schema,
};
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

const EXPORT_VARIABLE: &str = "window.YTD.tweets.part0";

#[derive(Deserialize)]
struct ExportEntry {
  tweet: ExportTweet,
}

#[derive(Deserialize)]
struct ExportTweet {
  #[serde(default)]
  id_str:            String,
  #[serde(default)]
  full_text:         Option<String>,
  #[serde(default)]
  created_at:        Option<String>,
  #[serde(default)]
  entities:          Entities,
  #[serde(default)]
  extended_entities: Entities,
}

#[derive(Default, Deserialize)]
struct Entities {
  #[serde(default)]
  media: Vec<Media>,
}

#[derive(Deserialize)]
struct Media {
  #[serde(default)]
  media_url_https: Option<String>,
  #[serde(default)]
  expanded_url:    Option<String>,
}

impl ExportTweet {
  /// `None` for posts without media.
  fn into_record(self) -> Option<Record> {
    let media = if self.extended_entities.media.is_empty() {
      self.entities.media
    } else {
      self.extended_entities.media
    };
    let media_urls: Vec<String> = media
      .iter()
      .filter_map(|m| m.media_url_https.clone())
      .filter(|u| !u.is_empty())
      .collect();
    if media_urls.is_empty() {
      return None;
    }

    let post_url = media
      .iter()
      .filter_map(|m| m.expanded_url.as_deref())
      .find(|u| u.contains("/status/"))
      .map(strip_photo_suffix);

    let mut record = Record::new(self.id_str, media_urls);
    record.full_text = self.full_text;
    record.created_at = self.created_at;
    record.post_url = post_url;
    Some(record)
  }
}

/// `…/status/1/photo/2` → `…/status/1`.
fn strip_photo_suffix(url: &str) -> String {
  match url.rsplit_once("/photo/") {
    Some((head, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
      head.to_owned()
    }
    _ => url.to_owned(),
  }
}

/// Parse the collector's export. Posts without media are dropped.
pub fn parse_export(body: &str) -> Result<Vec<Record>> {
  let json = body
    .trim_start()
    .strip_prefix(EXPORT_VARIABLE)
    .map(|rest| rest.trim_start())
    .map(|rest| {
      rest
        .strip_prefix('=')
        .ok_or_else(|| Error::Feed(format!("expected `=` after {EXPORT_VARIABLE}")))
    })
    .transpose()?
    .unwrap_or(body);

  let entries: Vec<ExportEntry> = serde_json::from_str(json)?;
  let total = entries.len();
  let records: Vec<Record> = entries
    .into_iter()
    .filter_map(|e| e.tweet.into_record())
    .collect();
  tracing::debug!(total, kept = records.len(), "parsed collector export");
  Ok(records)
}

/// Parse a local feed of records in any accepted layout.
///
/// Records filed under an owner the record itself does not imply get that
/// owner stamped explicitly.
pub fn parse_feed(body: &str) -> Result<Vec<Record>> {
  if body.trim_start().starts_with(EXPORT_VARIABLE) {
    return parse_export(body);
  }
  let raw: Value = serde_json::from_str(body)?;
  if let Value::Array(items) = &raw
    && items.first().is_some_and(|v| v.get("tweet").is_some())
  {
    return parse_export(body);
  }

  let normalized = schema::normalize(&raw, Some(UNKNOWN_OWNER))?;
  let mut records = Vec::with_capacity(normalized.shard.total());
  for (key, owned) in normalized.shard.owners() {
    for record in owned {
      let stamp = !is_unknown(key) && derive_owner(record).as_deref() != Some(key);
      records.push(if stamp {
        record.clone().with_owner(key)
      } else {
        record.clone()
      });
    }
  }
  Ok(records)
}
