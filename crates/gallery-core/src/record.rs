//! One media post, the unit every shard stores.
//!
//! A record is written once by the collector and never edited afterwards.
//! The only thing that may be added later is a provenance tag, and that is
//! done by producing a tagged copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Provenance ──────────────────────────────────────────────────────────────

/// The on-wire `match_source` discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
  Text,
  Face,
}

/// How a record came to be grouped under a character.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Provenance {
  /// The character label appeared in the post text.
  Text,
  /// A face in the post's media resembled the character's reference set.
  Face { similarity: Option<f64> },
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// One media post as stored in a shard.
///
/// Field names follow the historical wire format (`id_str`, `username`, …).
/// Absent optional fields are omitted when written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  /// Globally unique per source post. Duplicate detection keys on this.
  #[serde(rename = "id_str", default)]
  pub id:              String,
  /// Explicit owner key, when the writer recorded one.
  #[serde(rename = "username", default, skip_serializing_if = "Option::is_none")]
  pub owner:           Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub full_text:       Option<String>,
  /// Raw timestamp text; may be empty in older shards.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at:      Option<String>,
  #[serde(default)]
  pub media_urls:      Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub post_url:        Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub match_source:    Option<MatchSource>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub face_similarity: Option<f64>,
}

impl Record {
  /// A record with an id and its media, every optional field unset.
  pub fn new(id: impl Into<String>, media_urls: Vec<String>) -> Self {
    Self {
      id: id.into(),
      owner: None,
      full_text: None,
      created_at: None,
      media_urls,
      post_url: None,
      match_source: None,
      face_similarity: None,
    }
  }

  pub fn with_text(mut self, text: impl Into<String>) -> Self {
    self.full_text = Some(text.into());
    self
  }

  pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
    self.owner = Some(owner.into());
    self
  }

  pub fn with_post_url(mut self, url: impl Into<String>) -> Self {
    self.post_url = Some(url.into());
    self
  }

  pub fn provenance(&self) -> Option<Provenance> {
    match self.match_source? {
      MatchSource::Text => Some(Provenance::Text),
      MatchSource::Face => Some(Provenance::Face {
        similarity: self.face_similarity,
      }),
    }
  }

  /// A copy of this record carrying `provenance`, replacing any earlier tag.
  pub fn tagged(mut self, provenance: Provenance) -> Self {
    match provenance {
      Provenance::Text => {
        self.match_source = Some(MatchSource::Text);
        self.face_similarity = None;
      }
      Provenance::Face { similarity } => {
        self.match_source = Some(MatchSource::Face);
        self.face_similarity = similarity;
      }
    }
    self
  }

  /// Tag with `provenance` only if the record has no tag yet.
  pub fn tagged_if_untagged(self, provenance: Provenance) -> Self {
    if self.match_source.is_some() {
      self
    } else {
      self.tagged(provenance)
    }
  }

  /// The post timestamp, when it is present and RFC 3339.
  pub fn posted_at(&self) -> Option<DateTime<Utc>> {
    let raw = self.created_at.as_deref()?.trim();
    DateTime::parse_from_rfc3339(raw)
      .ok()
      .map(|dt| dt.with_timezone(&Utc))
  }

  /// The directory's minimal projection of this record under `owner`.
  pub fn representative(&self, owner: &str) -> Representative {
    Representative {
      id:         self.id.clone(),
      owner:      owner.to_owned(),
      media_urls: self.media_urls.iter().take(1).cloned().collect(),
    }
  }
}

// ─── Representative ──────────────────────────────────────────────────────────

/// The slim entry the master directory keeps for each sharded owner: the
/// newest record's id and first media reference, never the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Representative {
  #[serde(rename = "id_str")]
  pub id:         String,
  #[serde(rename = "username")]
  pub owner:      String,
  /// At most one entry.
  #[serde(default)]
  pub media_urls: Vec<String>,
}

impl Representative {
  pub fn media_url(&self) -> Option<&str> {
    self.media_urls.first().map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Record {
    Record::new("9", vec!["https://img/9a".into(), "https://img/9b".into()])
      .with_text("@alice: hello")
  }

  #[test]
  fn wire_names_follow_legacy_format() {
    let value = serde_json::to_value(sample()).unwrap();
    assert_eq!(value["id_str"], "9");
    assert_eq!(value["full_text"], "@alice: hello");
    assert!(value.get("username").is_none());
    assert!(value.get("match_source").is_none());
  }

  #[test]
  fn representative_keeps_identity_and_first_media_only() {
    let rep = sample().representative("alice");
    assert_eq!(rep, Representative {
      id:         "9".into(),
      owner:      "alice".into(),
      media_urls: vec!["https://img/9a".into()],
    });
    let value = serde_json::to_value(&rep).unwrap();
    assert!(value.get("full_text").is_none());
  }

  #[test]
  fn tagging_sets_and_replaces_provenance() {
    let face = sample().tagged(Provenance::Face {
      similarity: Some(0.61),
    });
    assert_eq!(face.match_source, Some(MatchSource::Face));
    assert_eq!(face.provenance(), Some(Provenance::Face {
      similarity: Some(0.61),
    }));

    let text = face.tagged(Provenance::Text);
    assert_eq!(text.face_similarity, None);
    assert_eq!(text.provenance(), Some(Provenance::Text));
  }

  #[test]
  fn tagged_if_untagged_keeps_existing_tag() {
    let face = sample().tagged(Provenance::Face { similarity: None });
    let kept = face.tagged_if_untagged(Provenance::Text);
    assert_eq!(kept.match_source, Some(MatchSource::Face));
  }

  #[test]
  fn posted_at_tolerates_empty_timestamps() {
    let mut r = sample();
    r.created_at = Some(String::new());
    assert!(r.posted_at().is_none());

    r.created_at = Some("2024-05-01T12:30:00.000Z".into());
    assert_eq!(r.posted_at().unwrap().timestamp(), 1_714_566_600);
  }
}
