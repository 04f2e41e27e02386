//! Fallback read path: a shallow `git clone` of the gist repository.

use std::path::Path;

use gallery_core::store::{Blob, BlobId, CANDIDATE_FILENAMES};
use tokio::process::Command;
use uuid::Uuid;

use crate::{Error, Result};

pub(crate) fn clone_url(clone_base: &str, id: &BlobId) -> String {
  format!("{}/{id}.git", clone_base.trim_end_matches('/'))
}

/// Clone `id` into a scratch directory, read the first candidate file and
/// remove the directory again.
pub(crate) async fn fetch(clone_base: &str, id: &BlobId) -> Result<Blob> {
  let dir = std::env::temp_dir().join(format!("gallery-clone-{}", Uuid::new_v4()));
  let result = clone_into(clone_base, id, &dir).await;
  if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
    tracing::debug!(dir = %dir.display(), error = %e, "could not remove clone");
  }
  result
}

async fn clone_into(clone_base: &str, id: &BlobId, dir: &Path) -> Result<Blob> {
  let output = Command::new("git")
    .args(["clone", "--quiet", "--depth", "1"])
    .arg(clone_url(clone_base, id))
    .arg(dir)
    .output()
    .await?;
  if !output.status.success() {
    return Err(Error::Clone {
      id:     id.to_string(),
      stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
    });
  }
  read_candidate(dir)
    .await?
    .ok_or_else(|| Error::MissingFile(id.to_string()))
}

/// The first candidate file present in `dir`, if any.
pub(crate) async fn read_candidate(dir: &Path) -> Result<Option<Blob>> {
  for name in CANDIDATE_FILENAMES {
    let path = dir.join(name);
    if !tokio::fs::try_exists(&path).await? {
      continue;
    }
    let content = tokio::fs::read_to_string(&path).await?;
    return Ok(Some(Blob {
      filename: name.to_owned(),
      content,
    }));
  }
  Ok(None)
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::*;

  async fn scratch() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("gallery-test-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    dir
  }

  #[test]
  fn clone_url_appends_git_suffix() {
    let id = BlobId::new("abc123");
    assert_eq!(
      clone_url("https://gist.github.com/", &id),
      "https://gist.github.com/abc123.git"
    );
  }

  #[tokio::test]
  async fn prefers_the_current_filename() {
    let dir = scratch().await;
    tokio::fs::write(dir.join("gallary_data.json"), "{\"old\":1}").await.unwrap();
    tokio::fs::write(dir.join("data.json"), "{\"new\":1}").await.unwrap();

    let blob = read_candidate(&dir).await.unwrap().unwrap();
    assert_eq!(blob.filename, "data.json");
    assert_eq!(blob.content, "{\"new\":1}");
    tokio::fs::remove_dir_all(&dir).await.unwrap();
  }

  #[tokio::test]
  async fn falls_back_to_the_legacy_filename() {
    let dir = scratch().await;
    tokio::fs::write(dir.join("gallary_data.json"), "[]").await.unwrap();

    let blob = read_candidate(&dir).await.unwrap().unwrap();
    assert_eq!(blob.filename, "gallary_data.json");
    tokio::fs::remove_dir_all(&dir).await.unwrap();
  }

  #[tokio::test]
  async fn empty_checkout_has_no_candidate() {
    let dir = scratch().await;
    assert!(read_candidate(&dir).await.unwrap().is_none());
    tokio::fs::remove_dir_all(&dir).await.unwrap();
  }
}
