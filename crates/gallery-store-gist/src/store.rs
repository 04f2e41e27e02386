//! [`GistStore`], the [`BlobStore`] implementation over the GitHub API.

use std::time::Duration;

use gallery_core::store::{
  Blob, BlobId, BlobStore, CANDIDATE_FILENAMES, DEFAULT_FILENAME,
};
use indexmap::IndexMap;
use reqwest::{Client, RequestBuilder, header};
use serde::Deserialize;
use serde_json::json;

use crate::{Error, Result, clone};

/// Connection settings for the gist API.
#[derive(Debug, Clone)]
pub struct GistConfig {
  pub api_base:   String,
  /// Bearer token; anonymous requests can read public gists only.
  pub token:      Option<String>,
  /// Base URL gists are cloned from on the fallback path.
  pub clone_base: String,
  pub timeout:    Duration,
}

impl Default for GistConfig {
  fn default() -> Self {
    Self {
      api_base:   "https://api.github.com".to_owned(),
      token:      None,
      clone_base: "https://gist.github.com".to_owned(),
      timeout:    Duration::from_secs(30),
    }
  }
}

/// Clones share one connection pool through [`reqwest::Client`].
#[derive(Clone)]
pub struct GistStore {
  client: Client,
  config: GistConfig,
}

#[derive(Debug, Deserialize)]
struct GistMeta {
  #[serde(default)]
  files: IndexMap<String, GistFile>,
}

#[derive(Debug, Deserialize)]
struct GistFile {
  raw_url:   Option<String>,
  content:   Option<String>,
  #[serde(default)]
  truncated: bool,
}

#[derive(Debug, Deserialize)]
struct Created {
  id: String,
}

impl GistStore {
  pub fn new(config: GistConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(config.timeout)
      .user_agent(concat!("gallery/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client, config })
  }

  pub fn config(&self) -> &GistConfig { &self.config }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
  }

  fn auth(&self, req: RequestBuilder) -> RequestBuilder {
    let req = req.header(header::ACCEPT, "application/vnd.github+json");
    match &self.config.token {
      Some(token) if !token.is_empty() => req.bearer_auth(token),
      _ => req,
    }
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  /// `GET /gists/{id}`, then the candidate file's content.
  async fn fetch(&self, id: &BlobId) -> Result<Blob> {
    let url = self.url(&format!("/gists/{id}"));
    let resp = self.auth(self.client.get(&url)).send().await?;
    if !resp.status().is_success() {
      return Err(Error::Status {
        method: "GET",
        url,
        status: resp.status(),
      });
    }
    let meta: GistMeta = resp.json().await?;

    for name in CANDIDATE_FILENAMES {
      let Some(file) = meta.files.get(name) else {
        continue;
      };
      if let Some(content) = file.content.as_ref().filter(|_| !file.truncated) {
        return Ok(Blob {
          filename: name.to_owned(),
          content:  content.clone(),
        });
      }
      let Some(raw_url) = &file.raw_url else {
        continue;
      };
      match self.fetch_raw(raw_url).await {
        Ok(content) => {
          return Ok(Blob {
            filename: name.to_owned(),
            content,
          });
        }
        Err(e) => tracing::debug!(%id, file = name, error = %e, "raw download failed"),
      }
    }
    Err(Error::MissingFile(id.to_string()))
  }

  async fn fetch_raw(&self, raw_url: &str) -> Result<String> {
    let resp = self.auth(self.client.get(raw_url)).send().await?;
    if !resp.status().is_success() {
      return Err(Error::Status {
        method: "GET",
        url:    raw_url.to_owned(),
        status: resp.status(),
      });
    }
    Ok(resp.text().await?)
  }

  // ── Writes ────────────────────────────────────────────────────────────────

  /// `POST /gists`
  async fn post(&self, content: String, description: String) -> Result<BlobId> {
    let url = self.url("/gists");
    let body = json!({
      "description": description,
      "public": false,
      "files": { DEFAULT_FILENAME: { "content": content } },
    });
    let resp = self.auth(self.client.post(&url)).json(&body).send().await?;
    if !resp.status().is_success() {
      return Err(Error::Status {
        method: "POST",
        url,
        status: resp.status(),
      });
    }
    let created: Created = resp.json().await?;
    tracing::info!(id = %created.id, %description, "created gist");
    Ok(BlobId::new(created.id))
  }

  /// `PATCH /gists/{id}`
  async fn patch(&self, id: &BlobId, filename: &str, content: String) -> Result<()> {
    let url = self.url(&format!("/gists/{id}"));
    let body = json!({ "files": { filename: { "content": content } } });
    let resp = self.auth(self.client.patch(&url)).json(&body).send().await?;
    if !resp.status().is_success() {
      return Err(Error::Status {
        method: "PATCH",
        url,
        status: resp.status(),
      });
    }
    tracing::debug!(%id, filename, "replaced gist file");
    Ok(())
  }
}

impl BlobStore for GistStore {
  type Error = Error;

  async fn get(&self, id: BlobId) -> Result<Blob> {
    match self.fetch(&id).await {
      Ok(blob) => Ok(blob),
      Err(e) => {
        tracing::warn!(%id, error = %e, "api fetch failed; falling back to git clone");
        clone::fetch(&self.config.clone_base, &id).await
      }
    }
  }

  async fn create(&self, content: String, description: String) -> Result<BlobId> {
    self.post(content, description).await
  }

  async fn replace(&self, id: BlobId, filename: String, content: String) -> Result<()> {
    self.patch(&id, &filename, content).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn store(api_base: &str) -> GistStore {
    GistStore::new(GistConfig {
      api_base: api_base.to_owned(),
      ..GistConfig::default()
    })
    .unwrap()
  }

  #[test]
  fn url_trims_trailing_slash() {
    assert_eq!(
      store("https://api.example.com/").url("/gists/abc"),
      "https://api.example.com/gists/abc"
    );
  }

  #[test]
  fn meta_keeps_file_order_and_defaults() {
    let meta: GistMeta = serde_json::from_str(
      r#"{"id":"x","files":{
        "gallary_data.json":{"raw_url":"https://raw/1"},
        "data.json":{"raw_url":"https://raw/2","content":"{}","truncated":true}
      }}"#,
    )
    .unwrap();
    let names: Vec<_> = meta.files.keys().map(String::as_str).collect();
    assert_eq!(names, ["gallary_data.json", "data.json"]);
    assert!(meta.files["data.json"].truncated);
    assert!(!meta.files["gallary_data.json"].truncated);
    assert!(meta.files["gallary_data.json"].content.is_none());
  }

  #[test]
  fn meta_without_files_is_empty() {
    let meta: GistMeta = serde_json::from_str(r#"{"id":"x"}"#).unwrap();
    assert!(meta.files.is_empty());
  }
}
