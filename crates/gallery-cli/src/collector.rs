//! [`ProcessCollector`] runs the external scraper as a child process.
//!
//! The scraper is told which ids to skip through a file of ids, one per
//! line, and writes its results as a timeline export which is then parsed
//! with [`gallery_ingest::feed::parse_export`].

use std::{
  path::{Path, PathBuf},
  process::ExitStatus,
};

use gallery_core::{
  collect::{CollectRequest, Collector, Target},
  gate::Verdict,
  record::Record,
};
use thiserror::Error;
use tokio::process::Command;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CollectorError {
  #[error("collector command is empty")]
  EmptyCommand,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("collector exited with {status}: {stderr}")]
  Exit { status: ExitStatus, stderr: String },

  #[error("collector output {path}: {source}")]
  Output {
    path:   PathBuf,
    #[source]
    source: gallery_ingest::Error,
  },
}

#[derive(Debug, Clone)]
pub struct ProcessCollector {
  program: String,
  args:    Vec<String>,
  output:  PathBuf,
}

impl ProcessCollector {
  /// Split a whitespace-separated command line into program and arguments.
  pub fn from_command_line(
    line: &str,
    output: impl Into<PathBuf>,
  ) -> Result<Self, CollectorError> {
    let mut words = line.split_whitespace().map(str::to_owned);
    let program = words.next().ok_or(CollectorError::EmptyCommand)?;
    Ok(Self {
      program,
      args: words.collect(),
      output: output.into(),
    })
  }

  /// Arguments appended to the configured command for one request.
  fn request_args(request: &CollectRequest, skip_file: &Path) -> Vec<String> {
    let mut args = vec![
      "--skip-ids-file".to_owned(),
      skip_file.display().to_string(),
    ];
    match &request.target {
      Target::User(key) => args.extend(["-u".to_owned(), key.clone()]),
      Target::Hashtag(tag) => args.extend(["--hashtag".to_owned(), tag.clone()]),
      Target::Feed => {}
    }
    args.extend(["-n".to_owned(), request.limit.to_string()]);
    if request.stop_on_known {
      args.push("--stop-on-existing".to_owned());
    }
    args
  }

  async fn run(&self, request: &CollectRequest, skip_file: &Path) -> Result<(), CollectorError> {
    tokio::fs::write(skip_file, request.known_ids.join("\n")).await?;
    let output = Command::new(&self.program)
      .args(&self.args)
      .args(Self::request_args(request, skip_file))
      .output()
      .await?;
    if !output.status.success() {
      return Err(CollectorError::Exit {
        status: output.status,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
      });
    }
    Ok(())
  }
}

/// Re-apply the request's limit and stop rule to what the scraper returned.
fn gate_results(request: &CollectRequest, records: Vec<Record>) -> Vec<Record> {
  let mut gate = request.gate();
  let mut out = Vec::new();
  for record in records {
    if out.len() >= request.limit {
      break;
    }
    match gate.observe(&record.id) {
      Verdict::New => out.push(record),
      Verdict::Known => {}
      Verdict::Stop => break,
    }
  }
  out
}

impl Collector for ProcessCollector {
  type Error = CollectorError;

  async fn collect(&self, request: CollectRequest) -> Result<Vec<Record>, CollectorError> {
    let skip_file = std::env::temp_dir().join(format!("gallery-skip-{}.txt", Uuid::new_v4()));
    tracing::info!(
      target = %request.target,
      limit = request.limit,
      known = request.known_ids.len(),
      program = %self.program,
      "running collector"
    );
    let result = self.run(&request, &skip_file).await;
    if let Err(e) = tokio::fs::remove_file(&skip_file).await {
      tracing::debug!(file = %skip_file.display(), error = %e, "could not remove skip file");
    }
    result?;

    let body = tokio::fs::read_to_string(&self.output).await?;
    let records =
      gallery_ingest::feed::parse_export(&body).map_err(|source| CollectorError::Output {
        path: self.output.clone(),
        source,
      })?;
    Ok(gate_results(&request, records))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rec(id: &str) -> Record { Record::new(id, vec![format!("https://img/{id}")]) }

  #[test]
  fn command_line_is_split_on_whitespace() {
    let c = ProcessCollector::from_command_line("python3  scraper.py --headless", "out.js")
      .unwrap();
    assert_eq!(c.program, "python3");
    assert_eq!(c.args, ["scraper.py", "--headless"]);
    assert!(matches!(
      ProcessCollector::from_command_line("   ", "out.js"),
      Err(CollectorError::EmptyCommand)
    ));
  }

  #[test]
  fn user_request_arguments() {
    let request = CollectRequest::new(Target::User("alice".into()), 50);
    let args = ProcessCollector::request_args(&request, Path::new("/tmp/skip.txt"));
    assert_eq!(
      args,
      [
        "--skip-ids-file",
        "/tmp/skip.txt",
        "-u",
        "alice",
        "-n",
        "50",
        "--stop-on-existing"
      ]
    );
  }

  #[test]
  fn hashtag_request_without_stop() {
    let mut request = CollectRequest::new(Target::Hashtag("art".into()), 10);
    request.stop_on_known = false;
    let args = ProcessCollector::request_args(&request, Path::new("skip"));
    assert!(args.windows(2).any(|w| w == ["--hashtag", "art"]));
    assert!(!args.iter().any(|a| a == "--stop-on-existing"));
  }

  #[test]
  fn results_are_gated_again() {
    let mut request = CollectRequest::new(Target::User("a".into()), 10)
      .with_known_ids(vec!["k1".into(), "k2".into()]);
    request.stop_after = 2;
    let feed = vec![rec("n1"), rec("k1"), rec("k2"), rec("n2")];
    let ids: Vec<_> = gate_results(&request, feed)
      .into_iter()
      .map(|r| r.id)
      .collect();
    assert_eq!(ids, ["n1"]);
  }

  #[test]
  fn results_respect_the_limit() {
    let request = CollectRequest::new(Target::Feed, 2);
    let feed = vec![rec("a"), rec("b"), rec("c")];
    assert_eq!(gate_results(&request, feed).len(), 2);
  }
}
