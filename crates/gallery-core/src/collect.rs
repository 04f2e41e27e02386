//! The `Collector` trait — the external source of new records.
//!
//! A collector scans a feed newest-first and returns the records it has not
//! been told to skip. How it reaches the feed is its own business; the
//! engine only hands it the ids already stored and consumes the result.

use std::{fmt, future::Future};

use crate::{
  gate::{DEFAULT_STOP_AFTER, ScanGate},
  record::Record,
};

/// What to scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
  /// One account's posts.
  User(String),
  /// Posts carrying a hashtag, across accounts.
  Hashtag(String),
  /// The signed-in account's home feed.
  Feed,
}

impl Target {
  /// The owner key the results belong to, when the target names one.
  pub fn owner_key(&self) -> Option<&str> {
    match self {
      Self::User(key) => Some(key),
      Self::Hashtag(_) | Self::Feed => None,
    }
  }
}

impl fmt::Display for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::User(key) => write!(f, "@{key}"),
      Self::Hashtag(tag) => write!(f, "#{tag}"),
      Self::Feed => f.write_str("home feed"),
    }
  }
}

/// One collection request.
#[derive(Debug, Clone)]
pub struct CollectRequest {
  pub target:        Target,
  /// Upper bound on returned records.
  pub limit:         usize,
  /// Ids already stored for the target, newest first.
  pub known_ids:     Vec<String>,
  /// Stop the scan once it runs into stored history.
  pub stop_on_known: bool,
  /// Length of the consecutive known run that ends a scan.
  pub stop_after:    usize,
}

impl CollectRequest {
  pub fn new(target: Target, limit: usize) -> Self {
    Self {
      target,
      limit,
      known_ids: Vec::new(),
      stop_on_known: true,
      stop_after: DEFAULT_STOP_AFTER,
    }
  }

  pub fn with_known_ids(mut self, ids: Vec<String>) -> Self {
    self.known_ids = ids;
    self
  }

  /// The gate a collector should run its scan through.
  pub fn gate(&self) -> ScanGate {
    let threshold = if self.stop_on_known { self.stop_after } else { 0 };
    ScanGate::new(self.known_ids.iter().cloned()).with_threshold(threshold)
  }
}

/// Abstraction over the external collector.
pub trait Collector: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Scan `request.target` and return new records, newest first.
  fn collect(
    &self,
    request: CollectRequest,
  ) -> impl Future<Output = Result<Vec<Record>, Self::Error>> + Send + '_;
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::gate::Verdict;

  #[test]
  fn gate_follows_request_flags() {
    let ids: Vec<String> = ["a", "b"].map(String::from).to_vec();
    let mut req = CollectRequest::new(Target::User("alice".into()), 50)
      .with_known_ids(ids);
    req.stop_after = 2;

    let mut gate = req.gate();
    gate.observe("a");
    assert_eq!(gate.observe("b"), Verdict::Stop);

    req.stop_on_known = false;
    let mut gate = req.gate();
    gate.observe("a");
    assert_eq!(gate.observe("b"), Verdict::Known);
  }

  #[test]
  fn targets_display_and_name_owners() {
    assert_eq!(Target::User("alice".into()).to_string(), "@alice");
    assert_eq!(Target::Hashtag("art".into()).to_string(), "#art");
    assert_eq!(Target::Feed.owner_key(), None);
  }
}
