//! Consecutive-match scan gate.
//!
//! A collector walks a feed newest-first. Once it has seen
//! [`DEFAULT_STOP_AFTER`] already-known ids back to back, in the same order
//! they hold in the stored list, it has reached history that was ingested
//! before and can stop. The gate is only advisory: the merge downstream is
//! what guarantees no duplicates are stored.

use std::collections::HashMap;

use crate::record::Record;

/// Historical run length that stops a scan.
pub const DEFAULT_STOP_AFTER: usize = 5;

/// What the gate says about one observed id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  /// Not in the known list.
  New,
  /// Known; the scan should skip it and carry on.
  Known,
  /// Known, and the consecutive run reached the threshold. Every later
  /// observation also returns `Stop`.
  Stop,
}

#[derive(Debug, Clone)]
pub struct ScanGate {
  /// Position of each known id in the stored (newest-first) list.
  positions: HashMap<String, usize>,
  threshold: usize,
  run:       usize,
  last:      Option<usize>,
  stopped:   bool,
}

impl ScanGate {
  /// A gate over `known`, ordered newest first as stored in the shard.
  /// Repeated ids keep their first position.
  pub fn new<I, S>(known: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut positions: HashMap<String, usize> = HashMap::new();
    for (pos, id) in known.into_iter().map(Into::<String>::into).enumerate() {
      positions.entry(id).or_insert(pos);
    }
    Self {
      positions,
      threshold: DEFAULT_STOP_AFTER,
      run: 0,
      last: None,
      stopped: false,
    }
  }

  /// Stop after `threshold` consecutive matches; `0` never stops.
  pub fn with_threshold(mut self, threshold: usize) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn is_known(&self, id: &str) -> bool { self.positions.contains_key(id) }

  /// Current consecutive-match run length.
  pub fn run_length(&self) -> usize { self.run }

  pub fn is_stopped(&self) -> bool { self.stopped }

  /// Feed the next observed id.
  ///
  /// A known id extends the run only when it sits immediately after the
  /// previous match in the stored list; otherwise it starts a new run of
  /// one. A new id resets the run to zero.
  pub fn observe(&mut self, id: &str) -> Verdict {
    if self.stopped {
      return Verdict::Stop;
    }
    let Some(&pos) = self.positions.get(id) else {
      self.run = 0;
      self.last = None;
      return Verdict::New;
    };

    self.run = match self.last {
      Some(last) if pos == last + 1 => self.run + 1,
      _ => 1,
    };
    self.last = Some(pos);

    if self.threshold > 0 && self.run >= self.threshold {
      self.stopped = true;
      Verdict::Stop
    } else {
      Verdict::Known
    }
  }

  /// Run a whole stream through the gate, returning the new ids seen before
  /// it stopped.
  pub fn admit<'a>(&mut self, stream: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    let mut admitted = Vec::new();
    for id in stream {
      match self.observe(id) {
        Verdict::New => admitted.push(id),
        Verdict::Known => {}
        Verdict::Stop => break,
      }
    }
    admitted
  }
}

/// Ordered, de-duplicated ids of `records`: the skip-list handed to a
/// collector.
pub fn known_ids(records: &[Record]) -> Vec<String> {
  let mut seen = std::collections::HashSet::new();
  records
    .iter()
    .filter(|r| !r.id.is_empty() && seen.insert(r.id.as_str()))
    .map(|r| r.id.clone())
    .collect()
}
