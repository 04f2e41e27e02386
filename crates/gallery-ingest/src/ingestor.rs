//! [`Ingestor`] runs every operation that reads or writes the gallery.
//!
//! Each operation is one run: load the directory, plan every change in
//! memory against a [`ShardCache`], then commit. Commit order is fixed:
//!
//! 1. create planned shards, then point the directory at their real ids;
//! 2. replace shards holding merged records;
//! 3. replace shards that only lost a promoted key (failures are logged
//!    and skipped);
//! 4. replace the directory, once, and only if it changed.
//!
//! A failure in steps 1, 2 or 4 aborts the run. Every write is a full
//! replace, so rerunning after an abort is safe.

use std::collections::HashSet;

use gallery_core::{
  collect::{CollectRequest, Collector, Target},
  directory::Directory,
  gate::{DEFAULT_STOP_AFTER, known_ids},
  merge::{InsertionPolicy, merge_with},
  owner::{Namespace, group_by_owner, is_unknown},
  record::{Provenance, Record},
  resolver::{Resolution, resolve},
  shard::DEFAULT_CAPACITY,
  store::{BlobId, BlobStore},
};
use serde_json::Value;

use crate::{
  Error, Result,
  cache::{Dirty, ShardCache, ShardWrite},
  promotion::PromotionController,
  report::{Finding, OwnerReport, RestoreReport, RunReport, SlimReport},
};

/// Collector scan depth when none is configured.
pub const DEFAULT_LIMIT: usize = 100;

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IngestConfig {
  /// Maximum records per shard.
  pub capacity:      usize,
  pub policy:        InsertionPolicy,
  /// Allow writing a mapped key whose shard shows no records for it.
  pub force_empty:   bool,
  /// Shard to place unmapped keys in, ahead of the fallback choice.
  pub promote_to:    Option<BlobId>,
  pub limit:         usize,
  pub stop_on_known: bool,
  pub stop_after:    usize,
  /// Plan everything, write nothing.
  pub dry_run:       bool,
}

impl Default for IngestConfig {
  fn default() -> Self {
    Self {
      capacity:      DEFAULT_CAPACITY,
      policy:        InsertionPolicy::default(),
      force_empty:   false,
      promote_to:    None,
      limit:         DEFAULT_LIMIT,
      stop_on_known: true,
      stop_after:    DEFAULT_STOP_AFTER,
      dry_run:       false,
    }
  }
}

// ─── Run state ───────────────────────────────────────────────────────────────

struct Run {
  /// The directory as loaded, to tell whether it needs writing.
  loaded:         Directory,
  directory:      Directory,
  directory_file: String,
  cache:          ShardCache,
  report:         RunReport,
}

impl Run {
  fn directory_changed(&self) -> bool { self.directory != self.loaded }
}

/// A key resolved and its current records read, before any merge.
struct Prepared {
  resolution: Resolution,
  existing:   Vec<Record>,
}

// ─── Ingestor ────────────────────────────────────────────────────────────────

pub struct Ingestor<S> {
  store:        S,
  directory_id: BlobId,
  config:       IngestConfig,
  controller:   PromotionController,
}

impl<S: BlobStore> Ingestor<S> {
  pub fn new(store: S, directory_id: BlobId, config: IngestConfig) -> Self {
    let controller = PromotionController::new(config.capacity);
    Self {
      store,
      directory_id,
      config,
      controller,
    }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn config(&self) -> &IngestConfig { &self.config }

  /// Fetch and parse the master directory, with the file it was read from.
  pub async fn load_directory(&self) -> Result<(Directory, String)> {
    let blob = self
      .store
      .get(self.directory_id.clone())
      .await
      .map_err(Error::transport)?;
    let directory = Directory::parse(&blob.content)?;
    Ok((directory, blob.filename))
  }

  async fn open(&self) -> Result<Run> {
    let (directory, directory_file) = self.load_directory().await?;
    tracing::debug!(
      directory = %self.directory_id,
      users = directory.mapping(Namespace::User).len(),
      characters = directory.mapping(Namespace::Character).len(),
      loose = directory.loose().len(),
      "loaded directory"
    );
    Ok(Run {
      loaded: directory.clone(),
      directory,
      directory_file,
      cache: ShardCache::new(),
      report: RunReport::new(self.config.dry_run),
    })
  }

  fn request(&self, target: Target, known: Vec<String>) -> CollectRequest {
    CollectRequest {
      target,
      limit: self.config.limit,
      known_ids: known,
      stop_on_known: self.config.stop_on_known,
      stop_after: self.config.stop_after,
    }
  }

  // ── Operations ────────────────────────────────────────────────────────────

  /// Collect new records for `target` and merge them in.
  ///
  /// A user target runs the single-key pipeline with the collector between
  /// the read and the merge. Hashtag and feed targets collect across
  /// owners, skipping every id the directory already knows, and are then
  /// merged as a batch.
  pub async fn append<C: Collector>(
    &self,
    collector: &C,
    target: Target,
  ) -> Result<RunReport> {
    let mut run = self.open().await?;
    tracing::info!(%target, directory = %self.directory_id, "append run");

    match target.owner_key().map(str::to_owned) {
      Some(key) => {
        let prepared = self.prepare(&mut run, Namespace::User, &key, true).await?;
        let request = self.request(target, known_ids(&prepared.existing));
        let collected = collector.collect(request).await.map_err(Error::collector)?;
        tracing::info!(key = %key, collected = collected.len(), "collector finished");
        self.settle(&mut run, Namespace::User, &key, prepared, collected)?;
      }
      None => {
        let request = self.request(target, run.directory.known_ids());
        let collected = collector.collect(request).await.map_err(Error::collector)?;
        tracing::info!(collected = collected.len(), "collector finished");
        self.plan_batch(&mut run, collected).await?;
      }
    }
    self.commit(run).await
  }

  /// Merge records of mixed ownership in one run.
  ///
  /// Records are grouped by derived owner and each key goes through its own
  /// pipeline. Records of unknown owner join the directory's loose list.
  pub async fn ingest_batch(&self, records: Vec<Record>) -> Result<RunReport> {
    let mut run = self.open().await?;
    tracing::info!(records = records.len(), "batch run");
    self.plan_batch(&mut run, records).await?;
    self.commit(run).await
  }

  /// Group records whose text mentions `label` under the character key
  /// `label`, tagged as text matches.
  ///
  /// Every distinct shard in the user mapping is scanned once, reading only
  /// the keys the mapping points there. Gathered records keep the account
  /// they came from. Shards that cannot be read are skipped.
  pub async fn gather_character(&self, label: &str) -> Result<RunReport> {
    let mut run = self.open().await?;
    let prepared = self
      .prepare(&mut run, Namespace::Character, label, false)
      .await?;
    let mut seen: HashSet<String> =
      prepared.existing.iter().map(|r| r.id.clone()).collect();

    let shards: Vec<BlobId> = run
      .directory
      .distinct_shards(Namespace::User)
      .into_iter()
      .cloned()
      .collect();
    tracing::info!(label, shards = shards.len(), "scanning user shards");

    let mut found = Vec::new();
    for id in &shards {
      let shard = match run.cache.load(&self.store, id, None).await {
        Ok(shard) => shard,
        Err(e @ (Error::Transport(_) | Error::Core(_))) => {
          tracing::warn!(shard = %id, error = %e, "skipping unreadable shard");
          run.report.skipped_shards.push(id.clone());
          continue;
        }
        Err(e) => return Err(e),
      };
      for owner in run.directory.owners_of(Namespace::User, id) {
        for record in shard.records(owner) {
          let mentions = record.full_text.as_deref().is_some_and(|t| t.contains(label));
          if !mentions || !seen.insert(record.id.clone()) {
            continue;
          }
          let mut record = record.clone().tagged_if_untagged(Provenance::Text);
          if record.owner.is_none() {
            record = record.with_owner(owner);
          }
          found.push(record);
        }
      }
    }
    tracing::info!(label, matched = found.len(), "text matches");

    self.settle(&mut run, Namespace::Character, label, prepared, found)?;
    self.commit(run).await
  }

  /// Rebuild the user mapping from `shards`.
  ///
  /// Every key found is mapped to the shard it was found in, later shards
  /// winning, and gets a representative from its newest record.
  /// Representatives of keys no shard holds become loose records.
  pub async fn restore_mapping(&self, shards: &[BlobId]) -> Result<RestoreReport> {
    let mut run = self.open().await?;
    run.directory.clear_users();

    let mut skipped_shards = Vec::new();
    for id in shards {
      let shard = match run.cache.load(&self.store, id, None).await {
        Ok(shard) => shard,
        Err(e @ (Error::Transport(_) | Error::Core(_))) => {
          tracing::warn!(shard = %id, error = %e, "skipping unreadable shard");
          skipped_shards.push(id.clone());
          continue;
        }
        Err(e) => return Err(e),
      };
      for (key, records) in shard.owners() {
        let Some(newest) = records.first() else { continue };
        if is_unknown(key) {
          continue;
        }
        run.directory.set_mapping(Namespace::User, key, id.clone());
        run.directory.set_representative(key, newest.representative(key));
      }
    }

    let mapped = run.directory.mapping(Namespace::User).len();
    let demoted = run.directory.demote_unmapped_representatives();
    tracing::info!(mapped, demoted, skipped = skipped_shards.len(), "mapping rebuilt");

    let report = self.commit(run).await?;
    Ok(RestoreReport {
      mapped,
      demoted,
      skipped_shards,
      directory_written: report.directory_written,
    })
  }

  /// Rewrite the directory in canonical slim form.
  pub async fn slim_directory(&self) -> Result<SlimReport> {
    let blob = self
      .store
      .get(self.directory_id.clone())
      .await
      .map_err(Error::transport)?;
    let raw: Value = serde_json::from_str(&blob.content)?;
    let directory = Directory::from_value(&raw)?;
    let slim = directory.to_value()?;

    let entries = |v: &Value| v.get("tweets").and_then(Value::as_array).cloned();
    let before = entries(&raw).unwrap_or_default();
    let after = entries(&slim).unwrap_or_default();
    let slimmed = after.iter().filter(|entry| !before.contains(entry)).count();

    let mut report = SlimReport {
      before: before.len(),
      after: after.len(),
      slimmed,
      directory_written: false,
    };
    if raw == slim || self.config.dry_run {
      return Ok(report);
    }

    self
      .store
      .replace(
        self.directory_id.clone(),
        blob.filename,
        serde_json::to_string_pretty(&slim)?,
      )
      .await
      .map_err(Error::transport)?;
    tracing::info!(slimmed, "directory rewritten");
    report.directory_written = true;
    Ok(report)
  }

  /// Check the directory against itself and against every shard it maps.
  /// Nothing is written.
  pub async fn audit(&self) -> Result<Vec<Finding>> {
    let (directory, _) = self.load_directory().await?;
    let mut findings: Vec<Finding> =
      directory.check().into_iter().map(Finding::Directory).collect();
    let mut cache = ShardCache::new();
    let mut unreadable: HashSet<BlobId> = HashSet::new();

    for ns in [Namespace::User, Namespace::Character] {
      for (key, id) in directory.mapping(ns) {
        if unreadable.contains(id) {
          continue;
        }
        let shard = match cache.load(&self.store, id, Some(key.as_str())).await {
          Ok(shard) => shard,
          Err(e @ (Error::Transport(_) | Error::Core(_))) => {
            findings.push(Finding::Unreadable {
              shard: id.clone(),
              error: e.to_string(),
            });
            unreadable.insert(id.clone());
            continue;
          }
          Err(e) => return Err(e),
        };

        if !shard.contains_owner(key) {
          findings.push(Finding::MissingFromShard {
            namespace: ns,
            key:       key.clone(),
            shard:     id.clone(),
          });
          continue;
        }
        if ns == Namespace::User
          && let Some(rep) = directory.representative(key)
        {
          let held = shard.records(key).iter().any(|r| {
            r.id == rep.id
              && rep.media_url().is_none_or(|m| r.media_urls.iter().any(|u| u == m))
          });
          if !held {
            findings.push(Finding::StaleRepresentative {
              key:   key.clone(),
              shard: id.clone(),
              id:    rep.id.clone(),
            });
          }
        }
      }
    }

    for (id, shard) in cache.shards() {
      if shard.total() > self.config.capacity {
        findings.push(Finding::OverCapacity {
          shard:    id.clone(),
          total:    shard.total(),
          capacity: self.config.capacity,
        });
      }
    }
    Ok(findings)
  }

  // ── Planning ──────────────────────────────────────────────────────────────

  /// Resolve `key` and read its current records.
  ///
  /// With `guard` set, a mapped key whose shard holds nothing for it stops
  /// the run unless `force_empty` is configured.
  async fn prepare(
    &self,
    run: &mut Run,
    ns: Namespace,
    key: &str,
    guard: bool,
  ) -> Result<Prepared> {
    let resolution = resolve(ns, key, &run.directory, self.config.promote_to.as_ref());
    let existing = match resolution.shard() {
      Some(id) => {
        let context = resolution.is_mapped().then_some(key);
        run
          .cache
          .load(&self.store, id, context)
          .await?
          .records(key)
          .to_vec()
      }
      None => Vec::new(),
    };
    tracing::debug!(key, ?ns, ?resolution, existing = existing.len(), "resolved");

    if guard && resolution.is_mapped() && existing.is_empty() {
      if !self.config.force_empty {
        return Err(Error::EmptyHistory {
          key: key.to_owned(),
        });
      }
      tracing::warn!(key, "mapped key has no records; continuing (force-empty)");
    }
    Ok(Prepared {
      resolution,
      existing,
    })
  }

  /// Merge `incoming` into the prepared key and place the result.
  fn settle(
    &self,
    run: &mut Run,
    ns: Namespace,
    key: &str,
    prepared: Prepared,
    mut incoming: Vec<Record>,
  ) -> Result<()> {
    let Prepared {
      resolution,
      existing,
    } = prepared;

    let loose = match ns {
      Namespace::User => run.directory.loose_owned_by(key),
      Namespace::Character => Vec::new(),
    };
    let claims_loose = !loose.is_empty();
    incoming.extend(loose);

    let before = existing.len();
    let merged = merge_with(existing, incoming, self.config.policy);
    let mut report = OwnerReport {
      namespace: ns,
      key: key.to_owned(),
      existing: before,
      added: merged.added,
      placement: None,
    };

    let Some(latest) = merged.latest().filter(|_| !merged.is_noop()).cloned() else {
      tracing::info!(key, existing = before, "nothing new");
      run.report.owners.push(report);
      return Ok(());
    };
    if claims_loose {
      run.directory.take_loose_owned_by(key);
    }

    let added = merged.added;
    let placement =
      self
        .controller
        .apply(&mut run.cache, ns, key, merged.records, resolution.shard())?;
    run
      .directory
      .record_move(ns, key, placement.shard().clone(), &latest);
    tracing::info!(key, added, ?placement, "merged");

    report.placement = Some(placement);
    run.report.owners.push(report);
    Ok(())
  }

  async fn plan_batch(&self, run: &mut Run, records: Vec<Record>) -> Result<()> {
    for (key, records) in group_by_owner(records) {
      if is_unknown(&key) {
        let added = run.directory.merge_loose(records, self.config.policy);
        run.report.loose_added += added;
        continue;
      }
      let prepared = self.prepare(run, Namespace::User, &key, true).await?;
      self.settle(run, Namespace::User, &key, prepared, records)?;
    }
    Ok(())
  }

  // ── Commit ────────────────────────────────────────────────────────────────

  async fn commit(&self, mut run: Run) -> Result<RunReport> {
    let writes = run.cache.writes(self.controller.capacity())?;
    if self.config.dry_run {
      tracing::info!(
        shard_writes = writes.len(),
        directory = run.directory_changed(),
        "dry run, nothing written"
      );
      return Ok(run.report);
    }

    let (creates, replaces): (Vec<ShardWrite>, Vec<ShardWrite>) =
      writes.into_iter().partition(ShardWrite::is_create);
    let (required, advisory): (Vec<ShardWrite>, Vec<ShardWrite>) = replaces
      .into_iter()
      .partition(|w| w.dirty == Dirty::Required);

    for write in creates {
      let id = self
        .store
        .create(write.content, write.description)
        .await
        .map_err(Error::transport)?;
      tracing::info!(shard = %id, "created shard");
      run.directory.rename_shard(&write.id, &id);
      run.report.rename(&write.id, &id);
      run.cache.settle(&write.id, id.clone());
      run.report.created.push(id);
    }

    for write in required {
      self
        .store
        .replace(write.id.clone(), write.filename, write.content)
        .await
        .map_err(Error::transport)?;
      tracing::debug!(shard = %write.id, "replaced shard");
      run.report.replaced.push(write.id);
    }

    for write in advisory {
      match self
        .store
        .replace(write.id.clone(), write.filename, write.content)
        .await
      {
        Ok(()) => run.report.replaced.push(write.id),
        Err(e) => {
          tracing::warn!(
            shard = %write.id,
            error = %e,
            "cleanup write failed, promoted records remain duplicated there"
          );
          run.report.skipped_cleanups.push(write.id);
        }
      }
    }

    if run.directory_changed() {
      let body = run.directory.to_wire_string()?;
      self
        .store
        .replace(self.directory_id.clone(), run.directory_file.clone(), body)
        .await
        .map_err(Error::transport)?;
      run.report.directory_written = true;
    }

    tracing::info!(
      added = run.report.added(),
      created = run.report.created.len(),
      replaced = run.report.replaced.len(),
      skipped_cleanups = run.report.skipped_cleanups.len(),
      directory_written = run.report.directory_written,
      "run committed"
    );
    Ok(run.report)
  }
}
