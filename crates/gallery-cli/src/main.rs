//! `gallery`: maintenance tool for the sharded media gallery.
//!
//! # Usage
//!
//! ```
//! gallery --directory <id> append --user alice
//! gallery append --hashtag art --limit 300 --dry-run
//! gallery merge --file data/tweets.json
//! gallery character --label Hero --label Villain
//! gallery restore-mapping <shard id>...
//! gallery check
//! ```

mod collector;

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, bail};
use clap::{ArgGroup, Args, Parser, Subcommand};
use collector::ProcessCollector;
use gallery_core::{
  collect::Target,
  gate::DEFAULT_STOP_AFTER,
  merge::InsertionPolicy,
  shard::DEFAULT_CAPACITY,
  store::BlobId,
};
use gallery_ingest::{
  DEFAULT_LIMIT, IngestConfig, Ingestor,
  promotion::Placement,
  report::{RestoreReport, RunReport, SlimReport},
};
use gallery_store_gist::{GistConfig, GistStore};
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gallery", version, about = "Sharded media gallery maintenance")]
struct Cli {
  /// Path to a TOML config file.
  #[arg(short, long, value_name = "FILE", default_value = "gallery.toml")]
  config: PathBuf,

  /// Master directory id (overrides `directory_id`).
  #[arg(long, global = true)]
  directory: Option<String>,

  /// API token (overrides `token`).
  #[arg(long, env = "GH_TOKEN", hide_env_values = true, global = true)]
  token: Option<String>,

  #[command(flatten)]
  run: RunArgs,

  #[command(subcommand)]
  command: Command,
}

#[derive(Args, Debug)]
struct RunArgs {
  /// Write a mapped key even when its shard shows no records for it.
  #[arg(long, global = true)]
  force_empty: bool,

  /// Shard to place new keys in instead of the most recent one.
  #[arg(long, value_name = "SHARD", global = true)]
  promote_to: Option<String>,

  /// Maximum number of posts the collector returns.
  #[arg(short = 'n', long, global = true)]
  limit: Option<usize>,

  /// Keep scanning past already-stored posts.
  #[arg(long, global = true)]
  no_stop: bool,

  /// Put only the first new post at the head and the rest at the tail.
  #[arg(long, global = true)]
  first_to_front: bool,

  /// Plan the run and log it without writing anything.
  #[arg(long, global = true)]
  dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Collect new posts and merge them.
  #[command(group(ArgGroup::new("target").args(["user", "hashtag", "feed"]).required(true)))]
  Append {
    #[arg(short, long)]
    user:    Option<String>,
    #[arg(long)]
    hashtag: Option<String>,
    /// The signed-in account's home feed.
    #[arg(long)]
    feed:    bool,
  },
  /// Merge a local file of posts of mixed ownership.
  Merge {
    #[arg(short, long)]
    file: PathBuf,
  },
  /// Gather posts mentioning a character into its own gallery.
  Character {
    #[arg(short, long, required = true)]
    label: Vec<String>,
  },
  /// Rebuild the user mapping from a list of shards.
  RestoreMapping {
    #[arg(required = true, value_name = "SHARD")]
    shards: Vec<String>,
  },
  /// Rewrite the directory in its slim form.
  Slim,
  /// Report inconsistencies without writing anything.
  Check,
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Settings read from the config file and `GALLERY_*` variables.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct Settings {
  directory_id:      Option<String>,
  api_base:          String,
  token:             Option<String>,
  clone_base:        String,
  capacity:          usize,
  stop_after:        usize,
  limit:             usize,
  collector_command: Option<String>,
  collector_output:  PathBuf,
  timeout_secs:      u64,
}

impl Default for Settings {
  fn default() -> Self {
    let gist = GistConfig::default();
    Self {
      directory_id:      None,
      api_base:          gist.api_base,
      token:             None,
      clone_base:        gist.clone_base,
      capacity:          DEFAULT_CAPACITY,
      stop_after:        DEFAULT_STOP_AFTER,
      limit:             DEFAULT_LIMIT,
      collector_command: None,
      collector_output:  PathBuf::from("data/tweets.js"),
      timeout_secs:      gist.timeout.as_secs(),
    }
  }
}

fn load_settings(path: PathBuf) -> Result<Settings> {
  config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(config::Environment::with_prefix("GALLERY"))
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise settings")
}

fn ingest_config(settings: &Settings, run: &RunArgs) -> IngestConfig {
  IngestConfig {
    capacity: settings.capacity,
    policy: if run.first_to_front {
      InsertionPolicy::FirstToFront
    } else {
      InsertionPolicy::Prepend
    },
    force_empty: run.force_empty,
    promote_to: run.promote_to.clone().map(BlobId::new),
    limit: run.limit.unwrap_or(settings.limit),
    stop_on_known: !run.no_stop,
    stop_after: settings.stop_after,
    dry_run: run.dry_run,
  }
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let settings = load_settings(cli.config.clone())?;

  let directory = cli
    .directory
    .clone()
    .or_else(|| settings.directory_id.clone())
    .context("no directory id: pass --directory or set directory_id")?;

  let store = GistStore::new(GistConfig {
    api_base:   settings.api_base.clone(),
    token:      cli.token.clone().or_else(|| settings.token.clone()),
    clone_base: settings.clone_base.clone(),
    timeout:    Duration::from_secs(settings.timeout_secs),
  })
  .context("failed to build gist client")?;

  let ingestor = Ingestor::new(
    store,
    BlobId::new(directory),
    ingest_config(&settings, &cli.run),
  );

  match cli.command {
    Command::Append {
      user,
      hashtag,
      feed: _,
    } => {
      let target = match (user, hashtag) {
        (Some(user), _) => Target::User(user.trim_start_matches('@').to_owned()),
        (None, Some(tag)) => Target::Hashtag(tag.trim_start_matches('#').to_owned()),
        (None, None) => Target::Feed,
      };
      let command = settings
        .collector_command
        .as_deref()
        .context("no collector configured: set collector_command")?;
      let collector =
        ProcessCollector::from_command_line(command, settings.collector_output.clone())
          .context("invalid collector_command")?;
      let report = ingestor
        .append(&collector, target.clone())
        .await
        .with_context(|| format!("append for {target} failed"))?;
      print_run(&report);
    }
    Command::Merge { file } => {
      let body = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
      let records = gallery_ingest::feed::parse_feed(&body)
        .with_context(|| format!("parsing {}", file.display()))?;
      let report = ingestor.ingest_batch(records).await.context("merge failed")?;
      print_run(&report);
    }
    Command::Character { label } => {
      for label in label {
        let report = ingestor
          .gather_character(&label)
          .await
          .with_context(|| format!("gathering {label:?} failed"))?;
        print_run(&report);
      }
    }
    Command::RestoreMapping { shards } => {
      let shards: Vec<BlobId> = shards.into_iter().map(BlobId::new).collect();
      let report = ingestor
        .restore_mapping(&shards)
        .await
        .context("restoring the mapping failed")?;
      print_restore(&report);
    }
    Command::Slim => {
      let report = ingestor.slim_directory().await.context("slimming failed")?;
      print_slim(&report);
    }
    Command::Check => {
      let findings = ingestor.audit().await.context("check failed")?;
      for finding in &findings {
        println!("{finding}");
      }
      if !findings.is_empty() {
        bail!("{} problem(s) found", findings.len());
      }
      println!("no problems found");
    }
  }

  Ok(())
}

// ─── Output ───────────────────────────────────────────────────────────────────

fn print_run(report: &RunReport) {
  for owner in &report.owners {
    let placement = match &owner.placement {
      None => "unchanged".to_owned(),
      Some(Placement::Created(id)) => format!("new shard {id}"),
      Some(Placement::InPlace(id)) => format!("shard {id}"),
      Some(Placement::Promoted { from, to, .. }) => format!("moved {from} → {to}"),
    };
    println!(
      "{:?} {}: {} existing, {} added, {placement}",
      owner.namespace, owner.key, owner.existing, owner.added
    );
  }
  if report.loose_added > 0 {
    println!("{} loose record(s) added to the directory", report.loose_added);
  }
  for id in &report.skipped_cleanups {
    println!("cleanup of shard {id} failed and was skipped");
  }
  for id in &report.skipped_shards {
    println!("shard {id} could not be read and was skipped");
  }
  if report.dry_run {
    println!("dry run: nothing written");
  } else if report.is_noop() {
    println!("nothing new");
  } else {
    println!(
      "{} added, {} shard(s) created, {} replaced, directory {}",
      report.added(),
      report.created.len(),
      report.replaced.len(),
      if report.directory_written { "updated" } else { "unchanged" },
    );
  }
}

fn print_restore(report: &RestoreReport) {
  println!(
    "{} key(s) mapped, {} representative(s) kept as loose records",
    report.mapped, report.demoted
  );
  for id in &report.skipped_shards {
    println!("shard {id} could not be read and was skipped");
  }
  if !report.directory_written {
    println!("directory not written");
  }
}

fn print_slim(report: &SlimReport) {
  println!(
    "{} → {} entries, {} slimmed, directory {}",
    report.before,
    report.after,
    report.slimmed,
    if report.directory_written { "updated" } else { "unchanged" },
  );
}
