use std::fs::File;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use ventifact_core::config::{parse_iso8601_duration, Config};
use ventifact_core::errors::StoreError;
use ventifact_core::model::TestRun;
use ventifact_core::storage::store::Store;

use super::args::{Cli, Command, IngestArgs, MaintainArgs, RecentArgs};

pub fn dispatch(cli: Cli, cfg: Config) -> Result<i32> {
    let db = cli
        .db
        .unwrap_or_else(|| PathBuf::from(&cfg.database_url));
    let store = Store::open(&db).with_context(|| format!("failed to open {}", db.display()))?;
    store.init_schema()?;

    match cli.cmd {
        Command::Ingest(args) => ingest(&store, args),
        Command::Maintain(args) => maintain(&store, &cfg, args),
        Command::Recent(args) => recent(&store, args),
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&store.stats_best_effort())?);
            Ok(0)
        }
    }
}

fn ingest(store: &Store, args: IngestArgs) -> Result<i32> {
    let file = File::open(&args.file)
        .with_context(|| format!("failed to open {}", args.file.display()))?;
    let runs: Vec<TestRun> = serde_json::from_reader(file)
        .with_context(|| format!("failed to parse {}", args.file.display()))?;

    let mut inserted = 0usize;
    let mut skipped = 0usize;
    for run in &runs {
        if store
            .insert_test_run(run)
            .with_context(|| format!("failed to ingest run {}", run.id))?
        {
            inserted += 1;
        } else {
            skipped += 1;
        }
    }

    println!("ingested {inserted} runs ({skipped} already present)");
    Ok(0)
}

fn maintain(store: &Store, cfg: &Config, args: MaintainArgs) -> Result<i32> {
    let run_lifetime = match &args.test_run_lifetime {
        Some(raw) => parse_iso8601_duration(raw).context("--test-run-lifetime")?,
        None => cfg.test_run_lifetime,
    };
    let pr_lifetime = match &args.pr_lifetime {
        Some(raw) => parse_iso8601_duration(raw).context("--pr-lifetime")?,
        None => cfg.merged_pr_lifetime,
    };

    let now = Utc::now();
    let run_cutoff = now - run_lifetime;
    let pr_cutoff = now - pr_lifetime;

    let runs_purged = with_retries(3, || store.purge_runs_before(run_cutoff))?;
    let prs_purged = with_retries(3, || store.purge_merged_prs_before(pr_cutoff))?;
    let watermark = store.flake_watermark(run_cutoff)?;
    let flakes_marked = with_retries(3, || store.mark_flakes_since(watermark))?;

    println!(
        "purged {runs_purged} test runs and {prs_purged} merged prs, marked {flakes_marked} flakes"
    );
    Ok(0)
}

fn recent(store: &Store, args: RecentArgs) -> Result<i32> {
    let since = args
        .since
        .as_deref()
        .map(|raw| -> Result<DateTime<Utc>> {
            Ok(DateTime::parse_from_rfc3339(raw)
                .context("--since must be RFC 3339")?
                .with_timezone(&Utc))
        })
        .transpose()?;

    if args.flakes {
        for flake in store.fetch_recent_test_flakes(args.count, since)? {
            println!("{}", serde_json::to_string(&flake)?);
        }
    } else {
        for run in store.fetch_recent_test_runs(args.count, since)? {
            println!("{}", serde_json::to_string(&run)?);
        }
    }
    Ok(0)
}

fn with_retries<T>(
    attempts: u32,
    mut op: impl FnMut() -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let mut delay = StdDuration::from_millis(200);
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(event = "transient_retry", attempt, error = %e);
                std::thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}
