// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Dashstore CLI
//!
//! Command-line access to a dashstore snapshot: ingest test reports,
//! resolve filtered run lists, build performance digests and rollups.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use dashstore_core::entity::TestEntity;
use dashstore_core::{DashConfig, SortDirection};
use dashstore_ingest::{CommitLedger, IngestOutcome, Ingestor, TestReport};
use dashstore_query::Resolver;
use dashstore_storage::{MemoryStore, NoopTaskSink, QueueTaskSink, TaskSink, TransactionRunner};
use dashstore_stats::{
    Comparison, Digest, DigestStatistic, PerformanceLoader, PerformanceSummary, SplitKey,
    SummaryQuery, SummaryRollup,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const MICROS_PER_DAY: i64 = 86_400 * 1_000_000;

#[derive(Parser)]
#[command(name = "dashstore")]
#[command(about = "Dashboard data layer over a snapshot file", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Snapshot file (overrides config file)
    #[arg(short, long, env = "DASHSTORE_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Output as JSON (machine-readable)
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a JSON test report
    Ingest {
        /// Report file
        report: PathBuf,

        /// Ledger of an earlier partial ingestion to resume
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Where to write the ledger if some batches fail
        #[arg(long)]
        ledger_out: Option<PathBuf>,

        /// Print follow-on work items that were enqueued
        #[arg(long)]
        show_work: bool,
    },

    /// List runs of a test matching dashboard filter parameters
    Query {
        /// Test name
        #[arg(long)]
        test: String,

        /// Filter parameter, e.g. `passing=6` or `branch=main` (repeatable)
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Maximum number of runs
        #[arg(long)]
        max: Option<usize>,

        /// Oldest first
        #[arg(long)]
        ascending: bool,

        /// Print the run entities instead of keys
        #[arg(long)]
        fetch: bool,
    },

    /// Compare recent profiling data against earlier windows
    Digest {
        /// Test name
        #[arg(long)]
        test: String,

        /// End of the current window (µs since epoch, default now)
        #[arg(long)]
        end: Option<i64>,

        /// Length of the current window in days
        #[arg(long, default_value = "1")]
        current_days: i64,

        /// Baseline window lengths in days, each ending where the current starts
        #[arg(long, value_delimiter = ',', default_value = "1,7,30")]
        baseline_days: Vec<i64>,

        /// Statistic compared per label
        #[arg(long, value_enum, default_value = "mean")]
        statistic: StatisticArg,

        /// Split points by device dimension
        #[arg(long, value_enum)]
        split: Vec<SplitArg>,
    },

    /// Recompute stored rollups of one time bucket
    Rollup {
        /// Test name
        #[arg(long)]
        test: String,

        /// Bucket start (µs since epoch)
        #[arg(long)]
        start: i64,

        /// Bucket end (µs since epoch, exclusive)
        #[arg(long)]
        end: i64,
    },

    /// Merge stored rollups of one profiling point
    Summary {
        /// Test name
        #[arg(long)]
        test: String,

        /// Profiling point name
        #[arg(long)]
        point: String,

        /// First bucket start to include (µs)
        #[arg(long)]
        from: i64,

        /// Bucket starts before this are included (µs)
        #[arg(long)]
        to: i64,

        #[arg(long)]
        branch: Option<String>,

        #[arg(long)]
        build_flavor: Option<String>,
    },

    /// Show store statistics
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatisticArg {
    Mean,
    BestCase,
    StdDev,
}

impl From<StatisticArg> for DigestStatistic {
    fn from(arg: StatisticArg) -> Self {
        match arg {
            StatisticArg::Mean => DigestStatistic::Mean,
            StatisticArg::BestCase => DigestStatistic::BestCase,
            StatisticArg::StdDev => DigestStatistic::StdDev,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SplitArg {
    Branch,
    Target,
}

impl From<SplitArg> for SplitKey {
    fn from(arg: SplitArg) -> Self {
        match arg {
            SplitArg::Branch => SplitKey::Branch,
            SplitArg::Target => SplitKey::Target,
        }
    }
}

fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got {:?}", s))?;
    Ok((name.trim().to_string(), value.trim().to_string()))
}

fn init_logging(config: &DashConfig, verbose: bool) {
    let default_level = if verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let json = config.logging.json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DashConfig::load(path).context("Failed to load configuration")?,
        None => DashConfig::default(),
    };
    if let Some(snapshot) = &cli.snapshot {
        config.store.snapshot_path = Some(snapshot.clone());
    }
    init_logging(&config, cli.verbose);

    let snapshot = config
        .store
        .snapshot_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("./dashstore.snapshot"));
    let store = Arc::new(
        MemoryStore::open_or_new(&snapshot, config.store.max_groups_per_transaction)
            .with_context(|| format!("Failed to open snapshot {}", snapshot.display()))?,
    );
    info!("Opened {} ({} records)", snapshot.display(), store.len());

    let resolver = Resolver::new(store.clone(), config.resolver.clone());

    match cli.command {
        Commands::Ingest {
            report,
            resume,
            ledger_out,
            show_work,
        } => {
            // Without a consumer attached, follow-on work is dropped.
            let queue = show_work.then(|| Arc::new(QueueTaskSink::default()));
            let sink: Arc<dyn TaskSink> = match &queue {
                Some(queue) => queue.clone(),
                None => Arc::new(NoopTaskSink),
            };
            let ingestor = Ingestor::new(store.clone(), sink, config.ingest.clone())
                .with_max_groups(config.store.max_groups_per_transaction);
            let body = std::fs::read_to_string(&report)
                .with_context(|| format!("Failed to read report {}", report.display()))?;

            let outcome = match resume {
                Some(ledger_path) => {
                    let ledger: CommitLedger = serde_json::from_str(
                        &std::fs::read_to_string(&ledger_path).with_context(|| {
                            format!("Failed to read ledger {}", ledger_path.display())
                        })?,
                    )
                    .context("Failed to parse ledger")?;
                    let report = TestReport::from_json(&body).context("Failed to parse report")?;
                    ingestor.resume(&report, &ledger)
                }
                None => ingestor.ingest_json(&body),
            };

            store
                .save_snapshot(&snapshot)
                .context("Failed to save snapshot")?;
            report_ingest(&outcome, ledger_out.as_deref(), cli.json)?;
            if let Some(queue) = queue {
                for item in queue.drain() {
                    println!("work: {} {}", item.kind, item.key);
                }
            }
            if !outcome.is_success() {
                bail!("Ingestion did not complete");
            }
        }

        Commands::Query {
            test,
            params,
            max,
            ascending,
            fetch,
        } => {
            let direction = if ascending {
                SortDirection::Ascending
            } else {
                SortDirection::Descending
            };
            let keys = resolver
                .resolve_params(
                    &TestEntity::key_for(&test),
                    params.iter().map(|(k, v)| (k.as_str(), v.as_str())),
                    config.filters.lenient,
                    direction,
                    max.unwrap_or(config.resolver.default_max_results),
                )
                .context("Failed to resolve runs")?;

            if fetch {
                let entities = resolver.fetch(&keys).context("Failed to fetch runs")?;
                print_json(&entities)?;
            } else if cli.json {
                print_json(&keys.iter().map(ToString::to_string).collect::<Vec<_>>())?;
            } else {
                for key in &keys {
                    println!("{}", key);
                }
                println!("✓ {} runs", keys.len());
            }
        }

        Commands::Digest {
            test,
            end,
            current_days,
            baseline_days,
            statistic,
            split,
        } => {
            if current_days <= 0 || baseline_days.iter().any(|d| *d <= 0) {
                bail!("Window lengths must be positive");
            }
            let end = end.unwrap_or_else(|| chrono::Utc::now().timestamp_micros());
            let current_start = end - current_days * MICROS_PER_DAY;

            let mut windows = vec![PerformanceSummary::new(current_start, end)?];
            for days in &baseline_days {
                windows.push(PerformanceSummary::new(
                    current_start - days * MICROS_PER_DAY,
                    current_start,
                )?);
            }

            let split: Vec<SplitKey> = split.into_iter().map(SplitKey::from).collect();
            let loader = PerformanceLoader::new(resolver);
            let runs = loader
                .load(&test, &mut windows, None, &split)
                .context("Failed to load profiling data")?;

            let (current, baselines) = windows.split_at(1);
            let digest = Digest::build(&current[0], baselines, statistic.into());
            if cli.json {
                print_json(&digest)?;
            } else {
                print_digest(&digest, runs);
            }
        }

        Commands::Rollup { test, start, end } => {
            let runner = TransactionRunner::new(
                store.clone(),
                config.ingest.retry.clone(),
                config.ingest.max_entities_per_transaction,
            );
            let rollup = SummaryRollup::new(resolver, runner)
                .with_max_groups(config.store.max_groups_per_transaction);
            let report = rollup
                .rollup(&test, start, end)
                .context("Failed to roll up")?;
            store
                .save_snapshot(&snapshot)
                .context("Failed to save snapshot")?;

            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "✓ Rolled up {} runs into {} summaries ({} transactions)",
                    report.runs_scanned, report.summaries_written, report.transactions
                );
            }
        }

        Commands::Summary {
            test,
            point,
            from,
            to,
            branch,
            build_flavor,
        } => {
            let mut query = SummaryQuery::new(test, point, from, to);
            if let Some(branch) = branch {
                query = query.branch(branch);
            }
            if let Some(flavor) = build_flavor {
                query = query.build_flavor(flavor);
            }
            let runner = TransactionRunner::new(
                store.clone(),
                config.ingest.retry.clone(),
                config.ingest.max_entities_per_transaction,
            );
            let summary = SummaryRollup::new(resolver, runner)
                .load_summaries(&query)
                .context("Failed to load summaries")?;

            match summary {
                Some(summary) if cli.json => print_json(&summary)?,
                Some(summary) => {
                    println!("{}:", summary.name());
                    for stat in summary.iter() {
                        println!(
                            "  {:<24} n={:<6} mean={:.3} std={:.3} min={:.3} max={:.3}",
                            stat.label(),
                            stat.count(),
                            stat.mean(),
                            stat.std(),
                            stat.min().unwrap_or(0.0),
                            stat.max().unwrap_or(0.0)
                        );
                    }
                }
                None => println!("✗ No summaries stored for {}", query.point_name),
            }
        }

        Commands::Stats => {
            let stats = store.stats();
            if cli.json {
                print_json(&stats)?;
            } else {
                println!("Records: {}", stats.records);
                println!("Snapshot: {}", snapshot.display());
            }
        }
    }

    Ok(())
}

fn report_ingest(outcome: &IngestOutcome, ledger_out: Option<&Path>, json: bool) -> Result<()> {
    match outcome {
        IngestOutcome::Committed(ledger) => {
            println!(
                "✓ Ingested {} ({} records)",
                ledger.run_key(),
                ledger.records_written()
            );
        }
        IngestOutcome::Skipped(reason) => println!("✗ Skipped report: {}", reason),
        IngestOutcome::Rejected(error) => println!("✗ Rejected report: {}", error),
        IngestOutcome::PartiallyFailed(ledger) => {
            println!("✗ Ingested {} partially", ledger.run_key());
            for failed in ledger.failed() {
                println!("  {}: {}", failed.batch, failed.error);
            }
            if let Some(path) = ledger_out {
                std::fs::write(path, serde_json::to_string_pretty(ledger)?)
                    .with_context(|| format!("Failed to write ledger {}", path.display()))?;
                println!("  Ledger written to {}", path.display());
            }
        }
    }
    if json {
        if let Some(ledger) = outcome.ledger() {
            print_json(ledger)?;
        }
    }
    Ok(())
}

fn print_digest(digest: &Digest, runs: usize) {
    println!(
        "{} vs {} ({} runs)",
        digest.current_window,
        digest.baseline_windows.join(" | "),
        runs
    );
    for row in &digest.rows {
        let cells: Vec<String> = row
            .cells
            .iter()
            .map(|cell| match cell.comparison {
                Comparison::Change { percent, .. } => format!("{:+.1}%", percent),
                Comparison::Saturated { positive: true } => "+inf".to_string(),
                Comparison::Saturated { positive: false } => "-inf".to_string(),
                Comparison::Unavailable => "n/a".to_string(),
            })
            .collect();
        println!(
            "  {:<32} {:<16} {:>12.3}  {}",
            row.point,
            row.label,
            row.current,
            cells.join("  ")
        );
    }
}
