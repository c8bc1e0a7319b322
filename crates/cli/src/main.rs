//! QualiSentinel CLI - quality metric ingestion, queries and diagnostics.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qualisentinel_core::{
    parse_duration, parse_timestamp, SummaryKind, Threshold, ThresholdDirection, Time,
};
use qualisentinel_ingest::{
    FileAdapter, HttpCollector, IngestAdapter, IngestOptions, IngestReport, InputFormat, InputSource,
};
use qualisentinel_query::{BasicQueryService, QueryService};
use qualisentinel_storage::{JsonSnapshotStorage, SeriesStore, SnapshotStorage};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{EnvironmentSetupError, SentinelConfig};

#[derive(Parser)]
#[command(name = "qualisentinel")]
#[command(about = "Quality metric sentinel", long_about = None)]
struct Cli {
    /// Config file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level; RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest files into the store
    Ingest {
        /// Input files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Input format (csv, tsv, jsonl, prometheus, snapshot); detected when omitted
        #[arg(long)]
        format: Option<InputFormat>,
        /// Source id for Prometheus input
        #[arg(long)]
        source: Option<String>,
    },
    /// Summarize one series
    Query {
        /// Source id
        source: String,
        /// Metric name
        metric: String,
        /// latest, mean, trend or threshold
        #[arg(long, default_value = "latest")]
        kind: String,
        /// Trailing window for mean/trend (e.g. 15m)
        #[arg(long)]
        window: Option<String>,
        /// Threshold limit
        #[arg(long)]
        limit: Option<f64>,
        /// Failing side of the threshold
        #[arg(long, default_value = "above")]
        direction: ThresholdDirection,
        /// Evaluation instant (RFC 3339 or epoch seconds); now when omitted
        #[arg(long)]
        as_of: Option<String>,
        /// Print flat JSON fields
        #[arg(long)]
        json: bool,
    },
    /// List sources and their metrics
    Sources,
    /// Scrape the target application once
    Collect {
        /// Management base URL
        #[arg(long)]
        url: Option<String>,
        /// Source id for scraped records
        #[arg(long)]
        source: Option<String>,
        /// Also fetch HTTP traces
        #[arg(long)]
        traces: bool,
    },
    /// Diagnose a source from its latest values
    Analyze {
        /// Source id; the configured target when omitted
        source: Option<String>,
        /// Evaluation instant; now when omitted
        #[arg(long)]
        as_of: Option<String>,
        /// Print JSON instead of Markdown
        #[arg(long)]
        json: bool,
    },
    /// Collect and diagnose periodically
    Watch {
        /// Seconds between collections (5-120)
        #[arg(long)]
        interval: Option<u64>,
        /// Stop after this many collections
        #[arg(long)]
        cycles: Option<usize>,
    },
    /// Print the dashboard launch configuration
    LaunchConfig,
}

/// Everything a command needs: config, store and snapshot storage.
struct Session {
    config: SentinelConfig,
    store: Arc<SeriesStore>,
    storage: JsonSnapshotStorage,
}

impl Session {
    async fn open(config: SentinelConfig) -> Result<Self> {
        let data_dir = config.prepare_data_dir().await?;
        let retention = config.retention_policy()?;
        let storage = JsonSnapshotStorage::new(&data_dir)
            .await
            .map_err(|e| EnvironmentSetupError::DataDir {
                path: data_dir.clone(),
                reason: e.to_string(),
            })?;

        let store = Arc::new(SeriesStore::with_retention(retention));
        if let Some(snapshot) = storage.latest_snapshot().await? {
            store.restore(&snapshot).await;
        }
        Ok(Self { config, store, storage })
    }

    async fn service(&self) -> Result<BasicQueryService> {
        let profile = self.config.load_profile().await?;
        Ok(BasicQueryService::new(Arc::clone(&self.store)).with_profile(profile))
    }

    async fn save(&self) -> Result<()> {
        self.store.enforce_retention(chrono::Utc::now()).await;
        let snapshot = self.store.to_snapshot().await;
        self.storage.save_snapshot(&snapshot).await?;
        self.storage.prune_snapshots(self.config.keep_snapshots.max(1)).await?;
        info!(snapshot = %snapshot.id, records = snapshot.record_count(), "Saved snapshot");
        Ok(())
    }

    fn collector(&self, url: Option<String>, source: Option<String>) -> Result<HttpCollector> {
        let target = &self.config.target;
        Ok(HttpCollector::new(
            url.unwrap_or_else(|| target.base_url.clone()),
            source.unwrap_or_else(|| target.source_id.clone()),
            Duration::from_secs(target.timeout_secs.max(1)),
        )?)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            if err.downcast_ref::<EnvironmentSetupError>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = SentinelConfig::load(cli.config.as_deref()).await?;

    if let Commands::LaunchConfig = cli.command {
        println!("{}", serde_json::to_string_pretty(&config.launch_config())?);
        return Ok(());
    }

    let session = Session::open(config).await?;

    match cli.command {
        Commands::Ingest { paths, format, source } => {
            let mut options = IngestOptions::default().with_collected_at(chrono::Utc::now());
            if let Some(format) = format {
                options = options.with_format(format);
            }
            if let Some(source) = source {
                options = options.with_source_id(source);
            }
            let adapter = FileAdapter::new(options);

            for path in paths {
                let report = adapter
                    .ingest(&InputSource::file(&path))
                    .await
                    .with_context(|| format!("Failed to ingest {}", path.display()))?;
                store_report(&session, report).await;
            }
            session.save().await?;
        }
        Commands::Query {
            source,
            metric,
            kind,
            window,
            limit,
            direction,
            as_of,
            json,
        } => {
            let kind = build_kind(&kind, window.as_deref(), limit, direction)?;
            let as_of = resolve_as_of(as_of.as_deref())?;
            let summary = session.service().await?.query(&source, &metric, &kind, as_of).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary.to_fields())?);
            } else {
                println!("{}/{} {} (as of {})", source, metric, summary.kind, summary.as_of.to_rfc3339());
                for (field, value) in summary.to_fields() {
                    println!("  {}: {}", field, value);
                }
            }
        }
        Commands::Sources => {
            let service = session.service().await?;
            let sources = service.list_sources().await;
            println!("Sources ({})", sources.len());
            for source in sources {
                let metrics = service.list_metrics(&source).await;
                println!("  {} ({} metrics)", source, metrics.len());
                for metric in metrics {
                    let version = service.series_version(&source, &metric).await.unwrap_or_default();
                    println!("    {} | v{}", metric, version);
                }
            }
        }
        Commands::Collect { url, source, traces } => {
            let collector = session.collector(url, source)?;
            let report = collector.scrape(chrono::Utc::now()).await?;
            store_report(&session, report).await;

            if traces {
                let traces = collector.fetch_traces().await?;
                println!("HTTP traces ({})", traces.len());
                println!("{}", serde_json::to_string_pretty(&traces)?);
            }
            session.save().await?;
        }
        Commands::Analyze { source, as_of, json } => {
            let source = source.unwrap_or_else(|| session.config.target.source_id.clone());
            let as_of = resolve_as_of(as_of.as_deref())?;
            let report = session.service().await?.diagnose(&source, as_of).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.to_markdown());
            }
        }
        Commands::Watch { interval, cycles } => {
            watch(&session, interval, cycles).await?;
        }
        Commands::LaunchConfig => {}
    }

    Ok(())
}

async fn store_report(session: &Session, report: IngestReport) {
    for warning in &report.warnings {
        eprintln!("  {}: {}", report.input, warning);
    }
    let summary = session.store.append_batch(report.records).await;
    println!(
        "{}: {} appended, {} duplicate, {} replaced, {} expired, {} rejected, {} warnings",
        report.input,
        summary.appended,
        summary.duplicates,
        summary.replaced,
        summary.expired,
        summary.rejected,
        report.warnings.len()
    );
}

async fn watch(session: &Session, interval: Option<u64>, cycles: Option<usize>) -> Result<()> {
    let mut refresh = session.config.refresh.clone();
    if let Some(secs) = interval {
        refresh.interval_secs = secs;
    }
    let period = refresh.interval();
    // Without auto refresh a watch is a single collection
    let cycles = if refresh.auto { cycles } else { Some(1) };

    let collector = session.collector(None, None)?;
    let service = session.service().await?;
    let mut done = 0;

    loop {
        let now = chrono::Utc::now();
        match collector.scrape(now).await {
            Ok(report) => {
                store_report(session, report).await;
                session.save().await?;
                if let Some(markdown) = diagnose_markdown(&service, collector.source_id(), now).await {
                    println!("{}", markdown);
                }
            }
            Err(err) => warn!(error = %err, "Collection failed"),
        }

        done += 1;
        if cycles.is_some_and(|max| done >= max) {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

/// Diagnose one watch cycle. Failures are logged so the loop keeps going.
async fn diagnose_markdown(service: &impl QueryService, source_id: &str, as_of: Time) -> Option<String> {
    match service.diagnose(source_id, as_of).await {
        Ok(report) => Some(report.to_markdown()),
        Err(err) => {
            warn!(source = source_id, error = %err, "Diagnosis failed");
            None
        }
    }
}

fn build_kind(
    kind: &str,
    window: Option<&str>,
    limit: Option<f64>,
    direction: ThresholdDirection,
) -> Result<SummaryKind> {
    let window = window.map(parse_duration).transpose()?;
    let kind = match kind.trim().to_lowercase().as_str() {
        "latest" => SummaryKind::Latest,
        "mean" | "mean_over_window" => SummaryKind::MeanOverWindow { window },
        "trend" => SummaryKind::Trend { window },
        "threshold" | "threshold_status" => {
            let limit = limit.context("--limit is required for threshold queries")?;
            SummaryKind::ThresholdStatus {
                threshold: Threshold { limit, direction },
            }
        }
        other => anyhow::bail!("Unknown summary kind '{}'", other),
    };
    Ok(kind)
}

fn resolve_as_of(raw: Option<&str>) -> Result<Time> {
    match raw {
        Some(raw) => parse_timestamp(raw).map_err(|e| anyhow::anyhow!("Invalid --as-of '{}': {}", raw, e)),
        None => Ok(chrono::Utc::now()),
    }
}
