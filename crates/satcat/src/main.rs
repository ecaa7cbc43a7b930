use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use satcat::api::{self, AppState, TokenIsOwner};
use satcat_core::address;
use satcat_core::config::AppConfig;
use satcat_core::geocoder::ReverseGeocoder;
use satcat_core::ingestion::{adapters_from_config, IngestionOptions, Orchestrator, PassReport, VendorStatus};
use satcat_core::notifications::NotificationWatcher;
use satcat_core::object_store::ObjectStore;
use satcat_core::realtime::RealtimeBus;
use satcat_core::store::{MemoryStore, PgStore, Store};
use satcat_core::{CatalogError, Vendor};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_STARTUP: u8 = 1;
const EXIT_ALL_VENDORS_FAILED: u8 = 2;
const EXIT_STORAGE: u8 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about = "Satellite catalog ingestion CLI and API server", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One pass across every vendor from its stored cursor up to now
    RunIncremental(IngestArgs),
    /// Re-fetch the last N days without moving the cursors
    RunBackfill(BackfillArgs),
    /// Fetch thumbnails for the given ids and upload them
    RunThumbnails(ThumbnailArgs),
    /// Run database migrations
    Migrate,
    /// Start the HTTP and WebSocket API
    Serve(ServeArgs),
}

#[derive(Args, Debug, Default)]
struct IngestArgs {
    /// Restrict the pass to these vendors (repeatable)
    #[arg(long = "vendor", value_parser = parse_vendor)]
    vendors: Vec<Vendor>,
    /// Vendors processed at the same time
    #[arg(long)]
    concurrency: Option<usize>,
    /// Per-request HTTP timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Fetch and normalise without writing anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
struct BackfillArgs {
    /// Days to re-fetch, counting back from now
    #[arg(long)]
    days: Option<i64>,
    #[command(flatten)]
    ingest: IngestArgs,
}

#[derive(Args, Debug)]
struct ThumbnailArgs {
    /// Vendor ids, comma separated or repeated
    #[arg(long, value_delimiter = ',', num_args = 1.., required = true)]
    ids: Vec<String>,
    #[command(flatten)]
    ingest: IngestArgs,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind, overriding the configured one
    #[arg(long)]
    bind: Option<String>,
    /// Do not start the periodic notification scan
    #[arg(long)]
    no_watcher: bool,
}

fn parse_vendor(value: &str) -> std::result::Result<Vendor, String> {
    value.parse::<Vendor>().map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            let code = exit_code_for(&err);
            error!(exit_code = code, error = %format!("{err:#}"), "satcat failed");
            ExitCode::from(code)
        }
    }
}

/// Storage failures anywhere in the chain exit with 3, everything else with 1.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    let storage = err.chain().any(|cause| {
        cause.downcast_ref::<sqlx::Error>().is_some()
            || cause.downcast_ref::<sqlx::migrate::MigrateError>().is_some()
            || cause
                .downcast_ref::<CatalogError>()
                .is_some_and(CatalogError::is_storage)
    });
    if storage {
        EXIT_STORAGE
    } else {
        EXIT_STARTUP
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = AppConfig::load().context("failed to load configuration")?;

    match cli.command {
        Command::Migrate => {
            let store = connect(&config).await?;
            store.run_migrations().await?;
            info!("Database migrations applied");
            Ok(ExitCode::SUCCESS)
        }
        Command::RunIncremental(args) => {
            let orchestrator = orchestrator(&config, &args).await?;
            let report = orchestrator.run_incremental(shutdown_signal()).await?;
            Ok(finish(&report))
        }
        Command::RunBackfill(args) => {
            let days = args.days.unwrap_or(config.ingestion.backfill_days);
            let orchestrator = orchestrator(&config, &args.ingest).await?;
            let report = orchestrator.run_backfill(days, shutdown_signal()).await?;
            Ok(finish(&report))
        }
        Command::RunThumbnails(args) => {
            if args.ingest.vendors.is_empty() {
                bail!("run-thumbnails needs at least one --vendor");
            }
            let orchestrator = orchestrator(&config, &args.ingest).await?;
            let requests = args
                .ingest
                .vendors
                .iter()
                .map(|vendor| (*vendor, args.ids.clone()))
                .collect();
            let report = orchestrator.run_thumbnails(requests).await?;
            Ok(finish(&report))
        }
        Command::Serve(args) => {
            serve(&config, args).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn connect(config: &AppConfig) -> Result<PgStore> {
    let database_url = config.database_url()?;
    PgStore::connect(database_url, config.server.max_db_connections).await
}

/// Flips to true on Ctrl-C; the pass stops at the next page boundary.
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn orchestrator(config: &AppConfig, args: &IngestArgs) -> Result<Orchestrator> {
    let mut config = config.clone();
    if let Some(timeout) = args.timeout {
        config.http.timeout_secs = timeout;
    }

    let store: Arc<dyn Store> = match (&config.database_url, args.dry_run) {
        (None, true) => {
            warn!("DATABASE_URL is not set; dry run starts every vendor from its epoch");
            Arc::new(MemoryStore::new())
        }
        _ => Arc::new(connect(&config).await?),
    };

    let adapters = adapters_from_config(&config)?;
    if adapters.is_empty() {
        return Err(CatalogError::Config("no vendor has credentials configured".into()).into());
    }
    for vendor in &args.vendors {
        if !adapters.iter().any(|adapter| adapter.vendor() == *vendor) {
            warn!(vendor = %vendor, "requested vendor is not configured");
        }
    }

    let mut options = IngestionOptions::from_settings(&config.ingestion)?;
    options.vendors = args.vendors.clone();
    options.dry_run = args.dry_run;
    if let Some(concurrency) = args.concurrency {
        options.concurrency = concurrency.max(1);
    }

    let bus = Arc::new(RealtimeBus::new(config.notifications.bus_buffer));
    let watcher = NotificationWatcher::new(Arc::clone(&store), Arc::clone(&bus));
    let mut orchestrator = Orchestrator::new(store, adapters, options)
        .with_object_store(ObjectStore::from_settings(&config.object_store).await?)
        .with_bus(bus)
        .with_watcher(watcher);

    match (&config.geocoder.states_path, &config.geocoder.marine_path) {
        (Some(states), Some(marine)) => {
            let geocoder = ReverseGeocoder::load(states, marine).context("failed to load geocoder layers")?;
            orchestrator = orchestrator.with_geocoder(Arc::new(geocoder));
        }
        _ => warn!("geocoder layers are not configured; captures are stored without a region"),
    }
    Ok(orchestrator)
}

fn finish(report: &PassReport) -> ExitCode {
    for vendor in &report.vendors {
        match vendor.status {
            VendorStatus::Failed => error!(
                vendor = %vendor.vendor,
                error = vendor.error.as_deref().unwrap_or("unknown"),
                "vendor failed"
            ),
            status => info!(
                vendor = %vendor.vendor,
                status = ?status,
                seen = vendor.counts.records_seen,
                inserted = vendor.counts.inserted,
                updated = vendor.counts.updated,
                duplicates = vendor.counts.duplicates,
                skipped = vendor.counts.skipped,
                "vendor finished"
            ),
        }
    }
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{json}"),
        Err(err) => warn!(error = %err, "failed to render pass report"),
    }
    if report.all_failed() {
        ExitCode::from(EXIT_ALL_VENDORS_FAILED)
    } else {
        ExitCode::SUCCESS
    }
}

async fn serve(config: &AppConfig, args: ServeArgs) -> Result<()> {
    let store = connect(config).await?;
    store.run_migrations().await?;
    let store: Arc<dyn Store> = Arc::new(store);

    let address = address::resolver_from_settings(&config.address, &config.http)?;
    let bus = Arc::new(RealtimeBus::new(config.notifications.bus_buffer));
    let state = Arc::new(AppState::new(Arc::clone(&store), address, bus, Arc::new(TokenIsOwner)));

    let shutdown = shutdown_signal();
    let watcher = (!args.no_watcher).then(|| {
        state
            .watcher
            .clone()
            .spawn_watcher(config.notifications.interval(), shutdown.clone())
    });

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    api::serve(state, &bind, shutdown).await?;

    if let Some(handle) = watcher {
        if let Err(err) = handle.await {
            warn!(error = %err, "notification watcher ended abnormally");
        }
    }
    info!("API server stopped");
    Ok(())
}
