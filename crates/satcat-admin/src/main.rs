use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use satcat_core::catalog::PageRequest;
use satcat_core::config::AppConfig;
use satcat_core::history::{HistoryFilter, IngestionCursor};
use satcat_core::notifications::NotificationWatcher;
use satcat_core::realtime::RealtimeBus;
use satcat_core::sites::{PointRow, RowStatus, SitesService};
use satcat_core::store::{HistoryStore, PgStore, Store};
use satcat_core::Vendor;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Satellite catalog administrative tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run embedded database migrations
    Migrate,
    /// Show recent ingestion history rows
    History(HistoryArgs),
    /// Run one notification scan for an owner
    ScanNotifications(OwnerArgs),
    /// Zero a site's notification counter
    ResetNotifications(ResetArgs),
    /// Create point sites from a `lat,lon,name` CSV file
    ImportSites(ImportArgs),
}

#[derive(Args, Debug)]
struct HistoryArgs {
    #[arg(long, value_parser = parse_vendor)]
    vendor: Option<Vendor>,
    #[arg(long, default_value_t = 20)]
    limit: u32,
}

#[derive(Args, Debug)]
struct OwnerArgs {
    #[arg(long)]
    owner: String,
}

#[derive(Args, Debug)]
struct ResetArgs {
    #[arg(long)]
    owner: String,
    #[arg(long)]
    site: i64,
}

#[derive(Args, Debug)]
struct ImportArgs {
    #[arg(long)]
    owner: String,
    #[arg(long)]
    csv: PathBuf,
    /// Assign every created site to this group
    #[arg(long)]
    group: Option<i64>,
}

fn parse_vendor(value: &str) -> std::result::Result<Vendor, String> {
    value.parse::<Vendor>().map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Migrate => handle_migrate().await,
        Command::History(args) => handle_history(args).await,
        Command::ScanNotifications(args) => handle_scan(args).await,
        Command::ResetNotifications(args) => handle_reset(args).await,
        Command::ImportSites(args) => handle_import(args).await,
    }
}

async fn connect() -> Result<PgStore> {
    dotenvy::dotenv().ok();
    let config = AppConfig::load().context("failed to load configuration")?;
    let database_url = config.database_url()?;
    PgStore::connect(database_url, 2).await
}

async fn handle_migrate() -> Result<()> {
    let store = connect().await?;
    store.run_migrations().await?;
    info!("Database migrations applied");
    Ok(())
}

async fn handle_history(args: HistoryArgs) -> Result<()> {
    let store = connect().await?;
    let filter = HistoryFilter {
        vendors: args.vendor.into_iter().collect(),
        ..HistoryFilter::default()
    };
    let (rows, total) = store
        .list_history(&filter, PageRequest::new(1, args.limit))
        .await?;
    println!("{}", history_table(&rows));
    println!("Showing {} of {} rows.", rows.len(), total);
    Ok(())
}

fn history_table(rows: &[IngestionCursor]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "id", "vendor", "mode", "outcome", "window start", "window end", "seen", "inserted", "updated",
        "duplicates", "skipped", "message",
    ]);
    for row in rows {
        table.add_row(vec![
            row.id.to_string(),
            row.vendor.to_string(),
            row.mode.as_str().to_string(),
            row.outcome.as_str().to_string(),
            row.window_start.to_rfc3339(),
            row.window_end.to_rfc3339(),
            row.counts.records_seen.to_string(),
            row.counts.inserted.to_string(),
            row.counts.updated.to_string(),
            row.counts.duplicates.to_string(),
            row.counts.skipped.to_string(),
            row.message.clone().unwrap_or_default(),
        ]);
    }
    table
}

async fn handle_scan(args: OwnerArgs) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(connect().await?);
    let watcher = NotificationWatcher::new(store, Arc::new(RealtimeBus::default()));
    let scans = watcher.scan_notifications(&args.owner).await?;
    if scans.is_empty() {
        println!("No new captures for {}.", args.owner);
        return Ok(());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["site", "name", "new captures"]);
    for scan in &scans {
        table.add_row(vec![scan.site_id.to_string(), scan.site_name.clone(), scan.new_updates.to_string()]);
    }
    println!("{table}");
    Ok(())
}

async fn handle_reset(args: ResetArgs) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(connect().await?);
    let watcher = NotificationWatcher::new(store, Arc::new(RealtimeBus::default()));
    let cleared = watcher.reset_site_notifications(&args.owner, args.site).await?;
    println!("Cleared {cleared} notifications for site {}.", args.site);
    Ok(())
}

/// Malformed lines are returned alongside the parsed rows, keyed by line number.
fn read_points<R: Read>(reader: R) -> (Vec<PointRow>, Vec<(u64, String)>) {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut rows = Vec::new();
    let mut rejected = Vec::new();
    for (index, record) in reader.deserialize::<PointRow>().enumerate() {
        match record {
            Ok(row) => rows.push(row),
            Err(err) => {
                let line = err
                    .position()
                    .map(|position| position.line())
                    .unwrap_or(index as u64 + 2);
                rejected.push((line, err.to_string()));
            }
        }
    }
    (rows, rejected)
}

async fn handle_import(args: ImportArgs) -> Result<()> {
    let file = std::fs::File::open(&args.csv)
        .with_context(|| format!("failed to open {}", args.csv.display()))?;
    let (rows, rejected) = read_points(file);
    for (line, reason) in &rejected {
        println!("line {line}: skipped ({reason})");
    }

    let store: Arc<dyn Store> = Arc::new(connect().await?);
    let sites = SitesService::new(store);
    let results = sites.bulk_add_from_points(&args.owner, rows, args.group).await?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["row", "name", "status", "site", "reason"]);
    for result in &results {
        table.add_row(vec![
            result.row.to_string(),
            result.name.clone(),
            match result.status {
                RowStatus::Created => "created".to_string(),
                RowStatus::Failed => "failed".to_string(),
            },
            result.site_id.map(|id| id.to_string()).unwrap_or_default(),
            result.reason.clone().unwrap_or_default(),
        ]);
    }
    println!("{table}");
    let created = results.iter().filter(|r| r.status == RowStatus::Created).count();
    info!(owner = %args.owner, created, failed = results.len() - created, skipped = rejected.len(), "site import finished");
    Ok(())
}
