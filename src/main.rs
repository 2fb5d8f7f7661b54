use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;

use registry_harvest::{
    export_csv, get_all_persons, get_province_stats, get_runs, run_harvest, setup_database,
    verify_count, DivisionResolver, DivisionTable, ExhaustionPolicy, HarvestConfig,
    HarvestOptions, HttpTransport, PagedFetcher,
};

#[derive(Parser)]
#[command(name = "registry-harvest")]
#[command(about = "Harvest listed persons from the public registry and resolve their divisions")]
struct Args {
    /// SQLite database path (overrides REGISTRY_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Code-table directory (overrides REGISTRY_CODES_DIR)
    #[arg(long, global = true)]
    codes_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream pages from the registry into the database
    Harvest {
        #[arg(long)]
        page_size: Option<u32>,

        #[arg(long)]
        step_over_pages: Option<u32>,

        /// stop_on_short_page | page_bound
        #[arg(long)]
        policy: Option<ExhaustionPolicy>,

        #[arg(long, default_value_t = 1)]
        start_page: u32,

        #[arg(long)]
        max_records: Option<usize>,
    },

    /// Resolve one 6-digit division code against the code tables
    Resolve { code: String },

    /// Show stored person counts by province
    Stats,

    /// Show recorded harvest runs
    Runs,

    /// Export stored persons to CSV
    Export { path: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = HarvestConfig::from_env()?;
    if let Some(db) = args.db {
        config.db_path = db;
    }
    if let Some(codes_dir) = args.codes_dir {
        config.codes_dir = codes_dir;
    }

    match args.command {
        Command::Harvest {
            page_size,
            step_over_pages,
            policy,
            start_page,
            max_records,
        } => {
            if let Some(page_size) = page_size {
                config.page_size = page_size;
            }
            if let Some(step) = step_over_pages {
                config.step_over_pages = step;
            }
            if let Some(policy) = policy {
                config.policy = policy;
            }
            config.validate()?;
            run_harvest_command(&config, start_page, max_records)
        }
        Command::Resolve { code } => run_resolve(&config, &code),
        Command::Stats => run_stats(&config),
        Command::Runs => run_runs(&config),
        Command::Export { path } => run_export(&config, &path),
    }
}

fn open_database(config: &HarvestConfig) -> Result<Connection> {
    let conn = Connection::open(&config.db_path)
        .with_context(|| format!("Failed to open database: {}", config.db_path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

fn load_resolver(config: &HarvestConfig) -> Result<DivisionResolver<Arc<DivisionTable>>> {
    let table = DivisionTable::load_dir(&config.codes_dir)?;
    println!(
        "✓ Loaded code tables: {} current codes, {} historical revisions",
        table.current_len(),
        table.revision_count()
    );
    Ok(DivisionResolver::new(Arc::new(table)))
}

fn run_harvest_command(config: &HarvestConfig, start_page: u32, max_records: Option<usize>) -> Result<()> {
    println!("🚜 Registry harvest");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let resolver = load_resolver(config)?;
    let conn = open_database(config)?;

    let transport = HttpTransport::new(config.timeout(), &config.user_agent)?;
    let fetcher = PagedFetcher::new(transport, config.endpoint.clone());

    let options = HarvestOptions {
        page_size: config.page_size,
        step_over_pages: config.step_over_pages,
        policy: config.policy,
        start_page,
        max_records,
        ..HarvestOptions::default()
    };

    let run = run_harvest(&conn, &fetcher, &resolver, &options)?;
    let total = verify_count(&conn)?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Run {}: {}", run.run_id, run.status);
    println!("✓ Pages fetched: {}", run.pages_fetched);
    println!("✓ Inserted: {} persons", run.inserted);
    println!("✓ Skipped duplicates: {}", run.duplicates);
    println!("✓ Database contains {} persons", total);

    if let Some(error) = &run.error {
        anyhow::bail!("harvest stopped early: {}", error);
    }

    Ok(())
}

fn run_resolve(config: &HarvestConfig, code: &str) -> Result<()> {
    let resolver = load_resolver(config)?;

    match resolver.resolve(code)? {
        Some(division) => {
            let revision = division.revision.as_deref().unwrap_or("current");
            println!("{} → {} (revision: {})", code, division.full_name(), revision);
        }
        None => println!("{} → not found in any revision", code),
    }

    Ok(())
}

fn run_stats(config: &HarvestConfig) -> Result<()> {
    let conn = open_database(config)?;
    let stats = get_province_stats(&conn)?;

    println!("📊 Persons by province");
    for stat in stats {
        println!(
            "  {:<12} {:>8}  (historical: {}, {})",
            stat.province.as_deref().unwrap_or("<unresolved>"),
            stat.person_count,
            stat.historical_count,
            stat.date_range
        );
    }

    Ok(())
}

fn run_runs(config: &HarvestConfig) -> Result<()> {
    let conn = open_database(config)?;

    for run in get_runs(&conn)? {
        println!(
            "{}  {}  {:<9}  pages={} inserted={} duplicates={}{}",
            run.run_id,
            run.started_at.to_rfc3339(),
            run.status,
            run.pages_fetched,
            run.inserted,
            run.duplicates,
            run.error.map(|e| format!("  error: {}", e)).unwrap_or_default()
        );
    }

    Ok(())
}

fn run_export(config: &HarvestConfig, path: &std::path::Path) -> Result<()> {
    let conn = open_database(config)?;
    let persons = get_all_persons(&conn)?;
    let written = export_csv(path, &persons)?;

    println!("✓ Exported {} persons to {}", written, path.display());
    Ok(())
}
