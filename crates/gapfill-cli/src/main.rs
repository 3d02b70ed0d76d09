//! gapfill CLI - hybrid facility lookup

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use gapfill_core::cache::{EnrichmentCache, MemoryCache, SqliteEnrichmentCache};
use gapfill_core::config::Config;
use gapfill_core::cost::CostTracker;
use gapfill_core::enrichment::WebSearchClient;
use gapfill_core::facility::FacilityRecord;
use gapfill_core::lookup::SqliteFacilityStore;
use gapfill_core::merge::{EnrichedFacility, Provenance};
use gapfill_core::pipeline::{HybridSearch, SearchResponse};
use gapfill_core::storage::Database;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "gapfill")]
#[command(author, version, about = "Hybrid facility lookup with web enrichment", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Facility database path (overrides storage.database_path)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Search facilities with a natural-language query
    Search {
        /// The query, e.g. "hospitals with more than 300 beds in Texas"
        query: String,
        /// Maximum external lookups for this request
        #[arg(long)]
        ceiling: Option<usize>,
        /// Answer from the database and cache only
        #[arg(long)]
        offline: bool,
    },

    /// Load facility records from a JSON-lines file
    Import {
        /// One facility record per line
        file: PathBuf,
    },

    /// Inspect the enrichment cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Check system health
    Doctor,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Drop every cached value for one facility
    Invalidate {
        /// Facility ID
        facility_id: i64,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
    /// Reset to defaults
    Reset,
    /// Show the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("gapfill=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_override = cli.db.clone();

    match cli.command {
        Commands::Search {
            query,
            ceiling,
            offline,
        } => {
            let config = Config::load()?;
            let db = open_database(&config, db_override.as_deref()).await?;
            cmd_search(&config, &db, &query, ceiling, offline, cli.format, cli.quiet).await
        }

        Commands::Import { file } => {
            let config = Config::load()?;
            let db = open_database(&config, db_override.as_deref()).await?;
            cmd_import(&config, &db, &file, cli.quiet).await
        }

        Commands::Cache { action } => {
            let config = Config::load()?;
            let db = open_database(&config, db_override.as_deref()).await?;
            cmd_cache(&config, &db, action, cli.format, cli.quiet).await
        }

        Commands::Config { action } => cmd_config(action, cli.quiet),

        Commands::Doctor => cmd_doctor(db_override.as_deref(), cli.quiet).await,
    }
}

async fn open_database(config: &Config, path: Option<&Path>) -> anyhow::Result<Database> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.storage.database_path());
    Database::open(&path)
        .await
        .with_context(|| format!("Failed to open facility database at {}", path.display()))
}

/// Cache database: the facility database unless `storage.cache_path` is set
async fn open_cache(config: &Config, db: &Database) -> anyhow::Result<SqliteEnrichmentCache> {
    let Some(path) = &config.storage.cache_path else {
        return Ok(SqliteEnrichmentCache::new(db));
    };
    let cache_db = Database::open(path)
        .await
        .with_context(|| format!("Failed to open cache database at {}", path.display()))?;
    Ok(SqliteEnrichmentCache::new(&cache_db))
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_search(
    config: &Config,
    db: &Database,
    query: &str,
    ceiling: Option<usize>,
    offline: bool,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let store = SqliteFacilityStore::new(db, &config.lookup);
    // an unreachable cache costs repeat lookups, not the search
    let cache: Arc<dyn EnrichmentCache> = match open_cache(config, db).await {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!(error = %format!("{:#}", e), "Cache unavailable, using an in-memory cache");
            if !quiet {
                eprintln!("[!!] E300: cache unavailable, results will not be cached");
            }
            Arc::new(MemoryCache::new())
        }
    };

    let mut enrichment = config.enrichment.clone();
    if let Some(ceiling) = ceiling {
        enrichment.ceiling = ceiling;
    }

    let mut builder = HybridSearch::builder()
        .store(Arc::new(store))
        .cache(cache)
        .cost_tracker(CostTracker::from_config(config))
        .enrichment_config(enrichment.clone());

    if !offline {
        match enrichment.resolved_api_key()? {
            Some(key) => {
                let client = WebSearchClient::builder()
                    .config(enrichment)
                    .api_key(key)
                    .build()?;
                builder = builder.knowledge_source(Arc::new(client));
            }
            None => {
                warn!("No API key configured; web enrichment disabled");
            }
        }
    }

    let search = builder.build()?;
    let response = search.search(query).await.map_err(|e| {
        let hint = e
            .suggestion()
            .map(|s| format!("\n  Try: {}", s))
            .unwrap_or_default();
        anyhow!("[{}] {}{}", e.code(), e, hint)
    })?;

    info!(
        results = response.results_count,
        external_calls = response.telemetry.external_calls,
        elapsed_ms = response.telemetry.total_ms(),
        "Search complete"
    );

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Text => print_response(&response, quiet),
    }
    Ok(())
}

fn print_response(response: &SearchResponse, quiet: bool) {
    if quiet {
        for facility in &response.facilities {
            println!("{}\t{}", facility.id(), facility.facility.display_name());
        }
        return;
    }

    if response.query.corrected != response.query.original {
        println!("Interpreted as: {}", response.query.corrected);
    }
    println!(
        "Found {} facilit{}",
        response.results_count,
        if response.results_count == 1 { "y" } else { "ies" }
    );
    println!();

    for (i, facility) in response.facilities.iter().enumerate() {
        print_facility(i + 1, facility);
    }

    println!("Source: {}", response.data_source_explanation);
    println!(
        "Cache hit rate: {:.0}% | Web lookups: {} | Est. cost: ${:.4}",
        response.cache_hit_rate * 100.0,
        response.telemetry.external_calls,
        response.estimated_cost_usd
    );
    if response.telemetry.truncated > 0 {
        println!(
            "  {} lookup(s) skipped by the per-request ceiling",
            response.telemetry.truncated
        );
    }
    for warning in &response.warnings {
        println!("[!!] {}: {}", warning.code, warning.message);
    }
}

fn print_facility(index: usize, facility: &EnrichedFacility) {
    let record = &facility.facility;
    let place = [record.city.as_deref(), record.state_label()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(", ");
    if place.is_empty() {
        println!("{}. {} (#{})", index, record.display_name(), record.id);
    } else {
        println!("{}. {} (#{}) - {}", index, record.display_name(), record.id, place);
    }

    for (field, provenance) in &facility.provenance {
        match facility.value(field) {
            Some(value) => println!("     {}: {} [{}]", field, value, provenance_label(*provenance)),
            None => println!("     {}: unknown", field),
        }
    }
    println!();
}

fn provenance_label(provenance: Provenance) -> &'static str {
    match provenance {
        Provenance::Database => "db",
        Provenance::Cache => "cached",
        Provenance::Web => "web",
        Provenance::Absent => "-",
    }
}

async fn cmd_import(
    config: &Config,
    db: &Database,
    file: &Path,
    quiet: bool,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: FacilityRecord = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid facility record", file.display(), line_no + 1))?;
        records.push(record);
    }

    let store = SqliteFacilityStore::new(db, &config.lookup);
    let imported = store.import(&records).await?;
    info!(imported, path = %file.display(), "Facilities imported");

    if !quiet {
        println!("Imported {} facilities ({} total)", imported, store.count().await?);
    }
    Ok(())
}

async fn cmd_cache(
    config: &Config,
    db: &Database,
    action: CacheAction,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let cache = open_cache(config, db).await?;

    match action {
        CacheAction::Stats => {
            let stats = cache.stats().await?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
                return Ok(());
            }
            println!("Enrichment Cache");
            println!("================");
            println!("  Entries:  {}", stats.total_entries);
            println!("  Unknown:  {}", stats.unknown_entries);
            if let Some(oldest) = stats.oldest {
                println!("  Oldest:   {}", oldest.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            if let Some(newest) = stats.newest {
                println!("  Newest:   {}", newest.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            if !quiet && !stats.by_field.is_empty() {
                println!();
                println!("  By field:");
                for (field, count) in &stats.by_field {
                    println!("    {:<20} {}", field, count);
                }
            }
        }
        CacheAction::Invalidate { facility_id } => {
            let removed = cache.invalidate(facility_id).await?;
            if !quiet {
                println!("Removed {} cached value(s) for facility {}", removed, facility_id);
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(db_override: Option<&Path>, quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!("gapfill Health Check");
        println!("====================");
        println!();
    }

    let mut all_ok = true;

    let config = match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
            match config.enrichment.redacted_api_key() {
                Ok(Some(redacted)) => {
                    if !quiet {
                        println!("[OK] API Key: Configured ({})", redacted);
                    }
                }
                Ok(None) => {
                    if !quiet {
                        warn!("API Key: Not configured");
                        println!("[--] API Key: Not configured (web enrichment disabled)");
                        println!("     Set GAPFILL_API_KEY or PERPLEXITY_API_KEY environment variable");
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] API Key: Error - {}", e);
                    }
                }
            }
            Some(config)
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {}", e);
            }
            None
        }
    };

    if !quiet {
        match Config::config_path() {
            Ok(path) if path.exists() => println!("[OK] Config file: {}", path.display()),
            Ok(path) => println!("[--] Config file: {} (using defaults)", path.display()),
            Err(e) => println!("[!!] Config file: Error - {}", e),
        }
    }

    let config = config.unwrap_or_default();
    match open_database(&config, db_override).await {
        Ok(db) => {
            let healthy = db.health_check().await;
            let status = db.migration_status().await;
            match (healthy, status) {
                (Ok(()), Ok(status)) => {
                    if !quiet {
                        println!(
                            "[OK] Database: {} (schema v{})",
                            db.path().display(),
                            status.current_version
                        );
                        let store = SqliteFacilityStore::new(&db, &config.lookup);
                        match store.count().await {
                            Ok(count) => println!("[OK] Facilities: {}", count),
                            Err(e) => println!("[!!] Facilities: Error - {}", e),
                        }
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Database: Error - {}", e);
                    }
                }
            }
            db.close().await;
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: Error - {:#}", e);
            }
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed.");
        } else {
            println!("Some checks failed.");
        }
    }

    if all_ok {
        Ok(())
    } else {
        Err(anyhow!("health check failed"))
    }
}
