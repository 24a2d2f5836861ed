use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use sqlite_migrator::MigrationCommand;
use tracing_subscriber::{fmt, EnvFilter};

use food_mirror::cli::{abort_hint, print_refresh, print_store_info, print_summary, run_migration_cli, InfoListing};
use food_mirror::config::{Config, LogFormat};
use food_mirror::models::MirrorError;
use food_mirror::storage::ProductStore;
use food_mirror::sync::SyncEngine;

#[derive(Parser, Debug)]
#[command(name = "food-mirror")]
#[command(about = "Mirror recently modified Open Food Facts products into a local SQLite database")]
#[command(version)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "FOOD_MIRROR_DB")]
    db: Option<PathBuf>,

    /// Catalog base URL
    #[arg(long, global = true, env = "OFF_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the most recently modified pages and upsert them
    Sync(SyncArgs),
    /// Manage database migrations (defaults to status)
    Migrate {
        #[command(subcommand)]
        command: Option<MigrationCommand>,
    },
    /// Refresh a single product by code
    Fetch {
        /// Product code (barcode)
        code: String,

        #[command(flatten)]
        trust: TrustArgs,
    },
    /// Show what the local mirror contains
    Info(InfoArgs),
}

#[derive(Args, Debug)]
struct TrustArgs {
    /// PEM bundle used instead of the system trust store
    #[arg(long)]
    ca_bundle: Option<PathBuf>,

    /// Disable TLS certificate verification
    #[arg(long)]
    insecure: bool,
}

#[derive(Args, Debug)]
struct InfoArgs {
    /// Number of products to list
    #[arg(long, default_value_t = 10)]
    recent: u32,

    /// List products whose name contains this text
    #[arg(long, conflicts_with = "code")]
    search: Option<String>,

    /// List these products, in the given order (repeatable)
    #[arg(long)]
    code: Vec<String>,
}

impl InfoArgs {
    fn listing(self) -> InfoListing {
        match self.search {
            Some(query) => InfoListing::Search { query, limit: self.recent },
            None if !self.code.is_empty() => InfoListing::Codes(self.code),
            None => InfoListing::Recent(self.recent),
        }
    }
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// Country tag used to filter the catalog (e.g. fr, de, world)
    #[arg(long)]
    country: Option<String>,

    /// Number of most-recently-modified pages to fetch
    #[arg(long)]
    recent_pages: Option<u32>,

    /// Products per page
    #[arg(long)]
    page_size: Option<u32>,

    #[command(flatten)]
    trust: TrustArgs,

    /// Pause between page requests
    #[arg(long)]
    sleep_ms: Option<u64>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(true)
            .init(),
        LogFormat::Pretty => fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init(),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut cfg = Config::from_env();
    if let Some(db) = cli.db {
        cfg.db_path = db;
    }
    if let Some(base_url) = cli.base_url {
        cfg.base_url = base_url;
    }
    init_tracing(cfg.log_format);

    let outcome = match cli.command {
        Command::Sync(args) => run_sync(cfg, args).await,
        Command::Migrate { command } => run_migration_cli(&cfg, command).await,
        Command::Fetch { code, trust } => run_fetch(cfg, &code, &trust).await,
        Command::Info(args) => print_store_info(&cfg, args.listing()).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("❌ {:#}", err);
            if let Some(hint) = err.downcast_ref::<MirrorError>().and_then(abort_hint) {
                eprintln!("   hint: {}", hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Layers the sync flags over the environment configuration.
fn apply_sync_args(mut cfg: Config, args: &SyncArgs) -> Config {
    if let Some(country) = &args.country {
        cfg.sync.country = country.clone();
    }
    if let Some(pages) = args.recent_pages {
        cfg.sync.recent_pages = pages;
    }
    if let Some(size) = args.page_size {
        cfg.sync.page_size = size;
    }
    if let Some(ms) = args.sleep_ms {
        cfg.request_delay_ms = ms;
    }
    apply_trust_args(cfg, &args.trust)
}

fn apply_trust_args(mut cfg: Config, trust: &TrustArgs) -> Config {
    cfg.sync = cfg.sync.with_trust_override(trust.ca_bundle.clone(), trust.insecure);
    cfg
}

/// Opens the store, migrating first unless AUTO_MIGRATE is off.
async fn open_store(cfg: &Config) -> anyhow::Result<ProductStore> {
    let store = if cfg.auto_migrate {
        ProductStore::open(&cfg.db_path).await?
    } else {
        ProductStore::connect(&cfg.db_path).await?
    };
    Ok(store)
}

async fn run_sync(cfg: Config, args: SyncArgs) -> anyhow::Result<()> {
    let cfg = apply_sync_args(cfg, &args);
    let trust = cfg.validate()?;
    tracing::info!(
        db = %cfg.db_path.display(),
        base_url = %cfg.base_url,
        country = %cfg.sync.country,
        trust = %trust,
        "Loaded configuration"
    );

    let store = open_store(&cfg).await?;
    let settings = cfg.sync.clone();
    let engine = SyncEngine::with_catalog(store.clone(), cfg, &trust)?;
    let result = engine.execute_sync(&settings).await;
    store.close().await;

    print_summary(&result?, args.json)
}

async fn run_fetch(cfg: Config, code: &str, trust: &TrustArgs) -> anyhow::Result<()> {
    let cfg = apply_trust_args(cfg, trust);
    let trust = cfg.validate()?;
    let store = open_store(&cfg).await?;

    let engine = SyncEngine::with_catalog(store.clone(), cfg, &trust)?;
    let result = engine.refresh_product(code).await;
    store.close().await;

    print_refresh(code, &result?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_args(argv: &[&str]) -> SyncArgs {
        let cli = Cli::try_parse_from(argv).unwrap();
        match cli.command {
            Command::Sync(args) => args,
            other => panic!("expected sync, got {:?}", other),
        }
    }

    #[test]
    fn flags_override_environment() {
        let args = sync_args(&["food-mirror", "sync", "--country", "de", "--page-size", "50", "--sleep-ms", "250"]);
        let cfg = apply_sync_args(Config::from_lookup(|_| None), &args);
        assert_eq!(cfg.sync.country, "de");
        assert_eq!(cfg.sync.page_size, 50);
        assert_eq!(cfg.sync.recent_pages, 3);
        assert_eq!(cfg.request_delay_ms, 250);
    }

    #[test]
    fn info_listing_follows_flags() {
        let info = |argv: &[&str]| match Cli::try_parse_from(argv).unwrap().command {
            Command::Info(args) => args.listing(),
            other => panic!("expected info, got {:?}", other),
        };
        assert_eq!(info(&["food-mirror", "info"]), InfoListing::Recent(10));
        assert_eq!(
            info(&["food-mirror", "info", "--search", "choco", "--recent", "5"]),
            InfoListing::Search { query: "choco".into(), limit: 5 }
        );
        assert_eq!(
            info(&["food-mirror", "info", "--code", "2", "--code", "1"]),
            InfoListing::Codes(vec!["2".into(), "1".into()])
        );
    }

    #[test]
    fn fetch_takes_trust_flags() {
        let cli = Cli::try_parse_from(["food-mirror", "fetch", "3017620422003", "--insecure"]).unwrap();
        let Command::Fetch { code, trust } = cli.command else {
            panic!("expected fetch");
        };
        assert_eq!(code, "3017620422003");
        let cfg = apply_trust_args(Config::from_lookup(|_| None), &trust);
        assert_eq!(cfg.validate().unwrap(), food_mirror::config::TrustMode::Insecure);
    }

    #[test]
    fn both_trust_flags_reach_validation() {
        let args = sync_args(&["food-mirror", "sync", "--ca-bundle", "corp.pem", "--insecure"]);
        let cfg = apply_sync_args(Config::from_lookup(|_| None), &args);

        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, MirrorError::Configuration(_)));
        assert!(abort_hint(&err).is_some());
    }
}
