use anyhow::{Context, Result};
use sqlite_migrator::MigrationCommand;

use crate::config::Config;
use crate::migrations;
use crate::models::{MirrorError, ProductRefresh, StoredProduct, SyncSummary};
use crate::storage::{ProductStore, META_LAST_SYNC_SUMMARY};

/// Run a migration subcommand against the configured database (status by default)
pub async fn run_migration_cli(cfg: &Config, command: Option<MigrationCommand>) -> Result<()> {
    let store = ProductStore::connect(&cfg.db_path).await?;
    let registry = migrations::registry()?;
    sqlite_migrator::execute_command(
        store.pool().clone(),
        migrations::migration_config(),
        registry,
        command.unwrap_or(MigrationCommand::Status),
    )
    .await
}

/// What `info` should list besides the counts and sync metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoListing {
    Recent(u32),
    Search { query: String, limit: u32 },
    Codes(Vec<String>),
}

/// Print row count, sync metadata and the requested products
pub async fn print_store_info(cfg: &Config, listing: InfoListing) -> Result<()> {
    let store = ProductStore::open_read_only(&cfg.db_path)
        .await
        .with_context(|| format!("cannot open {} read-only", cfg.db_path.display()))?;

    println!("📦 Store: {}", cfg.db_path.display());
    println!("Products: {}", store.count_products().await?);

    for (key, value) in store.read_meta().await? {
        if key == META_LAST_SYNC_SUMMARY {
            continue;
        }
        println!("{}: {}", key, value);
    }

    let (title, products) = match &listing {
        InfoListing::Recent(limit) => ("Most recently modified".to_string(), store.recent_products(*limit).await?),
        InfoListing::Search { query, limit } => {
            (format!("Names matching '{}'", query), store.search_by_name(query, *limit).await?)
        }
        InfoListing::Codes(codes) => {
            let found = store.get_products_by_codes(codes).await?;
            (format!("Requested codes ({} of {} found)", found.len(), codes.len()), found)
        }
    };

    if !products.is_empty() || !matches!(listing, InfoListing::Recent(_)) {
        println!("\n{}:", title);
        for p in &products {
            println!("  {}", product_line(p));
        }
    }
    Ok(())
}

fn product_line(p: &StoredProduct) -> String {
    let modified = p
        .record
        .last_modified
        .and_then(|t| chrono::DateTime::from_timestamp(t, 0))
        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<16} {:<17} {}{}",
        p.record.code,
        modified,
        p.record.name,
        p.record
            .payload
            .nutriscore_grade
            .as_deref()
            .map(|g| format!(" [nutri-score {}]", g.to_uppercase()))
            .unwrap_or_default()
    )
}

pub fn print_refresh(code: &str, refresh: &ProductRefresh) {
    match refresh {
        ProductRefresh::NotFound => println!("🔍 Product {} is not in the catalog", code),
        ProductRefresh::Rejected => println!("⚠️  Catalog returned product {} without a usable code; nothing stored", code),
        ProductRefresh::Stored { record, inserted } => {
            println!(
                "✅ {} product {}: {}",
                if *inserted { "Inserted" } else { "Updated" },
                record.code,
                record.name
            );
        }
    }
}

pub fn print_summary(summary: &SyncSummary, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("✅ Sync completed for '{}' in {}ms", summary.country, summary.elapsed_ms);
    println!("Pages fetched: {}", summary.pages_fetched);
    println!("Pages failed: {}", summary.pages_failed);
    println!("Records seen: {}", summary.records_seen);
    println!("Inserted: {}", summary.inserted);
    println!("Updated: {}", summary.updated);
    println!("Skipped: {}", summary.skipped);
    println!("Failed: {}", summary.failed);
    if summary.pages_failed > 0 {
        println!("\n⚠️  {} page(s) were skipped after retries", summary.pages_failed);
    }
    Ok(())
}

/// Actionable advice for errors that abort a run.
pub fn abort_hint(err: &MirrorError) -> Option<&'static str> {
    match err {
        MirrorError::Trust(_) => Some(
            "the catalog's TLS certificate could not be verified; pass --ca-bundle <pem> \
             (e.g. a corporate proxy CA) or, as a last resort, --insecure",
        ),
        MirrorError::Configuration(_) => Some("check the sync flags and the OFF_* / SYNC_* environment variables"),
        MirrorError::Storage(_) | MirrorError::Migration(_) => {
            Some("check that the database path is writable, or run `food-mirror migrate status`")
        }
        _ => None,
    }
}
