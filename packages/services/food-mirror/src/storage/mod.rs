use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::migrations;
use crate::models::*;

const UPSERT_PRODUCT: &str = r#"
INSERT INTO products (
    code, product_name, countries, last_modified_t, last_synced_at,
    brands, categories, quantity, nutriscore_grade, ecoscore_grade, nova_group,
    nutriments_json, ecoscore_data_json, raw_json
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(code) DO UPDATE SET
    product_name       = excluded.product_name,
    countries          = excluded.countries,
    last_modified_t    = COALESCE(MAX(products.last_modified_t, excluded.last_modified_t),
                                  products.last_modified_t, excluded.last_modified_t),
    last_synced_at     = excluded.last_synced_at,
    brands             = excluded.brands,
    categories         = excluded.categories,
    quantity           = excluded.quantity,
    nutriscore_grade   = excluded.nutriscore_grade,
    ecoscore_grade     = excluded.ecoscore_grade,
    nova_group         = excluded.nova_group,
    nutriments_json    = excluded.nutriments_json,
    ecoscore_data_json = excluded.ecoscore_data_json,
    raw_json           = excluded.raw_json
"#;

const SELECT_PRODUCT: &str = "SELECT code, product_name, countries, last_modified_t, last_synced_at, \
    brands, categories, quantity, nutriscore_grade, ecoscore_grade, nova_group, \
    nutriments_json, ecoscore_data_json, raw_json FROM products";

const CODES_PER_QUERY: usize = 500;

pub const META_LAST_SYNC_UTC: &str = "last_sync_utc";
pub const META_LAST_SYNC_SUMMARY: &str = "last_sync_summary";

/// The local SQLite mirror. Writers hold a single connection; readers open their own.
#[derive(Clone)]
pub struct ProductStore {
    pool: SqlitePool,
}

impl ProductStore {
    /// Opens (creating if needed) the database file without touching the schema.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                MirrorError::Configuration(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        tracing::info!(path = %path.display(), "opened product store");
        Ok(Self { pool })
    }

    /// Connects and applies pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        let store = Self::connect(path).await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Read-only handle for reporting code; never creates or migrates.
    pub async fn open_read_only(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// A private in-memory database with the schema applied.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        let registry = migrations::registry().map_err(|e| MirrorError::Migration(format!("{:#}", e)))?;
        let runner = sqlite_migrator::MigrationRunner::with_config(
            self.pool.clone(),
            registry,
            migrations::migration_config(),
        );

        runner
            .initialize()
            .await
            .map_err(|e| MirrorError::Migration(format!("{:#}", e)))?;
        let results = runner
            .migrate_up(None)
            .await
            .map_err(|e| MirrorError::Migration(format!("{:#}", e)))?;

        if let Some(failed) = results.iter().find(|r| !r.success) {
            return Err(MirrorError::Migration(format!(
                "migration {} ({}) failed: {}",
                failed.version,
                failed.description,
                failed.error_message.as_deref().unwrap_or("unknown error")
            )));
        }
        if !results.is_empty() {
            tracing::info!(applied = results.len(), "schema migrations applied");
        }
        Ok(())
    }

    /// Upserts a batch in one transaction; any failure rolls back the whole batch.
    pub async fn upsert_batch(&self, batch: &[ProductRecord], synced_at: DateTime<Utc>) -> Result<UpsertCounts> {
        let mut counts = UpsertCounts::default();
        if batch.is_empty() {
            return Ok(counts);
        }

        let mut tx = self.pool.begin().await?;
        for record in batch {
            let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM products WHERE code = ?")
                .bind(&record.code)
                .fetch_optional(&mut *tx)
                .await?;

            let payload = &record.payload;
            sqlx::query(UPSERT_PRODUCT)
                .bind(&record.code)
                .bind(&record.name)
                .bind(&record.country)
                .bind(record.last_modified)
                .bind(synced_at)
                .bind(&payload.brands)
                .bind(&payload.categories)
                .bind(&payload.quantity)
                .bind(&payload.nutriscore_grade)
                .bind(&payload.ecoscore_grade)
                .bind(payload.nova_group)
                .bind(serde_json::to_string(&payload.nutriments)?)
                .bind(serde_json::to_string(&payload.ecoscore_data)?)
                .bind(serde_json::to_string(&payload.raw)?)
                .execute(&mut *tx)
                .await?;

            if exists.is_some() {
                counts.updated += 1;
            } else {
                counts.inserted += 1;
            }
        }
        tx.commit().await?;

        tracing::debug!(inserted = counts.inserted, updated = counts.updated, "batch committed");
        Ok(counts)
    }

    pub async fn is_reachable(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub async fn count_products(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn get_product(&self, code: &str) -> Result<Option<StoredProduct>> {
        let row = sqlx::query(&format!("{} WHERE code = ?", SELECT_PRODUCT))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(stored_product).transpose()
    }

    /// Products whose name contains `query`, most recently modified first.
    ///
    /// `%` and `_` in the query match literally. A blank query matches nothing.
    pub async fn search_by_name(&self, query: &str, limit: u32) -> Result<Vec<StoredProduct>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = format!(
            "%{}%",
            query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
        );

        let rows = sqlx::query(&format!(
            "{} WHERE product_name LIKE ? ESCAPE '\\' \
             ORDER BY last_modified_t IS NULL, last_modified_t DESC, code ASC LIMIT ?",
            SELECT_PRODUCT
        ))
        .bind(pattern)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(stored_product).collect()
    }

    /// Products for the given codes, in the order requested. Unknown codes are left out
    /// and repeated codes are returned once.
    pub async fn get_products_by_codes<S: AsRef<str>>(&self, codes: &[S]) -> Result<Vec<StoredProduct>> {
        let mut wanted: Vec<&str> = Vec::with_capacity(codes.len());
        for code in codes.iter().map(|c| c.as_ref().trim()) {
            if !code.is_empty() && !wanted.contains(&code) {
                wanted.push(code);
            }
        }

        let mut found: HashMap<String, StoredProduct> = HashMap::with_capacity(wanted.len());
        for chunk in wanted.chunks(CODES_PER_QUERY) {
            let mut query = QueryBuilder::<Sqlite>::new(SELECT_PRODUCT);
            query.push(" WHERE code IN (");
            let mut list = query.separated(", ");
            for code in chunk {
                list.push_bind(*code);
            }
            list.push_unseparated(")");

            for row in query.build().fetch_all(&self.pool).await? {
                let product = stored_product(&row)?;
                found.insert(product.record.code.clone(), product);
            }
        }

        Ok(wanted.into_iter().filter_map(|code| found.remove(code)).collect())
    }

    /// Most recently modified products first; rows without a timestamp come last.
    pub async fn recent_products(&self, limit: u32) -> Result<Vec<StoredProduct>> {
        let rows = sqlx::query(&format!(
            "{} ORDER BY last_modified_t IS NULL, last_modified_t DESC, code ASC LIMIT ?",
            SELECT_PRODUCT
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(stored_product).collect()
    }

    pub async fn read_meta(&self) -> Result<BTreeMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM sync_meta")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<(String, String)> { Ok((row.try_get("key")?, row.try_get("value")?)) })
            .collect()
    }

    /// Writes the freshness keys for a finished run.
    pub async fn record_sync(&self, summary: &SyncSummary) -> Result<()> {
        let summary_json = serde_json::to_string(summary)?;
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        for (key, value) in [
            (META_LAST_SYNC_UTC, summary.finished_at.to_rfc3339()),
            (META_LAST_SYNC_SUMMARY, summary_json),
        ] {
            sqlx::query(
                "INSERT INTO sync_meta (key, value, updated_at) VALUES (?, ?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn stored_product(row: &SqliteRow) -> Result<StoredProduct> {
    let json = |column: &str| -> Result<serde_json::Value> {
        let text: String = row.try_get(column)?;
        Ok(serde_json::from_str(&text)?)
    };

    Ok(StoredProduct {
        record: ProductRecord {
            code: row.try_get("code")?,
            name: row.try_get("product_name")?,
            country: row.try_get("countries")?,
            last_modified: row.try_get("last_modified_t")?,
            payload: ProductPayload {
                brands: row.try_get("brands")?,
                categories: row.try_get("categories")?,
                quantity: row.try_get("quantity")?,
                nutriscore_grade: row.try_get("nutriscore_grade")?,
                ecoscore_grade: row.try_get("ecoscore_grade")?,
                nova_group: row.try_get("nova_group")?,
                nutriments: json("nutriments_json")?,
                ecoscore_data: json("ecoscore_data_json")?,
                raw: json("raw_json")?,
            },
        },
        last_synced_at: row.try_get("last_synced_at")?,
    })
}
