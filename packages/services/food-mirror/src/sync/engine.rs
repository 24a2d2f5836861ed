use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tracing::Instrument;

use crate::clients::*;
use crate::config::{Config, SyncSettings, TrustMode};
use crate::handlers::*;
use crate::mapping::normalize;
use crate::models::*;
use crate::storage::ProductStore;

/// Runs one fetch, normalize and upsert pass over the recent pages.
pub struct SyncEngine<T> {
    transport: Arc<T>,
    store: ProductStore,
    cfg: Config,
}

impl SyncEngine<CatalogClient> {
    /// Engine backed by the real catalog over HTTPS.
    pub fn with_catalog(store: ProductStore, cfg: Config, trust: &TrustMode) -> Result<Self> {
        let client = CatalogClient::new(&cfg, trust)?;
        Ok(Self::new(client, store, cfg))
    }
}

impl<T: Transport> SyncEngine<T> {
    pub fn new(transport: T, store: ProductStore, cfg: Config) -> Self {
        Self {
            transport: Arc::new(transport),
            store,
            cfg,
        }
    }

    pub fn store(&self) -> &ProductStore {
        &self.store
    }

    /// Executes a run. Partial failures are counted in the summary; trust,
    /// configuration and unreachable-store failures abort with the error.
    pub async fn execute_sync(&self, settings: &SyncSettings) -> Result<SyncSummary> {
        let trust = settings.validate()?;
        let run = SyncRun::new(settings.country.clone(), settings.page_size);
        let span = tracing::info_span!("sync_run", run_id = %run.run_id, country = %settings.country);
        self.drive(settings, trust, run).instrument(span).await
    }

    async fn drive(&self, settings: &SyncSettings, trust: TrustMode, mut run: SyncRun) -> Result<SyncSummary> {
        tracing::info!(
            recent_pages = settings.recent_pages,
            page_size = settings.page_size,
            trust = %trust,
            "Starting sync execution"
        );

        let fetcher = RecentPagesFetcher::new(Arc::clone(&self.transport), &self.cfg)?;
        run.transition(SyncPhase::Fetching);

        let pages = fetcher.fetch_recent_pages(PageQuery {
            country: settings.country.clone(),
            page_size: settings.page_size,
            max_pages: settings.recent_pages,
        });
        let mut pages = std::pin::pin!(pages);

        while let Some(item) = pages.next().await {
            let outcome = match item {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.abort(&mut run, e)),
            };

            match outcome {
                PageOutcome::Skipped { page, attempts, reason } => {
                    run.record_skipped_page();
                    tracing::warn!(page, attempts, reason = %reason, "page skipped");
                }
                PageOutcome::Fetched { page, records } => {
                    run.pages_fetched += 1;
                    run.transition(SyncPhase::Upserting { page });
                    if let Err(e) = self.upsert_page(&mut run, page, records).await {
                        return Err(self.abort(&mut run, e));
                    }
                    run.transition(SyncPhase::Fetching);
                }
            }
        }

        run.transition(SyncPhase::Completed);
        let summary = run.summary(SyncStatus::Completed);
        if let Err(e) = self.store.record_sync(&summary).await {
            tracing::warn!(error = %e, "failed to record sync metadata");
        }

        tracing::info!(
            pages_fetched = summary.pages_fetched,
            pages_failed = summary.pages_failed,
            records_seen = summary.records_seen,
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            duration_ms = summary.elapsed_ms,
            "Sync completed"
        );
        Ok(summary)
    }

    /// Normalizes and stores one page. Only an unreachable store is returned as an error.
    async fn upsert_page(&self, run: &mut SyncRun, page: u32, records: Vec<serde_json::Value>) -> Result<()> {
        let seen = records.len();
        run.records_seen += seen as u64;

        let batch: Vec<ProductRecord> = records
            .into_iter()
            .filter_map(|value| normalize(&RawProduct::from_value(value)))
            .collect();
        let dropped = seen - batch.len();
        if dropped > 0 {
            run.skipped += dropped as u64;
            tracing::debug!(page, dropped, "dropped records without a usable code");
        }

        match self.store.upsert_batch(&batch, Utc::now()).await {
            Ok(counts) => {
                run.record_upsert(counts);
                tracing::info!(page, inserted = counts.inserted, updated = counts.updated, skipped = dropped, "page stored");
                Ok(())
            }
            Err(e) => {
                run.failed += batch.len() as u64;
                tracing::error!(page, records = batch.len(), error = %e, "batch rolled back");
                if self.store.is_reachable().await {
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Fetches one product by code and upserts it, outside of any page run.
    pub async fn refresh_product(&self, code: &str) -> Result<ProductRefresh> {
        let lookup = ProductLookup::new(Arc::clone(&self.transport), &self.cfg)?;
        let Some(raw) = lookup.fetch_product(code).await? else {
            tracing::info!(code, "product not found in catalog");
            return Ok(ProductRefresh::NotFound);
        };
        let Some(record) = normalize(&RawProduct::from_value(raw)) else {
            tracing::warn!(code, "catalog returned a product without a usable code");
            return Ok(ProductRefresh::Rejected);
        };

        let counts = self.store.upsert_batch(std::slice::from_ref(&record), Utc::now()).await?;
        tracing::info!(code = %record.code, inserted = counts.inserted, updated = counts.updated, "product refreshed");
        Ok(ProductRefresh::Stored {
            inserted: counts.inserted > 0,
            record,
        })
    }

    fn abort(&self, run: &mut SyncRun, error: MirrorError) -> MirrorError {
        run.transition(SyncPhase::Aborted);
        tracing::error!(
            error = %error,
            pages_fetched = run.pages_fetched,
            inserted = run.inserted,
            updated = run.updated,
            "Sync aborted"
        );
        error
    }
}
