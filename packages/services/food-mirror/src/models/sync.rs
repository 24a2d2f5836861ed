use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::product::ProductRecord;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum SyncPhase {
    Idle,
    Fetching,
    Upserting { page: u32 },
    Completed,
    Aborted,
}

impl SyncPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Completed | SyncPhase::Aborted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Completed,
    Aborted,
}

/// One element of the recent-pages stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PageOutcome {
    Fetched { page: u32, records: Vec<Value> },
    Skipped { page: u32, attempts: u32, reason: String },
}

impl PageOutcome {
    pub fn page(&self) -> u32 {
        match self {
            PageOutcome::Fetched { page, .. } | PageOutcome::Skipped { page, .. } => *page,
        }
    }
}

/// Outcome of refreshing a single product by code.
#[derive(Debug, Clone, PartialEq)]
pub enum ProductRefresh {
    /// The catalog has no product with this code.
    NotFound,
    /// The catalog answered with a record the normalizer dropped.
    Rejected,
    Stored { record: ProductRecord, inserted: bool },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub updated: u64,
    pub failed: u64,
}

/// Mutable state of a single run.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub run_id: Uuid,
    pub country: String,
    pub page_size: u32,
    pub started_at: DateTime<Utc>,
    pub phase: SyncPhase,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub records_seen: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl SyncRun {
    pub fn new(country: impl Into<String>, page_size: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            country: country.into(),
            page_size,
            started_at: Utc::now(),
            phase: SyncPhase::Idle,
            pages_fetched: 0,
            pages_failed: 0,
            records_seen: 0,
            inserted: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
        }
    }

    pub fn transition(&mut self, next: SyncPhase) {
        tracing::debug!(from = ?self.phase, to = ?next, "sync phase transition");
        self.phase = next;
    }

    pub fn record_upsert(&mut self, counts: UpsertCounts) {
        self.inserted += counts.inserted;
        self.updated += counts.updated;
        self.failed += counts.failed;
    }

    /// A skipped page is charged as a full page of failed records.
    pub fn record_skipped_page(&mut self) {
        self.pages_failed += 1;
        self.failed += u64::from(self.page_size);
    }

    pub fn summary(&self, status: SyncStatus) -> SyncSummary {
        let finished_at = Utc::now();
        SyncSummary {
            run_id: self.run_id,
            status,
            country: self.country.clone(),
            pages_fetched: self.pages_fetched,
            pages_failed: self.pages_failed,
            records_seen: self.records_seen,
            inserted: self.inserted,
            updated: self.updated,
            skipped: self.skipped,
            failed: self.failed,
            started_at: self.started_at,
            finished_at,
            elapsed_ms: (finished_at - self.started_at).num_milliseconds().max(0) as u64,
        }
    }
}

/// What a finished run reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub run_id: Uuid,
    pub status: SyncStatus,
    pub country: String,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    pub records_seen: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}
