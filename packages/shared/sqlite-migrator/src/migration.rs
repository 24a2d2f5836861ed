use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

/// Represents a single migration that can be applied or rolled back.
///
/// `up` and `down` receive the connection of an open transaction; the runner
/// commits it together with the version record.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Unique version number for this migration
    fn version(&self) -> u32;

    /// Human-readable description of what this migration does
    fn description(&self) -> &str;

    /// Apply the migration (forward)
    async fn up(&self, conn: &mut SqliteConnection) -> Result<()>;

    /// Rollback the migration (backward)
    async fn down(&self, conn: &mut SqliteConnection) -> Result<()>;

    /// Optional: Validate that the migration can be safely applied
    async fn validate(&self, _conn: &mut SqliteConnection) -> Result<()> {
        Ok(())
    }
}

/// Migration execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationResult {
    pub version: u32,
    pub description: String,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Migration execution options
#[derive(Debug, Clone, Default)]
pub struct MigrationOptions {
    pub dry_run: bool,
    pub timeout: Option<std::time::Duration>,
}

/// Migration status
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationStatus {
    Pending,
    Applied,
    RolledBack,
}

impl MigrationResult {
    /// Create a successful migration result
    pub fn success(
        version: u32,
        description: String,
        executed_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> Self {
        Self {
            version,
            description,
            executed_at,
            duration_ms,
            success: true,
            error_message: None,
        }
    }

    /// Create a failed migration result
    pub fn failure(
        version: u32,
        description: String,
        executed_at: DateTime<Utc>,
        duration_ms: u64,
        error: String,
    ) -> Self {
        Self {
            version,
            description,
            executed_at,
            duration_ms,
            success: false,
            error_message: Some(error),
        }
    }
}
