use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::{MigrationConfig, MigrationResult, MigrationStatus};

/// Represents a migration version record stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationVersion {
    pub version: u32,
    pub description: String,
    pub applied_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub rolled_back_at: Option<DateTime<Utc>>,
    pub service_name: String,
}

impl MigrationVersion {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let version: i64 = row.try_get("version")?;
        let duration_ms: i64 = row.try_get("duration_ms")?;
        Ok(Self {
            version: u32::try_from(version).context("stored migration version out of range")?,
            description: row.try_get("description")?,
            applied_at: row.try_get("applied_at")?,
            duration_ms: u64::try_from(duration_ms).unwrap_or(0),
            rolled_back_at: row.try_get("rolled_back_at")?,
            service_name: row.try_get("service_name")?,
        })
    }
}

/// Tracks migration versions in the database
pub struct VersionTracker {
    pool: SqlitePool,
    table: String,
    service_name: String,
}

impl VersionTracker {
    /// Create a new version tracker with configuration
    pub fn new(pool: &SqlitePool, config: &MigrationConfig) -> Self {
        Self {
            pool: pool.clone(),
            table: config.version_table.clone(),
            service_name: config.service_name.clone(),
        }
    }

    /// Create the version table if it does not exist yet
    pub async fn initialize(&self) -> Result<()> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                service_name   TEXT    NOT NULL,
                version        INTEGER NOT NULL,
                description    TEXT    NOT NULL,
                applied_at     TEXT    NOT NULL,
                duration_ms    INTEGER NOT NULL DEFAULT 0,
                rolled_back_at TEXT,
                PRIMARY KEY (service_name, version)
            )",
            self.table
        );
        sqlx::query(&ddl).execute(&self.pool).await?;

        tracing::info!(
            "Migration version tracking initialized for service: {}",
            self.service_name
        );
        Ok(())
    }

    /// Record that a migration has been applied.
    ///
    /// Runs on the caller's connection so the record shares the migration's transaction.
    pub async fn record_migration(
        &self,
        conn: &mut SqliteConnection,
        result: &MigrationResult,
    ) -> Result<()> {
        if !result.success {
            return Ok(());
        }

        let sql = format!(
            "INSERT INTO {} (service_name, version, description, applied_at, duration_ms, rolled_back_at)
             VALUES (?, ?, ?, ?, ?, NULL)
             ON CONFLICT(service_name, version) DO UPDATE SET
                description = excluded.description,
                applied_at = excluded.applied_at,
                duration_ms = excluded.duration_ms,
                rolled_back_at = NULL",
            self.table
        );
        sqlx::query(&sql)
            .bind(&self.service_name)
            .bind(i64::from(result.version))
            .bind(&result.description)
            .bind(result.executed_at)
            .bind(i64::try_from(result.duration_ms).unwrap_or(i64::MAX))
            .execute(&mut *conn)
            .await?;

        tracing::info!(
            "Recorded migration version {} for service {}",
            result.version,
            self.service_name
        );
        Ok(())
    }

    /// Record that a migration has been rolled back
    pub async fn record_rollback(&self, conn: &mut SqliteConnection, version: u32) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET rolled_back_at = ? WHERE service_name = ? AND version = ?",
            self.table
        );
        sqlx::query(&sql)
            .bind(Utc::now())
            .bind(&self.service_name)
            .bind(i64::from(version))
            .execute(&mut *conn)
            .await?;

        tracing::info!(
            "Recorded rollback for migration version {} in service {}",
            version,
            self.service_name
        );
        Ok(())
    }

    /// Get all applied migrations for this service, sorted by version
    pub async fn get_applied_migrations(&self) -> Result<Vec<MigrationVersion>> {
        let sql = format!(
            "SELECT * FROM {} WHERE service_name = ? AND rolled_back_at IS NULL ORDER BY version ASC",
            self.table
        );
        let rows = sqlx::query(&sql)
            .bind(&self.service_name)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(MigrationVersion::from_row).collect()
    }

    /// Get the latest applied migration version for this service
    pub async fn get_latest_version(&self) -> Result<Option<u32>> {
        let sql = format!(
            "SELECT MAX(version) FROM {} WHERE service_name = ? AND rolled_back_at IS NULL",
            self.table
        );
        let latest: Option<i64> = sqlx::query_scalar(&sql)
            .bind(&self.service_name)
            .fetch_one(&self.pool)
            .await?;

        latest
            .map(|v| u32::try_from(v).context("stored migration version out of range"))
            .transpose()
    }

    /// Check if a specific migration version has been applied for this service
    pub async fn is_applied(&self, version: u32) -> Result<bool> {
        Ok(self.get_status(version).await? == MigrationStatus::Applied)
    }

    /// Get migration status for a specific version
    pub async fn get_status(&self, version: u32) -> Result<MigrationStatus> {
        let sql = format!(
            "SELECT * FROM {} WHERE service_name = ? AND version = ?",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(&self.service_name)
            .bind(i64::from(version))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(MigrationStatus::Pending),
            Some(row) => {
                let record = MigrationVersion::from_row(&row)?;
                if record.rolled_back_at.is_some() {
                    Ok(MigrationStatus::RolledBack)
                } else {
                    Ok(MigrationStatus::Applied)
                }
            }
        }
    }

    /// Get statistics about migrations for this service
    pub async fn get_stats(&self) -> Result<MigrationStats> {
        let sql = format!(
            "SELECT
                COALESCE(SUM(CASE WHEN rolled_back_at IS NULL THEN 1 ELSE 0 END), 0) AS applied,
                COALESCE(SUM(CASE WHEN rolled_back_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS rolled_back,
                COALESCE(SUM(CASE WHEN rolled_back_at IS NULL THEN duration_ms ELSE 0 END), 0) AS total_duration
             FROM {} WHERE service_name = ?",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(&self.service_name)
            .fetch_one(&self.pool)
            .await?;

        let total_applied: i64 = row.try_get("applied")?;
        let total_rolled_back: i64 = row.try_get("rolled_back")?;
        let total_duration_ms: i64 = row.try_get("total_duration")?;
        let avg_duration_ms = if total_applied > 0 {
            total_duration_ms as f64 / total_applied as f64
        } else {
            0.0
        };

        Ok(MigrationStats {
            total_applied: u32::try_from(total_applied).unwrap_or(u32::MAX),
            total_rolled_back: u32::try_from(total_rolled_back).unwrap_or(u32::MAX),
            latest_version: self.get_latest_version().await?,
            avg_duration_ms,
            total_duration_ms,
            service_name: self.service_name.clone(),
        })
    }

    /// Get the service name this tracker is managing
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Migration statistics
#[derive(Debug, Clone)]
pub struct MigrationStats {
    pub total_applied: u32,
    pub total_rolled_back: u32,
    pub latest_version: Option<u32>,
    pub avg_duration_ms: f64,
    pub total_duration_ms: i64,
    pub service_name: String,
}

impl MigrationStats {
    /// Check if there are any applied migrations
    pub fn has_migrations(&self) -> bool {
        self.total_applied > 0
    }

    /// Get a summary string of the migration stats
    pub fn summary(&self) -> String {
        match self.latest_version {
            Some(version) => format!(
                "Service '{}' at version {}, {} applied, {} rolled back",
                self.service_name, version, self.total_applied, self.total_rolled_back
            ),
            None => format!("Service '{}' has no applied migrations", self.service_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_record_and_rollback() {
        let pool = memory_pool().await;
        let tracker = VersionTracker::new(&pool, &MigrationConfig::for_service("svc"));
        tracker.initialize().await.unwrap();
        assert_eq!(tracker.get_latest_version().await.unwrap(), None);

        let mut conn = pool.acquire().await.unwrap();
        let applied = MigrationResult::success(1, "first".into(), Utc::now(), 4);
        tracker.record_migration(&mut conn, &applied).await.unwrap();
        drop(conn);

        assert_eq!(tracker.get_latest_version().await.unwrap(), Some(1));
        assert!(tracker.is_applied(1).await.unwrap());

        let mut conn = pool.acquire().await.unwrap();
        tracker.record_rollback(&mut conn, 1).await.unwrap();
        drop(conn);

        assert_eq!(tracker.get_status(1).await.unwrap(), MigrationStatus::RolledBack);
        assert_eq!(tracker.get_latest_version().await.unwrap(), None);

        let stats = tracker.get_stats().await.unwrap();
        assert_eq!(stats.total_applied, 0);
        assert_eq!(stats.total_rolled_back, 1);
    }

    #[tokio::test]
    async fn test_failed_result_not_recorded() {
        let pool = memory_pool().await;
        let tracker = VersionTracker::new(&pool, &MigrationConfig::for_service("svc"));
        tracker.initialize().await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let failed = MigrationResult::failure(1, "first".into(), Utc::now(), 1, "boom".into());
        tracker.record_migration(&mut conn, &failed).await.unwrap();
        drop(conn);

        assert_eq!(tracker.get_status(1).await.unwrap(), MigrationStatus::Pending);
    }

    #[test]
    fn test_migration_stats_no_migrations() {
        let stats = MigrationStats {
            total_applied: 0,
            total_rolled_back: 0,
            latest_version: None,
            avg_duration_ms: 0.0,
            total_duration_ms: 0,
            service_name: "empty-service".to_string(),
        };

        assert!(!stats.has_migrations());
        assert!(stats.summary().contains("no applied migrations"));
    }
}
