use std::time::Instant;

use anyhow::{anyhow, Result};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    Migration, MigrationConfig, MigrationOptions, MigrationPlan, MigrationRegistry,
    MigrationResult, PlanType, VersionTracker,
};

/// Executes migrations against a SQLite pool
pub struct MigrationRunner {
    pool: SqlitePool,
    registry: MigrationRegistry,
    version_tracker: VersionTracker,
    config: MigrationConfig,
}

impl MigrationRunner {
    /// Create a new migration runner with default configuration
    pub fn new(pool: SqlitePool, registry: MigrationRegistry) -> Self {
        Self::with_config(pool, registry, MigrationConfig::default())
    }

    /// Create a new migration runner with custom configuration
    pub fn with_config(pool: SqlitePool, registry: MigrationRegistry, config: MigrationConfig) -> Self {
        let version_tracker = VersionTracker::new(&pool, &config);
        Self {
            pool,
            registry,
            version_tracker,
            config,
        }
    }

    /// Initialize the migration system
    pub async fn initialize(&self) -> Result<()> {
        self.version_tracker.initialize().await?;
        self.registry.validate_sequence()?;
        tracing::info!(
            "Migration system initialized for service '{}' with {} migrations",
            self.config.service_name,
            self.registry.count()
        );
        Ok(())
    }

    /// Run all pending migrations
    pub async fn migrate_up(&self, options: Option<MigrationOptions>) -> Result<Vec<MigrationResult>> {
        let options = options.unwrap_or_default();
        let plan = self.registry.get_migration_plan(&self.version_tracker, None).await?;

        if !plan.has_migrations() {
            tracing::info!(
                "No pending migrations to apply for service '{}'",
                self.config.service_name
            );
            return Ok(Vec::new());
        }

        self.execute_plan(plan, options).await
    }

    /// Migrate forward or backward to a specific version
    pub async fn migrate_to(
        &self,
        target_version: u32,
        options: Option<MigrationOptions>,
    ) -> Result<Vec<MigrationResult>> {
        let options = options.unwrap_or_default();
        let plan = self
            .registry
            .get_migration_plan(&self.version_tracker, Some(target_version))
            .await?;

        if !plan.has_migrations() {
            tracing::info!(
                "No migrations needed to reach version {} for service '{}'",
                target_version,
                self.config.service_name
            );
            return Ok(Vec::new());
        }

        self.execute_plan(plan, options).await
    }

    /// Rollback the last migration
    pub async fn rollback_one(&self, options: Option<MigrationOptions>) -> Result<Vec<MigrationResult>> {
        let current_version = self.version_tracker.get_latest_version().await?.unwrap_or(0);
        if current_version == 0 {
            return Err(anyhow!(
                "No migrations to rollback for service '{}'",
                self.config.service_name
            ));
        }

        self.rollback_to(current_version - 1, options).await
    }

    /// Rollback to a specific version
    pub async fn rollback_to(
        &self,
        target_version: u32,
        options: Option<MigrationOptions>,
    ) -> Result<Vec<MigrationResult>> {
        let options = options.unwrap_or_default();
        let plan = self
            .registry
            .get_migration_plan(&self.version_tracker, Some(target_version))
            .await?;

        if !plan.has_migrations() {
            return Ok(Vec::new());
        }

        if plan.plan_type != PlanType::Rollback {
            return Err(anyhow!("Expected rollback plan, got {:?}", plan.plan_type));
        }

        self.execute_plan(plan, options).await
    }

    /// Get migration status
    pub async fn status(&self) -> Result<MigrationRunnerStatus> {
        let all_versions = self.registry.get_versions();
        let latest_available = all_versions.last().copied().unwrap_or(0);

        let current_version = self.version_tracker.get_latest_version().await?.unwrap_or(0);
        let stats = self.version_tracker.get_stats().await?;

        Ok(MigrationRunnerStatus {
            service_name: self.config.service_name.clone(),
            current_version,
            pending_count: all_versions.iter().filter(|&&v| v > current_version).count(),
            latest_available_version: latest_available,
            total_applied: stats.total_applied,
            total_rolled_back: stats.total_rolled_back,
            avg_duration_ms: stats.avg_duration_ms,
            total_duration_ms: stats.total_duration_ms,
        })
    }

    /// Get detailed migration plan without executing
    pub async fn plan(&self, target_version: Option<u32>) -> Result<MigrationPlan> {
        self.registry
            .get_migration_plan(&self.version_tracker, target_version)
            .await
    }

    /// Execute a plan, stopping at the first failed step
    async fn execute_plan(&self, plan: MigrationPlan, options: MigrationOptions) -> Result<Vec<MigrationResult>> {
        tracing::info!(
            "Executing migration plan for service '{}': {}",
            self.config.service_name,
            plan.summary()
        );

        if options.dry_run {
            tracing::info!(
                "DRY RUN: Would execute {} migrations for service '{}'",
                plan.migrations.len(),
                self.config.service_name
            );
            return Ok(Vec::new());
        }

        let mut results = Vec::new();

        for migration_info in &plan.migrations {
            let migration = self
                .registry
                .get_migration(migration_info.version)
                .ok_or_else(|| anyhow!("Migration {} not found in registry", migration_info.version))?;

            let result = match plan.plan_type {
                PlanType::Forward => self.execute_migration_up(migration, &options).await?,
                PlanType::Rollback => self.execute_migration_down(migration, &options).await?,
                PlanType::NoOp => break,
            };

            let failed = !result.success;
            results.push(result);
            if failed {
                break;
            }
        }

        Ok(results)
    }

    /// Execute a single migration (up) in its own transaction
    async fn execute_migration_up(&self, migration: &dyn Migration, options: &MigrationOptions) -> Result<MigrationResult> {
        let version = migration.version();
        let description = migration.description().to_string();

        tracing::info!(
            "Applying migration {} for service '{}': {}",
            version,
            self.config.service_name,
            description
        );

        if self.version_tracker.is_applied(version).await? {
            return Err(anyhow!(
                "Migration {} is already applied for service '{}'",
                version,
                self.config.service_name
            ));
        }

        let executed_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        if let Err(e) = migration.validate(&mut tx).await {
            tracing::error!(
                "Migration {} validation failed for service '{}': {}",
                version,
                self.config.service_name,
                e
            );
            tx.rollback().await?;
            return Ok(MigrationResult::failure(
                version,
                description,
                executed_at,
                0,
                format!("Validation failed: {}", e),
            ));
        }

        let start_time = Instant::now();
        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let outcome = tokio::time::timeout(timeout, migration.up(&mut tx)).await;
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(())) => {
                let result = MigrationResult::success(version, description, executed_at, duration_ms);
                self.version_tracker.record_migration(&mut tx, &result).await?;
                tx.commit().await?;
                tracing::info!(
                    "Migration {} applied successfully for service '{}' in {}ms",
                    version,
                    self.config.service_name,
                    duration_ms
                );
                Ok(result)
            }
            Ok(Err(e)) => {
                tx.rollback().await?;
                tracing::error!(
                    "Migration {} failed for service '{}': {}",
                    version,
                    self.config.service_name,
                    e
                );
                Ok(MigrationResult::failure(version, description, executed_at, duration_ms, e.to_string()))
            }
            Err(_) => {
                tx.rollback().await?;
                tracing::error!(
                    "Migration {} timed out for service '{}'",
                    version,
                    self.config.service_name
                );
                Ok(MigrationResult::failure(
                    version,
                    description,
                    executed_at,
                    duration_ms,
                    "Migration timed out".to_string(),
                ))
            }
        }
    }

    /// Execute a single migration (down) in its own transaction
    async fn execute_migration_down(&self, migration: &dyn Migration, options: &MigrationOptions) -> Result<MigrationResult> {
        let version = migration.version();
        let description = format!("Rollback: {}", migration.description());

        tracing::info!(
            "Rolling back migration {} for service '{}': {}",
            version,
            self.config.service_name,
            migration.description()
        );

        if !self.version_tracker.is_applied(version).await? {
            return Err(anyhow!(
                "Migration {} is not applied for service '{}', cannot rollback",
                version,
                self.config.service_name
            ));
        }

        let executed_at = Utc::now();
        let start_time = Instant::now();
        let mut tx = self.pool.begin().await?;

        let timeout = options.timeout.unwrap_or(self.config.default_timeout);
        let outcome = tokio::time::timeout(timeout, migration.down(&mut tx)).await;
        let duration_ms = start_time.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(())) => {
                self.version_tracker.record_rollback(&mut tx, version).await?;
                tx.commit().await?;
                tracing::info!(
                    "Migration {} rolled back successfully for service '{}' in {}ms",
                    version,
                    self.config.service_name,
                    duration_ms
                );
                Ok(MigrationResult::success(version, description, executed_at, duration_ms))
            }
            Ok(Err(e)) => {
                tx.rollback().await?;
                tracing::error!(
                    "Migration {} rollback failed for service '{}': {}",
                    version,
                    self.config.service_name,
                    e
                );
                Ok(MigrationResult::failure(version, description, executed_at, duration_ms, e.to_string()))
            }
            Err(_) => {
                tx.rollback().await?;
                Ok(MigrationResult::failure(
                    version,
                    description,
                    executed_at,
                    duration_ms,
                    "Rollback timed out".to_string(),
                ))
            }
        }
    }

    /// Get the version tracker reference
    pub fn version_tracker(&self) -> &VersionTracker {
        &self.version_tracker
    }

    /// Get the registry reference
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Get the configuration reference
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }
}

/// Migration status report
#[derive(Debug, Clone)]
pub struct MigrationRunnerStatus {
    pub service_name: String,
    pub current_version: u32,
    pub latest_available_version: u32,
    pub pending_count: usize,
    pub total_applied: u32,
    pub total_rolled_back: u32,
    pub avg_duration_ms: f64,
    pub total_duration_ms: i64,
}

impl MigrationRunnerStatus {
    /// Check if migrations are up to date
    pub fn is_up_to_date(&self) -> bool {
        self.current_version == self.latest_available_version
    }

    /// Get a summary string
    pub fn summary(&self) -> String {
        if self.is_up_to_date() {
            format!(
                "Service '{}' is up to date at version {}",
                self.service_name, self.current_version
            )
        } else {
            format!(
                "Service '{}' at version {}, {} migration(s) pending (latest: {})",
                self.service_name,
                self.current_version,
                self.pending_count,
                self.latest_available_version
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqliteConnection;

    struct CreateTable {
        version: u32,
        table: &'static str,
    }

    #[async_trait]
    impl Migration for CreateTable {
        fn version(&self) -> u32 {
            self.version
        }

        fn description(&self) -> &str {
            self.table
        }

        async fn up(&self, conn: &mut SqliteConnection) -> anyhow::Result<()> {
            sqlx::query(&format!("CREATE TABLE {} (id INTEGER PRIMARY KEY)", self.table))
                .execute(&mut *conn)
                .await?;
            Ok(())
        }

        async fn down(&self, conn: &mut SqliteConnection) -> anyhow::Result<()> {
            sqlx::query(&format!("DROP TABLE {}", self.table))
                .execute(&mut *conn)
                .await?;
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Migration for Broken {
        fn version(&self) -> u32 {
            3
        }

        fn description(&self) -> &str {
            "creates a table then fails"
        }

        async fn up(&self, conn: &mut SqliteConnection) -> anyhow::Result<()> {
            sqlx::query("CREATE TABLE half_done (id INTEGER)")
                .execute(&mut *conn)
                .await?;
            Err(anyhow!("boom"))
        }

        async fn down(&self, _conn: &mut SqliteConnection) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn registry() -> MigrationRegistry {
        MigrationRegistry::new()
            .register(CreateTable { version: 1, table: "alpha" })
            .and_then(|r| r.register(CreateTable { version: 2, table: "beta" }))
            .unwrap()
    }

    async fn table_exists(pool: &SqlitePool, name: &str) -> bool {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(name)
        .fetch_one(pool)
        .await
        .unwrap();
        count == 1
    }

    #[tokio::test]
    async fn test_migrate_up_then_noop() {
        let pool = memory_pool().await;
        let runner = MigrationRunner::with_config(pool.clone(), registry(), MigrationConfig::for_service("test"));
        runner.initialize().await.unwrap();

        let results = runner.migrate_up(None).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        assert!(table_exists(&pool, "alpha").await);
        assert!(table_exists(&pool, "beta").await);

        let status = runner.status().await.unwrap();
        assert!(status.is_up_to_date());
        assert_eq!(status.current_version, 2);

        assert!(runner.migrate_up(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rollback_and_reapply() {
        let pool = memory_pool().await;
        let runner = MigrationRunner::new(pool.clone(), registry());
        runner.initialize().await.unwrap();
        runner.migrate_up(None).await.unwrap();

        let results = runner.rollback_one(None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!table_exists(&pool, "beta").await);
        assert_eq!(runner.status().await.unwrap().current_version, 1);

        let results = runner.migrate_to(2, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(table_exists(&pool, "beta").await);
    }

    #[tokio::test]
    async fn test_dry_run_applies_nothing() {
        let pool = memory_pool().await;
        let runner = MigrationRunner::new(pool.clone(), registry());
        runner.initialize().await.unwrap();

        let options = MigrationOptions {
            dry_run: true,
            ..Default::default()
        };
        assert!(runner.migrate_up(Some(options)).await.unwrap().is_empty());
        assert!(!table_exists(&pool, "alpha").await);
        assert_eq!(runner.status().await.unwrap().pending_count, 2);
    }

    #[tokio::test]
    async fn test_failed_migration_rolls_back_its_transaction() {
        let pool = memory_pool().await;
        let registry = registry().register(Broken).unwrap();
        let runner = MigrationRunner::new(pool.clone(), registry);
        runner.initialize().await.unwrap();

        let results = runner.migrate_up(None).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(!results[2].success);
        assert!(!table_exists(&pool, "half_done").await);
        assert_eq!(runner.status().await.unwrap().current_version, 2);
    }

    #[test]
    fn test_migration_status_summary() {
        let status = MigrationRunnerStatus {
            service_name: "test-service".to_string(),
            current_version: 3,
            latest_available_version: 5,
            pending_count: 2,
            total_applied: 3,
            total_rolled_back: 0,
            avg_duration_ms: 100.0,
            total_duration_ms: 300,
        };

        assert!(!status.is_up_to_date());
        assert!(status.summary().contains("2 migration(s) pending"));
    }
}
