use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, Result};

use crate::{Migration, VersionTracker};

/// Registry that manages all available migrations
pub struct MigrationRegistry {
    migrations: BTreeMap<u32, Box<dyn Migration>>,
}

impl MigrationRegistry {
    /// Create a new migration registry
    pub fn new() -> Self {
        Self {
            migrations: BTreeMap::new(),
        }
    }

    /// Register a migration; a duplicate version is an error
    pub fn register<M: Migration + 'static>(self, migration: M) -> Result<Self> {
        self.register_boxed(Box::new(migration))
    }

    /// Register a boxed migration
    pub fn register_boxed(mut self, migration: Box<dyn Migration>) -> Result<Self> {
        let version = migration.version();
        if self.migrations.contains_key(&version) {
            return Err(anyhow!("Migration version {} is already registered", version));
        }
        self.migrations.insert(version, migration);
        Ok(self)
    }

    /// Get all registered migrations sorted by version
    pub fn get_all_migrations(&self) -> Vec<&dyn Migration> {
        self.migrations.values().map(|m| m.as_ref()).collect()
    }

    /// Get a specific migration by version
    pub fn get_migration(&self, version: u32) -> Option<&dyn Migration> {
        self.migrations.get(&version).map(|m| m.as_ref())
    }

    /// Get all migration versions sorted
    pub fn get_versions(&self) -> Vec<u32> {
        self.migrations.keys().copied().collect()
    }

    /// Get pending migrations (not yet applied)
    pub async fn get_pending_migrations(
        &self,
        version_tracker: &VersionTracker,
    ) -> Result<Vec<&dyn Migration>> {
        let applied: HashSet<u32> = version_tracker
            .get_applied_migrations()
            .await?
            .into_iter()
            .map(|m| m.version)
            .collect();

        Ok(self
            .get_all_migrations()
            .into_iter()
            .filter(|m| !applied.contains(&m.version()))
            .collect())
    }

    /// Applied migrations newer than `target_version`, newest first
    pub async fn get_rollback_migrations(
        &self,
        version_tracker: &VersionTracker,
        target_version: Option<u32>,
    ) -> Result<Vec<&dyn Migration>> {
        let mut applied_versions: Vec<u32> = version_tracker
            .get_applied_migrations()
            .await?
            .into_iter()
            .map(|m| m.version)
            .collect();
        applied_versions.sort_by(|a, b| b.cmp(a));

        let mut rollback_migrations = Vec::new();
        for version in applied_versions {
            if let Some(target) = target_version {
                if version <= target {
                    break;
                }
            }

            let migration = self.get_migration(version).ok_or_else(|| {
                anyhow!("Migration version {} is applied but not found in registry", version)
            })?;
            rollback_migrations.push(migration);
        }

        Ok(rollback_migrations)
    }

    /// Validate migration sequence (starts at 1, no gaps)
    pub fn validate_sequence(&self) -> Result<()> {
        let versions = self.get_versions();

        if versions.is_empty() {
            return Ok(());
        }

        if versions[0] == 0 {
            return Err(anyhow!("Migration versions should start from 1, not 0"));
        }

        for pair in versions.windows(2) {
            if pair[1] != pair[0] + 1 {
                return Err(anyhow!(
                    "Gap in migration sequence: version {} is followed by version {}",
                    pair[0],
                    pair[1]
                ));
            }
        }

        tracing::debug!(
            "Migration sequence validation passed for {} migrations",
            versions.len()
        );
        Ok(())
    }

    /// Get migration plan (what will be executed)
    pub async fn get_migration_plan(
        &self,
        version_tracker: &VersionTracker,
        target_version: Option<u32>,
    ) -> Result<MigrationPlan> {
        let current_version = version_tracker.get_latest_version().await?.unwrap_or(0);

        let (plan_type, target_version, migrations) = match target_version {
            Some(target) if target < current_version => {
                let migrations = self
                    .get_rollback_migrations(version_tracker, Some(target))
                    .await?;
                (PlanType::Rollback, Some(target), migrations)
            }
            Some(target) if target > current_version => {
                if !self.has_migration(target) {
                    return Err(anyhow!("Migration version {} not found in registry", target));
                }
                let migrations = self
                    .get_pending_migrations(version_tracker)
                    .await?
                    .into_iter()
                    .filter(|m| m.version() <= target)
                    .collect();
                (PlanType::Forward, Some(target), migrations)
            }
            Some(target) => (PlanType::NoOp, Some(target), Vec::new()),
            None => {
                let migrations = self.get_pending_migrations(version_tracker).await?;
                let latest = migrations.last().map(|m| m.version());
                (PlanType::Forward, latest, migrations)
            }
        };

        Ok(MigrationPlan {
            plan_type,
            current_version,
            target_version,
            migrations: migrations
                .into_iter()
                .map(|m| MigrationInfo {
                    version: m.version(),
                    description: m.description().to_string(),
                })
                .collect(),
        })
    }

    /// Get the count of registered migrations
    pub fn count(&self) -> usize {
        self.migrations.len()
    }

    /// Check if a migration version exists in the registry
    pub fn has_migration(&self, version: u32) -> bool {
        self.migrations.contains_key(&version)
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Migration execution plan
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub plan_type: PlanType,
    pub current_version: u32,
    pub target_version: Option<u32>,
    pub migrations: Vec<MigrationInfo>,
}

impl MigrationPlan {
    /// Check if the plan has any migrations to execute
    pub fn has_migrations(&self) -> bool {
        !self.migrations.is_empty()
    }

    /// Get summary string for the plan
    pub fn summary(&self) -> String {
        match self.plan_type {
            PlanType::Forward if self.migrations.is_empty() => "No pending migrations".to_string(),
            PlanType::Forward => format!(
                "Apply {} migration(s) from version {} to {}",
                self.migrations.len(),
                self.current_version,
                self.target_version.unwrap_or(0)
            ),
            PlanType::Rollback => format!(
                "Rollback {} migration(s) from version {} to {}",
                self.migrations.len(),
                self.current_version,
                self.target_version.unwrap_or(0)
            ),
            PlanType::NoOp => "No migrations needed".to_string(),
        }
    }
}

/// Type of migration plan
#[derive(Debug, Clone, PartialEq)]
pub enum PlanType {
    Forward,
    Rollback,
    NoOp,
}

/// Information about a migration in a plan
#[derive(Debug, Clone)]
pub struct MigrationInfo {
    pub version: u32,
    pub description: String,
}
