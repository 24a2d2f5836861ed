//! # SQLite Migrator
//!
//! A small, versioned SQLite migration framework for Rust services.
//!
//! ## Features
//!
//! - **Explicit Registration**: Services build a [`MigrationRegistry`] from their own migration list
//! - **Transactional Steps**: Each migration and its version record commit together
//! - **CLI Support**: Clap subcommands for status, plan, up, down and to
//! - **Service Isolation**: Version rows are keyed by service name
//! - **Rollback Support**: Bidirectional migrations with recorded rollbacks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sqlite_migrator::{Migration, MigrationRegistry};
//! use async_trait::async_trait;
//! use sqlx::SqliteConnection;
//! use anyhow::Result;
//!
//! pub struct CreateUsers;
//!
//! #[async_trait]
//! impl Migration for CreateUsers {
//!     fn version(&self) -> u32 { 1 }
//!     fn description(&self) -> &str { "Create users table" }
//!
//!     async fn up(&self, conn: &mut SqliteConnection) -> Result<()> {
//!         sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY)")
//!             .execute(&mut *conn)
//!             .await?;
//!         Ok(())
//!     }
//!
//!     async fn down(&self, conn: &mut SqliteConnection) -> Result<()> {
//!         sqlx::query("DROP TABLE users").execute(&mut *conn).await?;
//!         Ok(())
//!     }
//! }
//!
//! # fn build() -> Result<MigrationRegistry> {
//! MigrationRegistry::new().register(CreateUsers)
//! # }
//! ```

pub mod migration;
pub mod registry;
pub mod runner;
pub mod version;

#[cfg(feature = "cli")]
pub mod cli;

pub use migration::{Migration, MigrationOptions, MigrationResult, MigrationStatus};
pub use registry::{MigrationInfo, MigrationPlan, MigrationRegistry, PlanType};
pub use runner::{MigrationRunner, MigrationRunnerStatus};
pub use version::{MigrationStats, MigrationVersion, VersionTracker};

#[cfg(feature = "cli")]
pub use cli::{execute_command, MigrationCommand};

/// Configuration for the migration system
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Name of the table that stores applied versions
    pub version_table: String,
    /// Service name for logging and identification
    pub service_name: String,
    /// Default timeout for a single migration step
    pub default_timeout: std::time::Duration,
}

impl MigrationConfig {
    pub fn for_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            version_table: "_migrations".to_string(),
            service_name: "default".to_string(),
            default_timeout: std::time::Duration::from_secs(300), // 5 minutes
        }
    }
}
