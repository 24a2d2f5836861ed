//! CLI utilities for migration management
//!
//! Services embed [`MigrationCommand`] as a clap subcommand and hand the parsed
//! command, their pool and their registry to [`execute_command`].

use anyhow::{anyhow, Result};
use clap::Subcommand;
use sqlx::SqlitePool;

use crate::{MigrationConfig, MigrationRegistry, MigrationResult, MigrationRunner};

/// Migration subcommands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum MigrationCommand {
    /// Run all pending migrations
    Up {
        /// Show what would be executed without running it
        #[arg(long)]
        dry_run: bool,
    },
    /// Rollback the last migration
    Down {
        /// Show what would be executed without running it
        #[arg(long)]
        dry_run: bool,
    },
    /// Migrate to a specific version
    To {
        /// Target version number
        version: u32,
        /// Show what would be executed without running it
        #[arg(long)]
        dry_run: bool,
    },
    /// Show migration status
    Status,
    /// Show migration plan
    Plan {
        /// Target version (optional)
        version: Option<u32>,
    },
}

/// Execute a migration command, printing a human-readable report to stdout
pub async fn execute_command(
    pool: SqlitePool,
    config: MigrationConfig,
    registry: MigrationRegistry,
    command: MigrationCommand,
) -> Result<()> {
    let runner = MigrationRunner::with_config(pool, registry, config);
    runner.initialize().await?;

    match command {
        MigrationCommand::Up { dry_run } => {
            if dry_run {
                println!("🔍 DRY RUN: Showing what would be executed...");
                print_plan(&runner, None).await?;
                return Ok(());
            }
            println!("🚀 Running all pending migrations...");
            let results = runner.migrate_up(None).await?;
            if results.is_empty() {
                println!("✅ No pending migrations to apply");
            } else {
                print_results("Applied", &results)?;
            }
        }

        MigrationCommand::Down { dry_run } => {
            let current = runner.status().await?.current_version;
            if current == 0 {
                println!("✅ No migrations to rollback");
                return Ok(());
            }
            if dry_run {
                println!("🔍 DRY RUN: Showing what would be executed...");
                print_plan(&runner, Some(current - 1)).await?;
                return Ok(());
            }
            println!("⏪ Rolling back last migration...");
            let results = runner.rollback_one(None).await?;
            if results.is_empty() {
                println!("✅ No migrations to rollback");
            } else {
                print_results("Rolled back", &results)?;
            }
        }

        MigrationCommand::To { version, dry_run } => {
            if dry_run {
                println!("🔍 DRY RUN: Showing what would be executed...");
                print_plan(&runner, Some(version)).await?;
                return Ok(());
            }
            println!("🎯 Migrating to version {}...", version);
            let results = runner.migrate_to(version, None).await?;
            if results.is_empty() {
                println!("✅ Already at target version {}", version);
            } else {
                print_results("Executed", &results)?;
            }
        }

        MigrationCommand::Status => {
            let status = runner.status().await?;

            println!("📊 Migration Status for '{}'", status.service_name);
            println!("=================={}", "=".repeat(status.service_name.len()));
            println!("Current version: {}", status.current_version);
            println!("Latest available: {}", status.latest_available_version);
            println!("Pending migrations: {}", status.pending_count);
            println!("Total applied: {}", status.total_applied);
            println!("Total rolled back: {}", status.total_rolled_back);

            if status.total_applied > 0 {
                println!("Average duration: {:.1}ms", status.avg_duration_ms);
                println!("Total duration: {}ms", status.total_duration_ms);
            }

            println!();
            if status.is_up_to_date() {
                println!("✅ {}", status.summary());
            } else {
                println!("⚠️  {}", status.summary());
            }
        }

        MigrationCommand::Plan { version } => print_plan(&runner, version).await?,
    }

    Ok(())
}

async fn print_plan(runner: &MigrationRunner, version: Option<u32>) -> Result<()> {
    let plan = runner.plan(version).await?;

    println!("📋 Migration Plan for '{}'", runner.config().service_name);
    println!("================={}", "=".repeat(runner.config().service_name.len()));
    println!("{}", plan.summary());

    if plan.has_migrations() {
        println!("\nMigrations to execute:");
        for migration_info in &plan.migrations {
            println!("  {} - {}", migration_info.version, migration_info.description);
        }
    }
    Ok(())
}

/// Prints each result and fails when any step did not succeed
fn print_results(verb: &str, results: &[MigrationResult]) -> Result<()> {
    let failed: Vec<&MigrationResult> = results.iter().filter(|r| !r.success).collect();
    if failed.is_empty() {
        println!("✅ {} {} migration(s):", verb, results.len());
    } else {
        println!("❌ {} {} of {} migration(s) before a failure:", verb, results.len() - failed.len(), results.len());
    }

    for result in results {
        if result.success {
            println!(
                "  ✓ {}: {} ({}ms)",
                result.version, result.description, result.duration_ms
            );
        } else {
            println!(
                "  ✗ {}: {} - FAILED: {}",
                result.version,
                result.description,
                result.error_message.as_deref().unwrap_or("Unknown error")
            );
        }
    }

    match failed.first() {
        None => Ok(()),
        Some(first) => Err(anyhow!(
            "migration {} ({}) failed: {}",
            first.version,
            first.description,
            first.error_message.as_deref().unwrap_or("unknown error")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Migration;
    use async_trait::async_trait;
    use clap::Parser;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqliteConnection;

    struct CreateWidgets;

    #[async_trait]
    impl Migration for CreateWidgets {
        fn version(&self) -> u32 {
            1
        }

        fn description(&self) -> &str {
            "widgets"
        }

        async fn up(&self, conn: &mut SqliteConnection) -> Result<()> {
            sqlx::query("CREATE TABLE widgets (id INTEGER PRIMARY KEY)")
                .execute(&mut *conn)
                .await?;
            Ok(())
        }

        async fn down(&self, conn: &mut SqliteConnection) -> Result<()> {
            sqlx::query("DROP TABLE widgets").execute(&mut *conn).await?;
            Ok(())
        }
    }

    struct Typo;

    #[async_trait]
    impl Migration for Typo {
        fn version(&self) -> u32 {
            2
        }

        fn description(&self) -> &str {
            "typo"
        }

        async fn up(&self, conn: &mut SqliteConnection) -> Result<()> {
            sqlx::query("CREATE TABL oops (id INTEGER)").execute(&mut *conn).await?;
            Ok(())
        }

        async fn down(&self, _conn: &mut SqliteConnection) -> Result<()> {
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

    fn config() -> MigrationConfig {
        MigrationConfig::for_service("cli-test")
    }

    async fn current_version(pool: &SqlitePool) -> u32 {
        let registry = MigrationRegistry::new().register(CreateWidgets).unwrap();
        MigrationRunner::with_config(pool.clone(), registry, config())
            .status()
            .await
            .unwrap()
            .current_version
    }

    #[tokio::test]
    async fn test_failed_step_is_a_command_error() {
        let pool = memory_pool().await;
        let registry = MigrationRegistry::new()
            .register(CreateWidgets)
            .and_then(|r| r.register(Typo))
            .unwrap();

        let err = execute_command(pool.clone(), config(), registry, MigrationCommand::Up { dry_run: false })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("migration 2 (typo) failed"));
        assert_eq!(current_version(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_down_dry_run_keeps_schema() {
        let pool = memory_pool().await;
        let registry = || MigrationRegistry::new().register(CreateWidgets).unwrap();
        execute_command(pool.clone(), config(), registry(), MigrationCommand::Up { dry_run: false })
            .await
            .unwrap();

        execute_command(pool.clone(), config(), registry(), MigrationCommand::Down { dry_run: true })
            .await
            .unwrap();
        assert_eq!(current_version(&pool).await, 1);

        execute_command(pool.clone(), config(), registry(), MigrationCommand::Down { dry_run: false })
            .await
            .unwrap();
        assert_eq!(current_version(&pool).await, 0);
    }

    #[derive(Parser)]
    struct TestCli {
        #[command(subcommand)]
        command: MigrationCommand,
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = TestCli::parse_from(["migrate", "up", "--dry-run"]);
        assert_eq!(cli.command, MigrationCommand::Up { dry_run: true });

        let cli = TestCli::parse_from(["migrate", "to", "2"]);
        assert_eq!(
            cli.command,
            MigrationCommand::To {
                version: 2,
                dry_run: false
            }
        );

        let cli = TestCli::parse_from(["migrate", "plan"]);
        assert_eq!(cli.command, MigrationCommand::Plan { version: None });
    }
}
