use sqlite_migrator::{MigrationConfig, MigrationRegistry};

pub mod m001_create_products;
pub mod m002_create_sync_meta;

pub use m001_create_products::CreateProducts;
pub use m002_create_sync_meta::CreateSyncMeta;

pub const SERVICE_NAME: &str = "food-mirror";

/// All schema migrations of the mirror, in order.
pub fn registry() -> anyhow::Result<MigrationRegistry> {
    MigrationRegistry::new()
        .register(CreateProducts)?
        .register(CreateSyncMeta)
}

pub fn migration_config() -> MigrationConfig {
    MigrationConfig::for_service(SERVICE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlite_migrator::MigrationRunner;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn table_exists(pool: &sqlx::SqlitePool, name: &str) -> bool {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_one(pool)
            .await
            .unwrap();
        n == 1
    }

    #[tokio::test]
    async fn schema_migrates_up_and_down() {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let runner = MigrationRunner::with_config(pool.clone(), registry().unwrap(), migration_config());
        runner.initialize().await.unwrap();

        let applied = runner.migrate_up(None).await.unwrap();
        assert_eq!(applied.iter().map(|r| r.version).collect::<Vec<_>>(), vec![1, 2]);
        assert!(applied.iter().all(|r| r.success));
        assert!(table_exists(&pool, "products").await);
        assert!(table_exists(&pool, "sync_meta").await);
        assert!(runner.status().await.unwrap().is_up_to_date());

        runner.rollback_to(1, None).await.unwrap();
        assert!(!table_exists(&pool, "sync_meta").await);
        assert!(table_exists(&pool, "products").await);
        assert_eq!(runner.status().await.unwrap().current_version, 1);
    }

    #[tokio::test]
    async fn blank_codes_are_rejected_by_the_schema() {
        let pool = SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap();
        let runner = MigrationRunner::with_config(pool.clone(), registry().unwrap(), migration_config());
        runner.initialize().await.unwrap();
        runner.migrate_up(None).await.unwrap();

        let res = sqlx::query("INSERT INTO products (code, last_synced_at) VALUES ('  ', '2024-01-01T00:00:00Z')")
            .execute(&pool)
            .await;
        assert!(res.is_err());
    }
}
