use anyhow::Result;
use async_trait::async_trait;
use sqlite_migrator::Migration;
use sqlx::SqliteConnection;

/// Key/value table for sync freshness (last_sync_utc, last_sync_summary)
pub struct CreateSyncMeta;

#[async_trait]
impl Migration for CreateSyncMeta {
    fn version(&self) -> u32 { 2 }
    fn description(&self) -> &str { "Create sync_meta key/value table" }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            "CREATE TABLE sync_meta (
                key        TEXT PRIMARY KEY NOT NULL,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS sync_meta").execute(&mut *conn).await?;
        Ok(())
    }
}
