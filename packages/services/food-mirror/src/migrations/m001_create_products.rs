use anyhow::Result;
use async_trait::async_trait;
use sqlite_migrator::Migration;
use sqlx::SqliteConnection;

/// Product mirror table keyed by catalog code
pub struct CreateProducts;

#[async_trait]
impl Migration for CreateProducts {
    fn version(&self) -> u32 { 1 }
    fn description(&self) -> &str { "Create products table and last_modified_t index" }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE products (
                code                TEXT PRIMARY KEY NOT NULL CHECK (length(trim(code)) > 0),
                product_name        TEXT NOT NULL DEFAULT '',
                countries           TEXT NOT NULL DEFAULT '',
                last_modified_t     INTEGER,
                last_synced_at      TEXT NOT NULL,
                brands              TEXT NOT NULL DEFAULT '',
                categories          TEXT NOT NULL DEFAULT '',
                quantity            TEXT NOT NULL DEFAULT '',
                nutriscore_grade    TEXT,
                ecoscore_grade      TEXT,
                nova_group          INTEGER,
                nutriments_json     TEXT NOT NULL DEFAULT '{}',
                ecoscore_data_json  TEXT NOT NULL DEFAULT '{}',
                raw_json            TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query("CREATE INDEX idx_products_last_modified ON products(last_modified_t DESC)")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DROP INDEX IF EXISTS idx_products_last_modified").execute(&mut *conn).await?;
        sqlx::query("DROP TABLE IF EXISTS products").execute(&mut *conn).await?;
        Ok(())
    }
}
