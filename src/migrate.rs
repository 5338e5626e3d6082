use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::sqlite_index::{IMAGE_TABLE, TEXT_TABLE};

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create both index tables and their lookup indexes. Idempotent.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    for table in [TEXT_TABLE, IMAGE_TABLE] {
        // One row per card per modality; metadata columns are duplicated
        // across the two tables so each can be filtered on its own.
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                year TEXT NOT NULL,
                manufacturer TEXT NOT NULL,
                grade INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                metadata_json TEXT NOT NULL,
                dims INTEGER NOT NULL,
                embedding BLOB NOT NULL
            )
            "#
        ))
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_created_at ON {table}(created_at DESC)"
        ))
        .execute(pool)
        .await?;
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_subject ON {table}(subject)"
        ))
        .execute(pool)
        .await?;
    }

    info!("database schema is up to date");
    Ok(())
}
