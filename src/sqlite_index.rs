//! SQLite-backed [`VectorIndex`].
//!
//! Each modality gets its own table (`text_index`, `image_index`). A row
//! holds the card's filterable columns, the full metadata as JSON and the
//! vector as a little-endian f32 BLOB. Filters run in SQL; similarity is a
//! brute-force cosine over the surviving rows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use slabvault_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use slabvault_core::models::{CardMetadata, Modality};
use slabvault_core::store::{IndexMatch, SearchFilters, VectorIndex};

pub const TEXT_TABLE: &str = "text_index";
pub const IMAGE_TABLE: &str = "image_index";

pub struct SqliteIndex {
    pool: SqlitePool,
    table: &'static str,
    name: &'static str,
    dims: usize,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool, modality: Modality, dims: usize) -> Self {
        let table = match modality {
            Modality::Text => TEXT_TABLE,
            Modality::Image => IMAGE_TABLE,
        };
        Self {
            pool,
            table,
            name: modality.as_str(),
            dims,
        }
    }
}

fn decode_metadata(row: &SqliteRow) -> Result<CardMetadata> {
    let json: String = row.get("metadata_json");
    serde_json::from_str(&json).context("Corrupt metadata_json in index row")
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    fn name(&self) -> &str {
        self.name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &CardMetadata) -> Result<()> {
        if vector.len() != self.dims {
            anyhow::bail!(
                "{} index expects {} dimensions, got {}",
                self.name,
                self.dims,
                vector.len()
            );
        }
        let attrs = &metadata.attributes;
        let metadata_json = serde_json::to_string(metadata)?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, subject, year, manufacturer, grade, created_at,
                            metadata_json, dims, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                subject = excluded.subject,
                year = excluded.year,
                manufacturer = excluded.manufacturer,
                grade = excluded.grade,
                created_at = excluded.created_at,
                metadata_json = excluded.metadata_json,
                dims = excluded.dims,
                embedding = excluded.embedding
            "#,
            self.table
        ))
        .bind(id)
        .bind(&attrs.subject)
        .bind(&attrs.year)
        .bind(&attrs.manufacturer)
        .bind(attrs.grade as i64)
        .bind(metadata.created_at)
        .bind(metadata_json)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to upsert {} into {}", id, self.table))?;

        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilters>,
    ) -> Result<Vec<IndexMatch>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let f = filter.cloned().unwrap_or_default();

        // A NULL parameter disables its condition.
        let rows = sqlx::query(&format!(
            r#"
            SELECT id, metadata_json, embedding
            FROM {}
            WHERE (?1 IS NULL OR subject = ?1)
              AND (?2 IS NULL OR year = ?2)
              AND (?3 IS NULL OR manufacturer = ?3)
              AND (?4 IS NULL OR grade >= ?4)
              AND (?5 IS NULL OR grade <= ?5)
            ORDER BY rowid
            "#,
            self.table
        ))
        .bind(f.subject)
        .bind(f.year)
        .bind(f.manufacturer)
        .bind(f.min_grade.map(i64::from))
        .bind(f.max_grade.map(i64::from))
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let stored = blob_to_vec(&blob);
            matches.push(IndexMatch {
                id: row.get("id"),
                score: cosine_similarity(vector, &stored),
                metadata: decode_metadata(row)?,
            });
        }

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);

        Ok(matches)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", self.table))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, id: &str) -> Result<Option<CardMetadata>> {
        let row = sqlx::query(&format!(
            "SELECT metadata_json FROM {} WHERE id = ?",
            self.table
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(decode_metadata).transpose()
    }

    async fn scan(&self, limit: usize) -> Result<Vec<CardMetadata>> {
        let rows = sqlx::query(&format!(
            "SELECT metadata_json FROM {} ORDER BY created_at DESC, rowid ASC LIMIT ?",
            self.table
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_metadata).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_pool;
    use slabvault_core::models::CardAttributes;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_pool(&pool).await.unwrap();
        pool
    }

    fn meta(id: &str, subject: &str, grade: u8, created_at: i64) -> CardMetadata {
        CardMetadata {
            attributes: CardAttributes {
                identifier: id.to_string(),
                subject: subject.to_string(),
                year: "2003".to_string(),
                manufacturer: "Topps".to_string(),
                grade,
                sub_category: None,
                sub_number: None,
            },
            description: Some(format!("{} card", subject)),
            image_path: format!("images/{}.png", id),
            verification_url: None,
            created_at,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_query() {
        let index = SqliteIndex::new(pool().await, Modality::Text, 2);
        index.upsert("a", &[1.0, 0.0], &meta("a", "LeBron James", 10, 1)).await.unwrap();
        index.upsert("b", &[0.0, 1.0], &meta("b", "Kobe Bryant", 9, 2)).await.unwrap();

        let hits = index.query(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert_eq!(hits[0].metadata.attributes.subject, "LeBron James");
    }

    #[tokio::test]
    async fn test_upsert_replaces_row() {
        let index = SqliteIndex::new(pool().await, Modality::Image, 2);
        index.upsert("a", &[1.0, 0.0], &meta("a", "Old", 5, 1)).await.unwrap();
        index.upsert("a", &[0.0, 1.0], &meta("a", "New", 8, 2)).await.unwrap();

        assert_eq!(index.scan(10).await.unwrap().len(), 1);
        let got = index.get("a").await.unwrap().unwrap();
        assert_eq!(got.attributes.subject, "New");
        assert_eq!(got.attributes.grade, 8);
    }

    #[tokio::test]
    async fn test_wrong_dims_rejected() {
        let index = SqliteIndex::new(pool().await, Modality::Text, 3);
        assert!(index.upsert("a", &[1.0], &meta("a", "X", 5, 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_filters_in_sql() {
        let index = SqliteIndex::new(pool().await, Modality::Text, 2);
        index.upsert("a", &[1.0, 0.0], &meta("a", "LeBron James", 10, 1)).await.unwrap();
        index.upsert("b", &[1.0, 0.1], &meta("b", "LeBron James", 7, 2)).await.unwrap();
        index.upsert("c", &[1.0, 0.2], &meta("c", "Kobe Bryant", 10, 3)).await.unwrap();

        let filter = SearchFilters {
            subject: Some("LeBron James".to_string()),
            min_grade: Some(9),
            ..Default::default()
        };
        let hits = index.query(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn test_scan_newest_first() {
        let index = SqliteIndex::new(pool().await, Modality::Text, 2);
        index.upsert("old", &[1.0, 0.0], &meta("old", "A", 5, 100)).await.unwrap();
        index.upsert("new", &[1.0, 0.0], &meta("new", "B", 5, 200)).await.unwrap();

        let all = index.scan(10).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|m| m.identifier()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(index.scan(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let index = SqliteIndex::new(pool().await, Modality::Text, 2);
        index.upsert("a", &[1.0, 0.0], &meta("a", "A", 5, 1)).await.unwrap();
        assert!(index.delete("a").await.unwrap());
        assert!(!index.delete("a").await.unwrap());
        assert!(index.get("a").await.unwrap().is_none());
    }
}
