//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the storage primitive behind the hybrid
//! retrieval engine. The engine owns two of them, one per
//! [`Modality`](crate::models::Modality), each keyed by the card identifier
//! and carrying an identical copy of the card metadata.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](VectorIndex::upsert) | Insert or replace a vector + metadata by identifier |
//! | [`query`](VectorIndex::query) | Nearest neighbours by cosine similarity, optionally filtered |
//! | [`delete`](VectorIndex::delete) | Remove an identifier |
//! | [`get`](VectorIndex::get) | Metadata for one identifier |
//! | [`scan`](VectorIndex::scan) | Enumerate stored metadata |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::CardMetadata;

/// One neighbour returned by [`VectorIndex::query`].
#[derive(Debug, Clone)]
pub struct IndexMatch {
    pub id: String,
    /// Cosine similarity between the query and the stored vector.
    pub score: f64,
    pub metadata: CardMetadata,
}

/// Metadata filter applied inside an index query.
///
/// Equality on subject, year and manufacturer; inclusive range on grade.
/// All present conditions must hold. `None` means "no condition", never a
/// wildcard value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_grade: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_grade: Option<u8>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self == &SearchFilters::default()
    }

    /// Evaluate the filter against stored metadata.
    pub fn matches(&self, meta: &CardMetadata) -> bool {
        let attrs = &meta.attributes;
        if let Some(ref s) = self.subject {
            if &attrs.subject != s {
                return false;
            }
        }
        if let Some(ref y) = self.year {
            if &attrs.year != y {
                return false;
            }
        }
        if let Some(ref m) = self.manufacturer {
            if &attrs.manufacturer != m {
                return false;
            }
        }
        if let Some(min) = self.min_grade {
            if attrs.grade < min {
                return false;
            }
        }
        if let Some(max) = self.max_grade {
            if attrs.grade > max {
                return false;
            }
        }
        true
    }
}

/// A single-modality vector index keyed by card identifier.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short label for logs (e.g. `"text"`, `"image"`).
    fn name(&self) -> &str;

    /// Vector length accepted by this index.
    fn dims(&self) -> usize;

    /// Insert or replace the entry for `id`.
    async fn upsert(&self, id: &str, vector: &[f32], metadata: &CardMetadata) -> Result<()>;

    /// Return up to `top_k` entries ordered by descending similarity.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilters>,
    ) -> Result<Vec<IndexMatch>>;

    /// Remove the entry for `id`. Returns whether an entry existed.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Metadata stored for `id`, if any.
    async fn get(&self, id: &str) -> Result<Option<CardMetadata>>;

    /// Enumerate up to `limit` stored entries.
    ///
    /// The default is a broad query with a zero vector, for backends with no
    /// native enumeration. Every similarity is then 0 and the order is
    /// whatever the backend returns. Backends that can scan should override.
    async fn scan(&self, limit: usize) -> Result<Vec<CardMetadata>> {
        let zero = vec![0.0f32; self.dims()];
        let matches = self.query(&zero, limit, None).await?;
        Ok(matches.into_iter().map(|m| m.metadata).collect())
    }
}
