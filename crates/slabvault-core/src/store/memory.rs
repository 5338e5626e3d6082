//! In-memory [`VectorIndex`] for tests and embedded use.
//!
//! Entries live in a `Vec` behind `std::sync::RwLock`, kept in first-insert
//! order; an upsert of an existing identifier replaces the entry in place.
//! Queries are brute-force cosine similarity over all entries.

use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::CardMetadata;

use super::{IndexMatch, SearchFilters, VectorIndex};

struct Entry {
    id: String,
    vector: Vec<f32>,
    metadata: CardMetadata,
}

/// In-memory vector index of fixed dimensionality.
pub struct InMemoryIndex {
    name: String,
    dims: usize,
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryIndex {
    pub fn new(name: impl Into<String>, dims: usize) -> Self {
        Self {
            name: name.into(),
            dims,
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, id: &str, vector: &[f32], metadata: &CardMetadata) -> Result<()> {
        if vector.len() != self.dims {
            bail!(
                "{} index expects {} dimensions, got {}",
                self.name,
                self.dims,
                vector.len()
            );
        }
        let mut entries = self.entries.write().map_err(poisoned)?;
        let entry = Entry {
            id: id.to_string(),
            vector: vector.to_vec(),
            metadata: metadata.clone(),
        };
        match entries.iter_mut().find(|e| e.id == id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilters>,
    ) -> Result<Vec<IndexMatch>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut matches: Vec<IndexMatch> = entries
            .iter()
            .filter(|e| filter.map_or(true, |f| f.matches(&e.metadata)))
            .map(|e| IndexMatch {
                id: e.id.clone(),
                score: cosine_similarity(vector, &e.vector),
                metadata: e.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() != before)
    }

    async fn get(&self, id: &str) -> Result<Option<CardMetadata>> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.metadata.clone()))
    }

    async fn scan(&self, limit: usize) -> Result<Vec<CardMetadata>> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut all: Vec<CardMetadata> = entries.iter().map(|e| e.metadata.clone()).collect();
        // Newest first; the sort is stable so equal timestamps keep insert order.
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit);
        Ok(all)
    }
}
