//! Hybrid retrieval over two parallel vector indexes.
//!
//! The [`RetrievalEngine`] owns one [`VectorIndex`] per modality. Every card
//! is written to both under the same identifier with identical metadata;
//! queries search each index independently and fuse the two similarity
//! scores by weighted sum.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Query the text index with the text vector and the image index with the
//!    image vector, each for `2 × top_k` candidates under the same filter.
//!    A modality with no query vector contributes no candidates.
//! 2. Merge by identifier in first-seen order (text candidates first). A card
//!    found by only one index gets `0.0` for the other modality.
//! 3. `combined = w_text × text_score + w_image × image_score`.
//! 4. Stable sort by combined score (desc); ties keep merge order.
//! 5. Truncate to `top_k`.
//!
//! Weights default to 0.6 / 0.4 and are not normalized: callers that pass
//! weights not summing to 1 get exactly the weighted sum they asked for.
//!
//! # Consistency
//!
//! [`store`](RetrievalEngine::store) and [`delete`](RetrievalEngine::delete)
//! touch both indexes concurrently without a transaction. If one side fails
//! the indexes disagree for that identifier until the next successful
//! store or delete; readers racing a store may also see one side updated.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{CardMetadata, CardRecord, Modality};
use crate::store::{IndexMatch, SearchFilters, VectorIndex};

/// Default weight of the text modality.
pub const DEFAULT_TEXT_WEIGHT: f64 = 0.6;
/// Default weight of the image modality.
pub const DEFAULT_IMAGE_WEIGHT: f64 = 0.4;
/// Candidates fetched per index, as a multiple of `top_k`.
pub const OVERFETCH_FACTOR: usize = 2;

/// Per-query modality weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchWeights {
    pub text: f64,
    pub image: f64,
}

impl Default for SearchWeights {
    fn default() -> Self {
        Self {
            text: DEFAULT_TEXT_WEIGHT,
            image: DEFAULT_IMAGE_WEIGHT,
        }
    }
}

impl SearchWeights {
    pub fn combine(&self, text_score: f64, image_score: f64) -> f64 {
        self.text * text_score + self.image * image_score
    }
}

/// Bundles all inputs for a single hybrid search.
#[derive(Debug, Clone)]
pub struct HybridQuery<'a> {
    pub text_vector: Option<&'a [f32]>,
    pub image_vector: Option<&'a [f32]>,
    pub top_k: usize,
    pub weights: SearchWeights,
    pub filters: Option<&'a SearchFilters>,
}

/// A fused search hit.
///
/// Only the two raw scores and the weights are kept; the combined score is
/// always recomputed from them.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub card: CardMetadata,
    pub text_score: f64,
    pub image_score: f64,
    weights: SearchWeights,
}

impl SearchResult {
    pub fn new(card: CardMetadata, text_score: f64, image_score: f64, weights: SearchWeights) -> Self {
        Self {
            card,
            text_score,
            image_score,
            weights,
        }
    }

    pub fn identifier(&self) -> &str {
        self.card.identifier()
    }

    pub fn weights(&self) -> SearchWeights {
        self.weights
    }

    pub fn combined_score(&self) -> f64 {
        self.weights.combine(self.text_score, self.image_score)
    }
}

#[derive(Serialize)]
struct SearchResultView<'a> {
    #[serde(flatten)]
    card: &'a CardMetadata,
    text_score: f64,
    image_score: f64,
    combined_score: f64,
}

impl Serialize for SearchResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        SearchResultView {
            card: &self.card,
            text_score: self.text_score,
            image_score: self.image_score,
            combined_score: self.combined_score(),
        }
        .serialize(serializer)
    }
}

/// Failure of [`RetrievalEngine::store`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{modality} vector has {actual} dimensions but the index expects {expected}")]
    DimensionMismatch {
        modality: Modality,
        expected: usize,
        actual: usize,
    },
    #[error("{modality} index write failed for {id}: {reason}")]
    WriteFailed {
        id: String,
        modality: Modality,
        reason: String,
    },
    #[error("both index writes failed for {id}: text: {text}; image: {image}")]
    BothWritesFailed {
        id: String,
        text: String,
        image: String,
    },
}

/// Failure of [`RetrievalEngine::delete`].
///
/// `Partial` means the identifier is now present in only one index and the
/// caller should retry the delete.
#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("delete of {id} succeeded in the {succeeded} index but failed in the {failed} index: {reason}")]
    Partial {
        id: String,
        succeeded: Modality,
        failed: Modality,
        reason: String,
    },
    #[error("delete of {id} failed in both indexes: text: {text}; image: {image}")]
    Both {
        id: String,
        text: String,
        image: String,
    },
}

/// Dual-index store and hybrid search.
#[derive(Clone)]
pub struct RetrievalEngine {
    text_index: Arc<dyn VectorIndex>,
    image_index: Arc<dyn VectorIndex>,
}

impl RetrievalEngine {
    pub fn new(text_index: Arc<dyn VectorIndex>, image_index: Arc<dyn VectorIndex>) -> Self {
        Self {
            text_index,
            image_index,
        }
    }

    /// Upsert a record into both indexes.
    ///
    /// Both writes are issued concurrently and both must succeed. There is
    /// no rollback: if one write fails the other may already be visible.
    pub async fn store(&self, record: &CardRecord) -> std::result::Result<(), StoreError> {
        check_dims(Modality::Text, self.text_index.dims(), record.text_vector.len())?;
        check_dims(Modality::Image, self.image_index.dims(), record.image_vector.len())?;

        let id = record.identifier();
        let (text_res, image_res) = futures::join!(
            self.text_index.upsert(id, &record.text_vector, &record.metadata),
            self.image_index.upsert(id, &record.image_vector, &record.metadata)
        );

        match (text_res, image_res) {
            (Ok(()), Ok(())) => {
                debug!(id, "stored card in both indexes");
                Ok(())
            }
            (Err(e), Ok(())) => {
                warn!(
                    id,
                    index = self.text_index.name(),
                    error = %e,
                    "index write failed; image index already updated"
                );
                Err(StoreError::WriteFailed {
                    id: id.to_string(),
                    modality: Modality::Text,
                    reason: e.to_string(),
                })
            }
            (Ok(()), Err(e)) => {
                warn!(
                    id,
                    index = self.image_index.name(),
                    error = %e,
                    "index write failed; text index already updated"
                );
                Err(StoreError::WriteFailed {
                    id: id.to_string(),
                    modality: Modality::Image,
                    reason: e.to_string(),
                })
            }
            (Err(t), Err(i)) => Err(StoreError::BothWritesFailed {
                id: id.to_string(),
                text: t.to_string(),
                image: i.to_string(),
            }),
        }
    }

    /// Run a hybrid search. See the module docs for the algorithm.
    pub async fn search(&self, query: &HybridQuery<'_>) -> Result<Vec<SearchResult>> {
        if query.text_vector.is_none() && query.image_vector.is_none() {
            bail!("search requires a text vector, an image vector, or both");
        }
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let fetch = query.top_k.saturating_mul(OVERFETCH_FACTOR);
        let filters = query.filters.filter(|f| !f.is_empty());

        let text_search = async {
            match query.text_vector {
                Some(v) => self.text_index.query(v, fetch, filters).await,
                None => Ok(Vec::new()),
            }
        };
        let image_search = async {
            match query.image_vector {
                Some(v) => self.image_index.query(v, fetch, filters).await,
                None => Ok(Vec::new()),
            }
        };
        let (text_matches, image_matches) = futures::try_join!(text_search, image_search)?;

        debug!(
            text_candidates = text_matches.len(),
            image_candidates = image_matches.len(),
            top_k = query.top_k,
            "fusing index results"
        );

        Ok(fuse(text_matches, image_matches, query.weights, query.top_k))
    }

    /// Up to `limit` stored cards, without vectors.
    pub async fn list_all(&self, limit: usize) -> Result<Vec<CardMetadata>> {
        self.text_index.scan(limit).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<CardMetadata>> {
        self.text_index.get(id).await
    }

    /// Remove a card from both indexes.
    ///
    /// Returns whether the card existed in either index.
    pub async fn delete(&self, id: &str) -> std::result::Result<bool, DeleteError> {
        let (text_res, image_res) =
            futures::join!(self.text_index.delete(id), self.image_index.delete(id));

        match (text_res, image_res) {
            (Ok(t), Ok(i)) => Ok(t || i),
            (Ok(_), Err(e)) => Err(DeleteError::Partial {
                id: id.to_string(),
                succeeded: Modality::Text,
                failed: Modality::Image,
                reason: e.to_string(),
            }),
            (Err(e), Ok(_)) => Err(DeleteError::Partial {
                id: id.to_string(),
                succeeded: Modality::Image,
                failed: Modality::Text,
                reason: e.to_string(),
            }),
            (Err(t), Err(i)) => Err(DeleteError::Both {
                id: id.to_string(),
                text: t.to_string(),
                image: i.to_string(),
            }),
        }
    }
}

fn check_dims(modality: Modality, expected: usize, actual: usize) -> std::result::Result<(), StoreError> {
    if expected != actual {
        return Err(StoreError::DimensionMismatch {
            modality,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Merge per-index matches into fused results.
///
/// Text matches are inserted first, then image matches; an identifier seen
/// again only fills in its missing score. The final sort is stable, so
/// equal combined scores keep that insertion order.
pub fn fuse(
    text_matches: Vec<IndexMatch>,
    image_matches: Vec<IndexMatch>,
    weights: SearchWeights,
    top_k: usize,
) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = Vec::with_capacity(text_matches.len() + image_matches.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for m in text_matches {
        match positions.get(&m.id) {
            Some(&i) => merged[i].text_score = merged[i].text_score.max(m.score),
            None => {
                positions.insert(m.id, merged.len());
                merged.push(SearchResult::new(m.metadata, m.score, 0.0, weights));
            }
        }
    }
    for m in image_matches {
        match positions.get(&m.id) {
            Some(&i) => merged[i].image_score = merged[i].image_score.max(m.score),
            None => {
                positions.insert(m.id, merged.len());
                merged.push(SearchResult::new(m.metadata, 0.0, m.score, weights));
            }
        }
    }

    merged.sort_by(|a, b| {
        b.combined_score()
            .partial_cmp(&a.combined_score())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(top_k);
    merged
}
