//! External capabilities consumed by the processing pipeline.
//!
//! Each trait is an opaque service described only by its input/output
//! contract. The pipeline holds them as `Arc<dyn …>` so tests can inject
//! doubles and the application can inject HTTP clients built once at
//! startup. Embedding capabilities live in [`crate::embedding`].
//!
//! | Trait | Input | Output |
//! |-------|-------|--------|
//! | [`CardExtractor`] | image bytes, content type, hint | [`ExtractionOutput`] |
//! | [`FactLookup`] | free-text query | [`LookupResult`] |
//! | [`DescriptionWriter`] | attributes, base description, snippets | prose |
//! | [`ImageStore`] | identifier, bytes | stored path (staged, then committed) |

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::CardAttributes;

/// Attributes as reported by the extractor. Every field is optional here;
/// the pipeline decides which absences are fatal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedAttributes {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub year: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub grade: Option<u8>,
    #[serde(default)]
    pub sub_category: Option<String>,
    #[serde(default)]
    pub sub_number: Option<String>,
}

/// Verdict of the extraction capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub valid: bool,
    #[serde(default)]
    pub attributes: Option<ExtractedAttributes>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

/// Reads card attributes off an image of a graded card.
#[async_trait]
pub trait CardExtractor: Send + Sync {
    async fn extract(
        &self,
        image: &[u8],
        content_type: &str,
        hint: Option<&str>,
    ) -> Result<ExtractionOutput>;
}

/// A piece of supplementary text found by a lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupResult {
    #[serde(default)]
    pub snippets: Vec<Snippet>,
    #[serde(default)]
    pub answer: Option<String>,
}

/// Free-text fact lookup (e.g. a web search API).
#[async_trait]
pub trait FactLookup: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<LookupResult>;
}

/// Merges base attributes and looked-up facts into prose.
#[async_trait]
pub trait DescriptionWriter: Send + Sync {
    async fn write_description(
        &self,
        attributes: &CardAttributes,
        base_description: &str,
        lookup: Option<&LookupResult>,
    ) -> Result<String>;
}

/// Durable storage for the original image bytes.
///
/// Writes are two-phase. `save` may stage the bytes; the pipeline calls
/// `commit` once both index writes succeeded and `abort` when they did
/// not, so a failed re-store never leaves old index rows pointing at new
/// bytes. Stores that write in place keep the no-op defaults.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Stage `image` for `identifier` and return the final stored-path
    /// reference.
    async fn save(&self, identifier: &str, image: &[u8], content_type: &str) -> Result<String>;

    /// Make the image saved under `path` visible.
    async fn commit(&self, _path: &str) -> Result<()> {
        Ok(())
    }

    /// Drop the image staged under `path`, leaving any earlier one intact.
    async fn abort(&self, _path: &str) -> Result<()> {
        Ok(())
    }
}
