//! Core data models shared by the pipeline and the retrieval engine.
//!
//! A card flows through three shapes:
//!
//! - [`CardAttributes`]: the descriptive fields read off the slab label.
//! - [`CardMetadata`]: attributes plus everything the pipeline derived
//!   (description, stored image path, verification link, timestamp).
//!   This is what both vector indexes store next to their vectors.
//! - [`CardRecord`]: metadata plus the two embedding vectors, i.e. the
//!   unit handed to [`RetrievalEngine::store`](crate::search::RetrievalEngine::store).

use serde::{Deserialize, Serialize};

/// Lowest grade on the grading scale.
pub const MIN_GRADE: u8 = 1;
/// Highest grade on the grading scale.
pub const MAX_GRADE: u8 = 10;

/// Descriptive attributes of a graded card.
///
/// `identifier` is the certification number printed on the slab and is
/// the primary key everywhere in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardAttributes {
    pub identifier: String,
    pub subject: String,
    pub year: String,
    pub manufacturer: String,
    pub grade: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_number: Option<String>,
}

impl CardAttributes {
    /// Serialize the attributes into the descriptive text fed to the text
    /// embedder. Field order is fixed so equal attributes embed equally.
    pub fn embedding_text(&self) -> String {
        let mut text = format!(
            "Subject: {}\nYear: {}\nManufacturer: {}\nGrade: {}",
            self.subject, self.year, self.manufacturer, self.grade
        );
        if let Some(ref cat) = self.sub_category {
            text.push_str(&format!("\nCategory: {}", cat));
        }
        if let Some(ref num) = self.sub_number {
            text.push_str(&format!("\nCard number: {}", num));
        }
        text
    }

    /// Deterministic one-sentence description built only from known
    /// attributes. Used whenever enrichment is skipped or fails.
    pub fn base_description(&self) -> String {
        let mut title = format!("{} {} {}", self.year, self.manufacturer, self.subject);
        if let Some(ref cat) = self.sub_category {
            title.push(' ');
            title.push_str(cat);
        }
        if let Some(ref num) = self.sub_number {
            title.push_str(" #");
            title.push_str(num);
        }
        format!(
            "{}, graded {} out of {} (certification {}).",
            title, self.grade, MAX_GRADE, self.identifier
        )
    }
}

/// Everything stored about a card except its vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardMetadata {
    #[serde(flatten)]
    pub attributes: CardAttributes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Reference returned by the image store.
    pub image_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,
    /// Unix timestamp (seconds) of the pipeline run that stored the card.
    pub created_at: i64,
}

impl CardMetadata {
    pub fn identifier(&self) -> &str {
        &self.attributes.identifier
    }
}

/// The durable unit stored by the retrieval engine.
#[derive(Debug, Clone, PartialEq)]
pub struct CardRecord {
    pub metadata: CardMetadata,
    pub text_vector: Vec<f32>,
    pub image_vector: Vec<f32>,
}

impl CardRecord {
    pub fn identifier(&self) -> &str {
        self.metadata.identifier()
    }
}

/// One of the two independent embedding spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
