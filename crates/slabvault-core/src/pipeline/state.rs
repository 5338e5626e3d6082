//! Shared state of one pipeline run, and the updates steps return.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::capability::LookupResult;
use crate::models::CardAttributes;

use super::route::Step;

/// Image payload as received from the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ImagePayload {
    /// Raw image bytes.
    Bytes(Vec<u8>),
    /// Base64 text, optionally as a `data:<type>;base64,` URL.
    Base64(String),
}

/// Input of one pipeline run.
#[derive(Debug, Clone)]
pub struct CardInput {
    pub payload: ImagePayload,
    /// Declared MIME type of the payload.
    pub content_type: String,
    /// Free text passed to the extractor (e.g. "rookie card, back side").
    pub hint: Option<String>,
    /// Run the enrichment step.
    pub enrich: bool,
}

impl CardInput {
    pub fn from_bytes(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            payload: ImagePayload::Bytes(bytes),
            content_type: content_type.into(),
            hint: None,
            enrich: false,
        }
    }

    pub fn from_base64(data: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            payload: ImagePayload::Base64(data.into()),
            content_type: content_type.into(),
            hint: None,
            enrich: false,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_enrichment(mut self, enrich: bool) -> Self {
        self.enrich = enrich;
        self
    }
}

/// Machine-readable kind of a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    IngestFailed,
    ExtractionRejected,
    ExtractionIncomplete,
    EmbeddingFailed,
    PersistenceFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::IngestFailed => "ingest_failed",
            FailureKind::ExtractionRejected => "extraction_rejected",
            FailureKind::ExtractionIncomplete => "extraction_incomplete",
            FailureKind::EmbeddingFailed => "embedding_failed",
            FailureKind::PersistenceFailed => "persistence_failed",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A terminal failure: stable kind plus a reason fit for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    /// A certification lookup link was built. The certificate itself was
    /// not checked.
    Linked,
    Unverified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub status: VerificationStatus,
    pub reference: Option<String>,
}

/// Success payload of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedCard {
    #[serde(flatten)]
    pub attributes: CardAttributes,
    pub description: String,
    pub image_path: String,
    pub verification_status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,
    /// Non-fatal issues hit along the way. Diagnostic only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ProcessedCard {
    pub fn identifier(&self) -> &str {
        &self.attributes.identifier
    }
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success(ProcessedCard),
    Failure(StepFailure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn card(&self) -> Option<&ProcessedCard> {
        match self {
            Outcome::Success(card) => Some(card),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(f) => Some(f),
        }
    }
}

/// Accumulating record of a single pipeline run.
///
/// Created with only the input populated, then grown by each step through
/// [`StateUpdate`]s. Once `outcome` is set the driver stops.
#[derive(Debug, Clone)]
pub struct ProcessingState {
    pub input: CardInput,
    /// Normalized content type, set by ingest.
    pub content_type: Option<String>,
    /// Decoded image bytes, set by ingest.
    pub image: Option<Vec<u8>>,
    pub attributes: Option<CardAttributes>,
    pub verification: Option<Verification>,
    pub lookup: Option<LookupResult>,
    pub description: Option<String>,
    /// Outputs of optional side-steps, by key.
    pub artifacts: BTreeMap<String, String>,
    pub text_vector: Option<Vec<f32>>,
    pub image_vector: Option<Vec<f32>>,
    pub image_path: Option<String>,
    pub current_step: Option<Step>,
    pub next_step: Step,
    /// Every step executed, in order.
    pub trace: Vec<Step>,
    pub warnings: Vec<String>,
    pub outcome: Option<Outcome>,
}

impl ProcessingState {
    pub fn new(input: CardInput) -> Self {
        Self {
            input,
            content_type: None,
            image: None,
            attributes: None,
            verification: None,
            lookup: None,
            description: None,
            artifacts: BTreeMap::new(),
            text_vector: None,
            image_vector: None,
            image_path: None,
            current_step: None,
            next_step: Step::Ingest,
            trace: Vec::new(),
            warnings: Vec::new(),
            outcome: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// Merge a step's update. Only fields the update carries are written;
    /// warnings and artifacts accumulate. An outcome, once set, is final.
    pub fn apply(&mut self, update: StateUpdate) {
        if self.outcome.is_some() {
            return;
        }
        if let Some(v) = update.content_type {
            self.content_type = Some(v);
        }
        if let Some(v) = update.image {
            self.image = Some(v);
        }
        if let Some(v) = update.attributes {
            self.attributes = Some(v);
        }
        if let Some(v) = update.verification {
            self.verification = Some(v);
        }
        if let Some(v) = update.lookup {
            self.lookup = Some(v);
        }
        if let Some(v) = update.description {
            self.description = Some(v);
        }
        if let Some(v) = update.text_vector {
            self.text_vector = Some(v);
        }
        if let Some(v) = update.image_vector {
            self.image_vector = Some(v);
        }
        if let Some(v) = update.image_path {
            self.image_path = Some(v);
        }
        self.artifacts.extend(update.artifacts);
        self.warnings.extend(update.warnings);
        self.outcome = update.outcome;
    }
}

/// Partial update returned by a step.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub content_type: Option<String>,
    pub image: Option<Vec<u8>>,
    pub attributes: Option<CardAttributes>,
    pub verification: Option<Verification>,
    pub lookup: Option<LookupResult>,
    pub description: Option<String>,
    pub artifacts: BTreeMap<String, String>,
    pub text_vector: Option<Vec<f32>>,
    pub image_vector: Option<Vec<f32>>,
    pub image_path: Option<String>,
    pub warnings: Vec<String>,
    pub outcome: Option<Outcome>,
}

impl StateUpdate {
    /// An update that ends the run with a failure.
    pub fn fatal(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            outcome: Some(Outcome::Failure(StepFailure {
                kind,
                reason: reason.into(),
            })),
            ..Default::default()
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}
