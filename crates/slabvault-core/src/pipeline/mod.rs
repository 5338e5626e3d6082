//! Card processing pipeline.
//!
//! The [`Orchestrator`] drives a fixed sequence of steps over a
//! [`ProcessingState`]:
//!
//! | Step | Fatal | Does |
//! |------|-------|------|
//! | ingest | yes | allow-list the content type, decode, size-check |
//! | extract | yes | read attributes via the [`CardExtractor`] |
//! | verify | no | build the certification lookup link |
//! | enrich | no | lookup + description writer (only when requested) |
//! | side-steps | no | registered [`SideStep`]s, in order |
//! | embed | yes | text and image embeddings, concurrently |
//! | persist | yes | image store write, then [`RetrievalEngine::store`] |
//!
//! Routing comes from the [`Route`] transition table. A fatal step that
//! fails sets the terminal [`Outcome`] and the driver stops; a non-fatal
//! step that fails only appends to `warnings`. [`Orchestrator::run`] never
//! returns an error: every capability failure is classified at its step.
//!
//! All capabilities are injected as `Arc<dyn …>` when the orchestrator is
//! built and reused across runs. Each run owns its own state.

pub mod route;
pub mod state;
pub mod steps;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::capability::{CardExtractor, DescriptionWriter, FactLookup, ImageStore};
use crate::embedding::{ImageEmbedder, TextEmbedder};
use crate::search::RetrievalEngine;

pub use route::{Route, Step};
pub use state::{
    CardInput, FailureKind, ImagePayload, Outcome, ProcessedCard, ProcessingState, StateUpdate,
    StepFailure, Verification, VerificationStatus,
};

/// Content types accepted by ingest unless configured otherwise.
pub const DEFAULT_CONTENT_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/webp", "application/pdf"];
/// Largest accepted image, in bytes, unless configured otherwise.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
/// Certification lookup base used by the verify step.
pub const DEFAULT_VERIFICATION_BASE_URL: &str = "https://www.psacard.com/cert";

/// Tunables for the fixed steps.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub allowed_content_types: Vec<String>,
    pub max_image_bytes: usize,
    pub verification_base_url: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            allowed_content_types: DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            verification_base_url: DEFAULT_VERIFICATION_BASE_URL.to_string(),
        }
    }
}

/// External services the pipeline calls.
#[derive(Clone)]
pub struct Capabilities {
    pub extractor: Arc<dyn CardExtractor>,
    /// Optional: enrichment skips the lookup when absent.
    pub lookup: Option<Arc<dyn FactLookup>>,
    /// Optional: enrichment falls back to the base description when absent.
    pub writer: Option<Arc<dyn DescriptionWriter>>,
    pub text_embedder: Arc<dyn TextEmbedder>,
    pub image_embedder: Arc<dyn ImageEmbedder>,
    pub image_store: Arc<dyn ImageStore>,
}

/// An optional step injected between enrichment and embedding.
///
/// Side-steps add artifacts (e.g. a narration script or a generated sample
/// path) and can never end the run: an `Err` becomes a warning.
#[async_trait]
pub trait SideStep: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, state: &ProcessingState) -> Result<BTreeMap<String, String>>;
}

/// Drives the step sequence for one card at a time.
pub struct Orchestrator {
    capabilities: Capabilities,
    engine: RetrievalEngine,
    options: PipelineOptions,
    side_steps: Vec<Arc<dyn SideStep>>,
}

impl Orchestrator {
    pub fn new(capabilities: Capabilities, engine: RetrievalEngine, options: PipelineOptions) -> Self {
        Self {
            capabilities,
            engine,
            options,
            side_steps: Vec::new(),
        }
    }

    /// Append a side-step. Side-steps run in registration order.
    pub fn with_side_step(mut self, step: Arc<dyn SideStep>) -> Self {
        self.side_steps.push(step);
        self
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Process one card to a terminal state.
    pub async fn run(&self, input: CardInput) -> ProcessingState {
        let route = Route {
            enrich: input.enrich,
            side_steps: self.side_steps.len(),
        };
        let mut state = ProcessingState::new(input);

        while state.next_step != Step::Done && !state.is_terminal() {
            let step = state.next_step;
            state.current_step = Some(step);
            state.trace.push(step);

            let mut update = self.execute(step, &state).await;
            if !step.is_fatal() && update.outcome.take().is_some() {
                update.warn(format!("{}: non-fatal step tried to end the run", step));
            }
            for w in &update.warnings {
                warn!(step = %step, "{}", w);
            }
            state.apply(update);

            if let Some(failure) = state.outcome.as_ref().and_then(|o| o.failure()) {
                info!(step = %step, kind = %failure.kind, reason = %failure.reason, "pipeline failed");
                break;
            }
            state.next_step = route.next(step);
            debug!(from = %step, to = %state.next_step, "step complete");
        }

        if let Some(card) = state.outcome.as_ref().and_then(|o| o.card()) {
            info!(
                id = %card.identifier(),
                warnings = state.warnings.len(),
                "card processed"
            );
        }
        state
    }

    /// Run and return only the terminal outcome.
    ///
    /// A run that reaches the terminator without an outcome cannot happen
    /// with the fixed route; it is reported as a persistence failure.
    pub async fn process(&self, input: CardInput) -> Outcome {
        let state = self.run(input).await;
        state.outcome.unwrap_or_else(|| {
            Outcome::Failure(StepFailure {
                kind: FailureKind::PersistenceFailed,
                reason: "pipeline finished without storing the card".to_string(),
            })
        })
    }

    async fn execute(&self, step: Step, state: &ProcessingState) -> StateUpdate {
        let caps = &self.capabilities;
        match step {
            Step::Ingest => steps::ingest(&self.options, state),
            Step::Extract => steps::extract(caps.extractor.as_ref(), state).await,
            Step::Verify => steps::verify(&self.options, state),
            Step::Enrich => {
                steps::enrich(caps.lookup.as_deref(), caps.writer.as_deref(), state).await
            }
            Step::SideStep(i) => self.run_side_step(i, state).await,
            Step::Embed => {
                steps::embed(
                    caps.text_embedder.as_ref(),
                    caps.image_embedder.as_ref(),
                    state,
                )
                .await
            }
            Step::Persist => steps::persist(caps.image_store.as_ref(), &self.engine, state).await,
            Step::Done => StateUpdate::default(),
        }
    }

    async fn run_side_step(&self, index: usize, state: &ProcessingState) -> StateUpdate {
        let mut update = StateUpdate::default();
        let Some(side) = self.side_steps.get(index) else {
            update.warn(format!("side step {} is not registered", index));
            return update;
        };
        match side.run(state).await {
            Ok(artifacts) => update.artifacts = artifacts,
            Err(e) => update.warn(format!("{}: {:#}", side.name(), e)),
        }
        update
    }
}
