//! End-to-end pipeline runs against in-memory indexes and scripted
//! capabilities.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use slabvault_core::capability::{
    CardExtractor, DescriptionWriter, ExtractedAttributes, ExtractionOutput, FactLookup,
    ImageStore, LookupResult, Snippet,
};
use slabvault_core::embedding::{ImageEmbedder, TextEmbedder};
use slabvault_core::models::{CardAttributes, CardMetadata};
use slabvault_core::pipeline::{
    CardInput, Capabilities, FailureKind, Orchestrator, Outcome, PipelineOptions,
    ProcessingState, SideStep, Step, VerificationStatus,
};
use slabvault_core::search::{HybridQuery, RetrievalEngine, SearchWeights};
use slabvault_core::store::memory::InMemoryIndex;
use slabvault_core::store::{IndexMatch, SearchFilters, VectorIndex};

const DIMS: usize = 8;

// ─── Scripted capabilities ──────────────────────────────────────────

struct ScriptedExtractor {
    output: Mutex<Result<ExtractionOutput, String>>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    fn returning(output: ExtractionOutput) -> Arc<Self> {
        Arc::new(Self {
            output: Mutex::new(Ok(output)),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            output: Mutex::new(Err(message.to_string())),
            calls: AtomicUsize::new(0),
        })
    }

    fn set(&self, output: ExtractionOutput) {
        *self.output.lock().unwrap() = Ok(output);
    }
}

#[async_trait]
impl CardExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        _image: &[u8],
        _content_type: &str,
        _hint: Option<&str>,
    ) -> Result<ExtractionOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.output.lock().unwrap() {
            Ok(o) => Ok(o.clone()),
            Err(e) => bail!("{}", e),
        }
    }
}

/// Deterministic embedding: byte histogram folded into `DIMS` buckets.
fn fold(bytes: &[u8], dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for (i, b) in bytes.iter().enumerate() {
        v[(i + *b as usize) % dims] += 1.0 + (*b as f32) / 255.0;
    }
    v
}

struct HashTextEmbedder {
    dims: usize,
    fail: bool,
    calls: AtomicUsize,
}

impl HashTextEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            dims: DIMS,
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TextEmbedder for HashTextEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("text model unavailable");
        }
        Ok(fold(text.as_bytes(), DIMS))
    }
}

struct HashImageEmbedder {
    /// Length of the vectors actually returned.
    output_dims: usize,
    calls: AtomicUsize,
}

impl HashImageEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            output_dims: DIMS,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ImageEmbedder for HashImageEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed_image(&self, image: &[u8], _content_type: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(fold(image, self.output_dims))
    }
}

#[derive(Default)]
struct MemoryImageStore {
    saved: Mutex<Vec<String>>,
    committed: Mutex<Vec<String>>,
    aborted: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl ImageStore for MemoryImageStore {
    async fn save(&self, identifier: &str, _image: &[u8], content_type: &str) -> Result<String> {
        if self.fail {
            bail!("no space left on device");
        }
        self.saved.lock().unwrap().push(identifier.to_string());
        Ok(format!("mem://{}.{}", identifier, content_type.rsplit('/').next().unwrap_or("bin")))
    }

    async fn commit(&self, path: &str) -> Result<()> {
        self.committed.lock().unwrap().push(path.to_string());
        Ok(())
    }

    async fn abort(&self, path: &str) -> Result<()> {
        self.aborted.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

struct ScriptedLookup {
    fail: bool,
}

#[async_trait]
impl FactLookup for ScriptedLookup {
    async fn lookup(&self, _query: &str) -> Result<LookupResult> {
        if self.fail {
            bail!("search API returned 503");
        }
        Ok(LookupResult {
            snippets: vec![Snippet {
                title: "Rookie season".to_string(),
                content: "Drafted first overall in 2003.".to_string(),
            }],
            answer: None,
        })
    }
}

struct ScriptedWriter {
    fail: bool,
    saw_snippets: AtomicUsize,
}

#[async_trait]
impl DescriptionWriter for ScriptedWriter {
    async fn write_description(
        &self,
        attributes: &CardAttributes,
        _base: &str,
        lookup: Option<&LookupResult>,
    ) -> Result<String> {
        if self.fail {
            bail!("writer timed out");
        }
        if let Some(l) = lookup {
            self.saw_snippets.fetch_add(l.snippets.len(), Ordering::SeqCst);
        }
        Ok(format!("A pristine {} card.", attributes.subject))
    }
}

/// Image index whose writes always fail.
struct ReadOnlyIndex {
    inner: InMemoryIndex,
}

#[async_trait]
impl VectorIndex for ReadOnlyIndex {
    fn name(&self) -> &str {
        self.inner.name()
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn upsert(&self, _id: &str, _vector: &[f32], _metadata: &CardMetadata) -> Result<()> {
        bail!("attempt to write a readonly database")
    }
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilters>,
    ) -> Result<Vec<IndexMatch>> {
        self.inner.query(vector, top_k, filter).await
    }
    async fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id).await
    }
    async fn get(&self, id: &str) -> Result<Option<CardMetadata>> {
        self.inner.get(id).await
    }
}

struct FailingSideStep;

#[async_trait]
impl SideStep for FailingSideStep {
    fn name(&self) -> &str {
        "narration"
    }
    async fn run(&self, _state: &ProcessingState) -> Result<BTreeMap<String, String>> {
        bail!("speech service unavailable")
    }
}

struct ScriptSideStep;

#[async_trait]
impl SideStep for ScriptSideStep {
    fn name(&self) -> &str {
        "script"
    }
    async fn run(&self, state: &ProcessingState) -> Result<BTreeMap<String, String>> {
        let mut out = BTreeMap::new();
        if let Some(ref d) = state.description {
            out.insert("narration_script".to_string(), d.clone());
        }
        Ok(out)
    }
}

// ─── Fixtures ───────────────────────────────────────────────────────

fn lebron() -> ExtractedAttributes {
    ExtractedAttributes {
        identifier: Some("12345678".to_string()),
        subject: Some("LeBron James".to_string()),
        year: Some("2003-04".to_string()),
        manufacturer: Some("Upper Deck".to_string()),
        grade: Some(10),
        sub_category: Some("Exquisite Collection".to_string()),
        sub_number: Some("78".to_string()),
    }
}

fn valid(attrs: ExtractedAttributes) -> ExtractionOutput {
    ExtractionOutput {
        valid: true,
        attributes: Some(attrs),
        rejection_reason: None,
    }
}

struct Harness {
    orchestrator: Orchestrator,
    extractor: Arc<ScriptedExtractor>,
    text: Arc<HashTextEmbedder>,
    image: Arc<HashImageEmbedder>,
    store: Arc<MemoryImageStore>,
    text_index: Arc<InMemoryIndex>,
}

struct Setup {
    extractor: Arc<ScriptedExtractor>,
    text: Arc<HashTextEmbedder>,
    image: Arc<HashImageEmbedder>,
    lookup: Option<Arc<dyn FactLookup>>,
    writer: Option<Arc<dyn DescriptionWriter>>,
    side_steps: Vec<Arc<dyn SideStep>>,
    image_store_fails: bool,
    image_index: Option<Arc<dyn VectorIndex>>,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            extractor: ScriptedExtractor::returning(valid(lebron())),
            text: HashTextEmbedder::new(),
            image: HashImageEmbedder::new(),
            lookup: None,
            writer: None,
            side_steps: Vec::new(),
            image_store_fails: false,
            image_index: None,
        }
    }
}

fn harness(setup: Setup) -> Harness {
    let text_index = Arc::new(InMemoryIndex::new("text", DIMS));
    let image_index: Arc<dyn VectorIndex> = match setup.image_index {
        Some(index) => index,
        None => Arc::new(InMemoryIndex::new("image", DIMS)),
    };
    let store = Arc::new(MemoryImageStore {
        fail: setup.image_store_fails,
        ..Default::default()
    });
    let engine = RetrievalEngine::new(text_index.clone(), image_index);

    let caps = Capabilities {
        extractor: setup.extractor.clone(),
        lookup: setup.lookup,
        writer: setup.writer,
        text_embedder: setup.text.clone(),
        image_embedder: setup.image.clone(),
        image_store: store.clone(),
    };
    let mut orchestrator = Orchestrator::new(caps, engine, PipelineOptions::default());
    for s in setup.side_steps {
        orchestrator = orchestrator.with_side_step(s);
    }

    Harness {
        orchestrator,
        extractor: setup.extractor,
        text: setup.text,
        image: setup.image,
        store,
        text_index,
    }
}

fn jpeg(seed: u8) -> CardInput {
    CardInput::from_bytes(vec![0xFF, 0xD8, 0xFF, seed, seed.wrapping_mul(7), 42], "image/jpeg")
}

fn failure_kind(outcome: &Outcome) -> Option<FailureKind> {
    outcome.failure().map(|f| f.kind)
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_lebron_card_is_processed_and_searchable() {
    let h = harness(Setup::default());

    let state = h.orchestrator.run(jpeg(1)).await;
    assert_eq!(
        state.trace,
        vec![Step::Ingest, Step::Extract, Step::Verify, Step::Embed, Step::Persist]
    );

    let outcome = state.outcome.clone().unwrap();
    let card = outcome.card().expect("success");
    assert_eq!(card.identifier(), "12345678");
    assert_eq!(card.attributes.subject, "LeBron James");
    assert_eq!(card.attributes.grade, 10);
    assert_eq!(card.verification_status, VerificationStatus::Linked);
    assert_eq!(
        card.verification_url.as_deref(),
        Some("https://www.psacard.com/cert/12345678")
    );
    assert_eq!(card.description, card.attributes.base_description());
    assert_eq!(card.image_path, "mem://12345678.jpeg");
    assert_eq!(*h.store.committed.lock().unwrap(), vec![card.image_path.clone()]);
    assert!(card.warnings.is_empty());

    let stored = h.orchestrator.engine().get("12345678").await.unwrap().unwrap();
    assert_eq!(stored.attributes.manufacturer, "Upper Deck");

    // Querying with the card's own vectors ranks it first.
    let text_vec = state.text_vector.unwrap();
    let image_vec = state.image_vector.unwrap();
    let results = h
        .orchestrator
        .engine()
        .search(&HybridQuery {
            text_vector: Some(&text_vec),
            image_vector: Some(&image_vec),
            top_k: 3,
            weights: SearchWeights::default(),
            filters: None,
        })
        .await
        .unwrap();
    assert_eq!(results[0].identifier(), "12345678");
    assert!((results[0].combined_score() - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_text_plain_fails_ingest() {
    let h = harness(Setup::default());
    let outcome = h
        .orchestrator
        .process(CardInput::from_bytes(b"hello".to_vec(), "text/plain"))
        .await;

    assert_eq!(failure_kind(&outcome), Some(FailureKind::IngestFailed));
    assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_empty_and_oversized_payloads_fail_ingest() {
    let h = harness(Setup::default());
    let empty = h
        .orchestrator
        .process(CardInput::from_bytes(Vec::new(), "image/png"))
        .await;
    assert_eq!(failure_kind(&empty), Some(FailureKind::IngestFailed));

    let big = vec![1u8; PipelineOptions::default().max_image_bytes + 1];
    let oversized = h
        .orchestrator
        .process(CardInput::from_bytes(big, "image/png"))
        .await;
    assert_eq!(failure_kind(&oversized), Some(FailureKind::IngestFailed));
}

#[tokio::test]
async fn test_base64_data_url_input() {
    let h = harness(Setup::default());
    let data = format!("data:image/png;base64,{}", STANDARD.encode([9u8, 8, 7, 6]));
    let outcome = h
        .orchestrator
        .process(CardInput::from_base64(data, "image/png"))
        .await;
    assert!(outcome.is_success(), "{:?}", outcome);
}

#[tokio::test]
async fn test_invalid_card_is_rejected_before_embedding() {
    let extractor = ScriptedExtractor::returning(ExtractionOutput {
        valid: false,
        attributes: None,
        rejection_reason: Some("image shows a raw, ungraded card".to_string()),
    });
    let h = harness(Setup {
        extractor,
        ..Default::default()
    });

    let outcome = h.orchestrator.process(jpeg(2)).await;
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::ExtractionRejected);
    assert!(failure.reason.contains("ungraded"));
    assert_eq!(h.text.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.image.calls.load(Ordering::SeqCst), 0);
    assert!(h.store.saved.lock().unwrap().is_empty());
    assert!(h.text_index.is_empty());
}

#[tokio::test]
async fn test_extractor_error_is_a_rejection() {
    let h = harness(Setup {
        extractor: ScriptedExtractor::failing("vision model returned 500"),
        ..Default::default()
    });
    let outcome = h.orchestrator.process(jpeg(3)).await;
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::ExtractionRejected);
    assert!(failure.reason.contains("vision model returned 500"));
}

#[tokio::test]
async fn test_missing_grade_is_incomplete() {
    let mut attrs = lebron();
    attrs.grade = None;
    attrs.subject = Some("   ".to_string());
    let h = harness(Setup {
        extractor: ScriptedExtractor::returning(valid(attrs)),
        ..Default::default()
    });

    let outcome = h.orchestrator.process(jpeg(4)).await;
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::ExtractionIncomplete);
    assert!(failure.reason.contains("grade"));
    assert!(failure.reason.contains("subject"));
    assert_eq!(h.text.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failing_enrichment_falls_back_to_base_description() {
    let h = harness(Setup {
        lookup: Some(Arc::new(ScriptedLookup { fail: true })),
        writer: Some(Arc::new(ScriptedWriter {
            fail: true,
            saw_snippets: AtomicUsize::new(0),
        })),
        ..Default::default()
    });

    let first = h.orchestrator.run(jpeg(5).with_enrichment(true)).await;
    let second = h.orchestrator.run(jpeg(5).with_enrichment(true)).await;

    assert!(first.trace.contains(&Step::Enrich));
    let a = first.outcome.as_ref().and_then(|o| o.card()).unwrap();
    let b = second.outcome.as_ref().and_then(|o| o.card()).unwrap();
    assert_eq!(a.description, a.attributes.base_description());
    assert_eq!(a.description, b.description);
    assert!(a.warnings.iter().any(|w| w.contains("lookup failed")));
}

#[tokio::test]
async fn test_writer_failure_alone_falls_back() {
    let h = harness(Setup {
        lookup: Some(Arc::new(ScriptedLookup { fail: false })),
        writer: Some(Arc::new(ScriptedWriter {
            fail: true,
            saw_snippets: AtomicUsize::new(0),
        })),
        ..Default::default()
    });
    let outcome = h.orchestrator.process(jpeg(6).with_enrichment(true)).await;
    let card = outcome.card().unwrap();
    assert_eq!(card.description, card.attributes.base_description());
    assert!(card.warnings.iter().any(|w| w.contains("description generation failed")));
}

#[tokio::test]
async fn test_successful_enrichment_uses_writer() {
    let writer = Arc::new(ScriptedWriter {
        fail: false,
        saw_snippets: AtomicUsize::new(0),
    });
    let h = harness(Setup {
        lookup: Some(Arc::new(ScriptedLookup { fail: false })),
        writer: Some(writer.clone()),
        ..Default::default()
    });

    let outcome = h.orchestrator.process(jpeg(7).with_enrichment(true)).await;
    let card = outcome.card().unwrap();
    assert_eq!(card.description, "A pristine LeBron James card.");
    assert_eq!(writer.saw_snippets.load(Ordering::SeqCst), 1);

    let stored = h.orchestrator.engine().get("12345678").await.unwrap().unwrap();
    assert_eq!(stored.description.as_deref(), Some("A pristine LeBron James card."));
}

#[tokio::test]
async fn test_enrichment_skipped_unless_requested() {
    let writer = Arc::new(ScriptedWriter {
        fail: false,
        saw_snippets: AtomicUsize::new(0),
    });
    let h = harness(Setup {
        writer: Some(writer),
        ..Default::default()
    });
    let state = h.orchestrator.run(jpeg(8)).await;
    assert!(!state.trace.contains(&Step::Enrich));
    let card = state.outcome.as_ref().and_then(|o| o.card()).unwrap();
    assert_eq!(card.description, card.attributes.base_description());
}

#[tokio::test]
async fn test_side_step_failure_is_not_fatal() {
    let h = harness(Setup {
        side_steps: vec![Arc::new(FailingSideStep), Arc::new(ScriptSideStep)],
        ..Default::default()
    });

    let state = h.orchestrator.run(jpeg(9)).await;
    assert_eq!(
        state.trace,
        vec![
            Step::Ingest,
            Step::Extract,
            Step::Verify,
            Step::SideStep(0),
            Step::SideStep(1),
            Step::Embed,
            Step::Persist
        ]
    );
    let card = state.outcome.as_ref().and_then(|o| o.card()).unwrap();
    assert!(card.warnings.iter().any(|w| w.contains("speech service unavailable")));
    // Description is only set by enrichment, which did not run.
    assert!(state.artifacts.is_empty());
}

#[tokio::test]
async fn test_side_step_sees_enriched_description() {
    let h = harness(Setup {
        writer: Some(Arc::new(ScriptedWriter {
            fail: false,
            saw_snippets: AtomicUsize::new(0),
        })),
        side_steps: vec![Arc::new(ScriptSideStep)],
        ..Default::default()
    });
    let state = h.orchestrator.run(jpeg(10).with_enrichment(true)).await;
    assert_eq!(
        state.artifacts.get("narration_script").map(String::as_str),
        Some("A pristine LeBron James card.")
    );
}

#[tokio::test]
async fn test_embedding_failure_is_fatal() {
    let h = harness(Setup {
        text: Arc::new(HashTextEmbedder {
            dims: DIMS,
            fail: true,
            calls: AtomicUsize::new(0),
        }),
        ..Default::default()
    });
    let outcome = h.orchestrator.process(jpeg(11)).await;
    assert_eq!(failure_kind(&outcome), Some(FailureKind::EmbeddingFailed));
    assert!(h.store.saved.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_vector_length_is_embedding_failure() {
    let h = harness(Setup {
        image: Arc::new(HashImageEmbedder {
            output_dims: DIMS - 1,
            calls: AtomicUsize::new(0),
        }),
        ..Default::default()
    });
    let outcome = h.orchestrator.process(jpeg(12)).await;
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::EmbeddingFailed);
    assert!(failure.reason.contains("image embedding has 7 dimensions"));
}

#[tokio::test]
async fn test_reprocessing_replaces_record() {
    let h = harness(Setup::default());
    assert!(h.orchestrator.process(jpeg(13)).await.is_success());

    let mut updated = lebron();
    updated.subject = Some("LeBron James (Rookie)".to_string());
    h.extractor.set(valid(updated));
    assert!(h.orchestrator.process(jpeg(14)).await.is_success());

    let all = h.orchestrator.engine().list_all(10).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].attributes.subject, "LeBron James (Rookie)");
}

#[tokio::test]
async fn test_deleted_card_leaves_search() {
    let h = harness(Setup::default());
    let state = h.orchestrator.run(jpeg(15)).await;
    assert!(state.outcome.as_ref().unwrap().is_success());

    assert!(h.orchestrator.engine().delete("12345678").await.unwrap());

    let text_vec = state.text_vector.unwrap();
    let results = h
        .orchestrator
        .engine()
        .search(&HybridQuery {
            text_vector: Some(&text_vec),
            image_vector: None,
            top_k: 5,
            weights: SearchWeights::default(),
            filters: None,
        })
        .await
        .unwrap();
    assert!(results.is_empty());
    assert!(!h.orchestrator.engine().delete("12345678").await.unwrap());
}

#[tokio::test]
async fn test_unsafe_identifier_is_unverified_but_stored() {
    let mut attrs = lebron();
    attrs.identifier = Some("1234 5678".to_string());
    let h = harness(Setup {
        extractor: ScriptedExtractor::returning(valid(attrs)),
        ..Default::default()
    });
    let outcome = h.orchestrator.process(jpeg(16)).await;
    let card = outcome.card().unwrap();
    assert_eq!(card.verification_status, VerificationStatus::Unverified);
    assert!(card.verification_url.is_none());
    assert!(card.warnings.iter().any(|w| w.starts_with("verify:")));
}

#[tokio::test]
async fn test_image_store_failure_is_persistence_failure() {
    let h = harness(Setup {
        image_store_fails: true,
        ..Default::default()
    });
    let outcome = h.orchestrator.process(jpeg(17)).await;
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, FailureKind::PersistenceFailed);
    assert!(failure.reason.contains("image store write failed"));
    assert!(h.text_index.is_empty());
    assert!(h.orchestrator.engine().get("12345678").await.unwrap().is_none());
}

#[tokio::test]
async fn test_index_write_failure_is_persistence_failure() {
    let h = harness(Setup {
        image_index: Some(Arc::new(ReadOnlyIndex {
            inner: InMemoryIndex::new("image", DIMS),
        })),
        ..Default::default()
    });
    let state = h.orchestrator.run(jpeg(18)).await;
    assert_eq!(state.trace.last(), Some(&Step::Persist));
    let failure = state.outcome.as_ref().and_then(|o| o.failure()).unwrap();
    assert_eq!(failure.kind, FailureKind::PersistenceFailed);
    assert!(failure.reason.contains("image index write failed"), "{}", failure.reason);
    assert!(failure.reason.contains("readonly"));
    assert_eq!(*h.store.aborted.lock().unwrap(), vec!["mem://12345678.jpeg".to_string()]);
    assert!(h.store.committed.lock().unwrap().is_empty());
}
