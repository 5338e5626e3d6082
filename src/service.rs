//! Caller-facing facade over the pipeline and the retrieval engine.
//!
//! [`CardService::from_config`] builds every capability once from the
//! configuration; [`CardService::new`] takes them ready-made, which is how
//! tests inject doubles. Both the CLI and the HTTP server go through this
//! type.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use slabvault_core::capability::{CardExtractor, DescriptionWriter, FactLookup};
use slabvault_core::embedding::{ImageEmbedder, TextEmbedder};
use slabvault_core::models::{CardMetadata, Modality};
use slabvault_core::pipeline::steps::{decode_base64, normalize_content_type};
use slabvault_core::pipeline::{
    CardInput, Capabilities, ImagePayload, Orchestrator, Outcome, PipelineOptions, ProcessingState,
    SideStep,
};
use slabvault_core::search::{
    DeleteError, HybridQuery, RetrievalEngine, SearchResult, SearchWeights,
};
use slabvault_core::store::SearchFilters;

use crate::chat::ChatClient;
use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::embedding::{create_image_embedder, create_text_embedder};
use crate::enrich::{ChatDescriptionWriter, WebLookup};
use crate::extract::{DisabledExtractor, OpenAiExtractor};
use crate::image_store::FsImageStore;
use crate::migrate::migrate_pool;
use crate::sqlite_index::SqliteIndex;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request itself is unusable (no query vector source, bad payload).
    #[error("{0}")]
    InvalidQuery(String),
    #[error(transparent)]
    Delete(#[from] DeleteError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Image half of a search query.
#[derive(Debug, Clone)]
pub struct QueryImage {
    pub payload: ImagePayload,
    pub content_type: String,
}

/// A search request before embedding.
///
/// At least one of `text` and `image` is required. Unset knobs fall back
/// to the `[retrieval]` configuration.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub image: Option<QueryImage>,
    pub top_k: Option<usize>,
    pub weights: Option<SearchWeights>,
    pub filters: Option<SearchFilters>,
}

pub struct CardService {
    orchestrator: Orchestrator,
    text_embedder: Arc<dyn TextEmbedder>,
    image_embedder: Arc<dyn ImageEmbedder>,
    retrieval: RetrievalConfig,
    enrich_by_default: bool,
}

impl CardService {
    pub fn new(
        capabilities: Capabilities,
        engine: RetrievalEngine,
        options: PipelineOptions,
        retrieval: RetrievalConfig,
    ) -> Self {
        let text_embedder = capabilities.text_embedder.clone();
        let image_embedder = capabilities.image_embedder.clone();
        Self {
            orchestrator: Orchestrator::new(capabilities, engine, options),
            text_embedder,
            image_embedder,
            retrieval,
            enrich_by_default: false,
        }
    }

    pub fn with_enrich_by_default(mut self, enrich: bool) -> Self {
        self.enrich_by_default = enrich;
        self
    }

    pub fn with_side_step(mut self, step: Arc<dyn SideStep>) -> Self {
        self.orchestrator = self.orchestrator.with_side_step(step);
        self
    }

    /// Open the database, run migrations and build every capability.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate_pool(&pool).await?;

        let text_embedder = create_text_embedder(&config.embedding)?;
        let image_embedder = create_image_embedder(&config.image_embedding)?;

        let engine = RetrievalEngine::new(
            Arc::new(SqliteIndex::new(pool.clone(), Modality::Text, text_embedder.dims())),
            Arc::new(SqliteIndex::new(pool, Modality::Image, image_embedder.dims())),
        );

        let extractor: Arc<dyn CardExtractor> =
            if config.extraction.is_enabled() {
                Arc::new(OpenAiExtractor::new(ChatClient::new(&config.extraction)?))
            } else {
                Arc::new(DisabledExtractor)
            };
        let writer: Option<Arc<dyn DescriptionWriter>> =
            if config.writer.is_enabled() {
                Some(Arc::new(ChatDescriptionWriter::new(ChatClient::new(&config.writer)?)))
            } else {
                None
            };
        let lookup: Option<Arc<dyn FactLookup>> =
            match config.lookup.url {
                Some(_) => Some(Arc::new(WebLookup::new(&config.lookup)?)),
                None => None,
            };

        info!(
            extraction = %config.extraction.provider,
            text_embedding = %text_embedder.model_name(),
            image_embedding = %image_embedder.model_name(),
            lookup = lookup.is_some(),
            writer = writer.is_some(),
            "card service ready"
        );

        let capabilities = Capabilities {
            extractor,
            lookup,
            writer,
            text_embedder,
            image_embedder,
            image_store: Arc::new(FsImageStore::new(config.storage.image_dir.clone())),
        };

        Ok(Self::new(
            capabilities,
            engine,
            config.pipeline.options(),
            config.retrieval.clone(),
        )
        .with_enrich_by_default(config.pipeline.enrich_by_default))
    }

    pub fn enrich_by_default(&self) -> bool {
        self.enrich_by_default
    }

    pub fn retrieval(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    pub fn pipeline_options(&self) -> &PipelineOptions {
        self.orchestrator.options()
    }

    /// Run the pipeline for one card.
    pub async fn process_card(&self, input: CardInput) -> Outcome {
        self.orchestrator.process(input).await
    }

    /// Run the pipeline and keep the full state (trace, artifacts).
    pub async fn process_card_traced(&self, input: CardInput) -> ProcessingState {
        self.orchestrator.run(input).await
    }

    pub async fn search(&self, query: SearchQuery) -> Result<Vec<SearchResult>, ServiceError> {
        let text = query.text.filter(|t| !t.trim().is_empty());
        if text.is_none() && query.image.is_none() {
            return Err(ServiceError::InvalidQuery(
                "search needs query text, a query image, or both".to_string(),
            ));
        }

        let weights = query.weights.unwrap_or_else(|| self.retrieval.weights());
        if weights.text < 0.0 || weights.image < 0.0 {
            return Err(ServiceError::InvalidQuery("weights must be >= 0".to_string()));
        }
        let top_k = query.top_k.unwrap_or(self.retrieval.default_top_k);

        let image = match query.image {
            Some(img) => Some(decode_query_image(img)?),
            None => None,
        };

        let text_embed = async {
            match text.as_deref() {
                Some(t) => self.text_embedder.embed_text(t).await.map(Some),
                None => Ok(None),
            }
        };
        let image_embed = async {
            match image.as_ref() {
                Some((bytes, ct)) => self.image_embedder.embed_image(bytes, ct).await.map(Some),
                None => Ok(None),
            }
        };
        let (text_vector, image_vector) = tokio::try_join!(text_embed, image_embed)?;

        let results = self
            .orchestrator
            .engine()
            .search(&HybridQuery {
                text_vector: text_vector.as_deref(),
                image_vector: image_vector.as_deref(),
                top_k,
                weights,
                filters: query.filters.as_ref(),
            })
            .await?;
        Ok(results)
    }

    /// Stored cards, newest first.
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<CardMetadata>, ServiceError> {
        let limit = limit.unwrap_or(self.retrieval.list_limit);
        Ok(self.orchestrator.engine().list_all(limit).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<CardMetadata>, ServiceError> {
        Ok(self.orchestrator.engine().get(id).await?)
    }

    /// Remove a card from both indexes. `Ok(false)` when it was not stored.
    pub async fn delete(&self, id: &str) -> Result<bool, ServiceError> {
        let existed = self.orchestrator.engine().delete(id).await?;
        if existed {
            info!(id, "card deleted");
        }
        Ok(existed)
    }
}

fn decode_query_image(image: QueryImage) -> Result<(Vec<u8>, String), ServiceError> {
    let bytes = match image.payload {
        ImagePayload::Bytes(b) => b,
        ImagePayload::Base64(s) => decode_base64(&s)
            .map_err(|e| ServiceError::InvalidQuery(format!("query image is not valid base64: {}", e)))?,
    };
    if bytes.is_empty() {
        return Err(ServiceError::InvalidQuery("query image is empty".to_string()));
    }
    Ok((bytes, normalize_content_type(&image.content_type)))
}
