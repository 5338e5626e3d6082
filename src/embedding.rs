//! Embedding providers.
//!
//! Text providers implement [`TextEmbedder`]:
//! - **[`DisabledTextEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAITextEmbedder`]**: `POST {url}/embeddings` (default `https://api.openai.com/v1`).
//! - **[`OllamaTextEmbedder`]**: `POST {url}/api/embed` on a local Ollama instance.
//!
//! Image providers implement [`ImageEmbedder`]:
//! - **[`DisabledImageEmbedder`]**
//! - **[`HttpImageEmbedder`]**: `POST {url}` with `{image, content_type, model}`
//!   (image as standard base64), expecting `{"embedding": [...]}` back.
//!   Any CLIP-style service can sit behind it.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use slabvault::config::EmbeddingConfig;
//! # use slabvault::embedding::create_text_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_text_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! Transient HTTP failures are retried (see [`crate::http`]).

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::sync::Arc;

use slabvault_core::embedding::{ImageEmbedder, TextEmbedder};

use crate::config::{EmbeddingConfig, ImageEmbeddingConfig};
use crate::http;

// ============ Disabled ============

/// Text embedder that always fails.
pub struct DisabledTextEmbedder {
    dims: usize,
}

#[async_trait]
impl TextEmbedder for DisabledTextEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
        bail!("Text embedding provider is disabled")
    }
}

/// Image embedder that always fails.
pub struct DisabledImageEmbedder {
    dims: usize,
}

#[async_trait]
impl ImageEmbedder for DisabledImageEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_image(&self, _image: &[u8], _content_type: &str) -> Result<Vec<f32>> {
        bail!("Image embedding provider is disabled")
    }
}

// ============ OpenAI ============

/// Text embeddings from the OpenAI API. Requires `OPENAI_API_KEY`.
pub struct OpenAITextEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAITextEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = http::env_key("OPENAI_API_KEY")
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl TextEmbedder for OpenAITextEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let json = http::post_json(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI embeddings",
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Take `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let first = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;
    let embedding = first
        .get("embedding")
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
    http::parse_vector(embedding, "OpenAI")
}

// ============ Ollama ============

/// Text embeddings from a local Ollama instance
/// (e.g. after `ollama pull nomic-embed-text`).
pub struct OllamaTextEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaTextEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let base = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: format!("{}/api/embed", base.trim_end_matches('/')),
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl TextEmbedder for OllamaTextEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let json = http::post_json(
            &self.client,
            &self.url,
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;
    http::parse_vector(first, "Ollama")
}

// ============ HTTP image embedder ============

pub struct HttpImageEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl HttpImageEmbedder {
    pub fn new(config: &ImageEmbeddingConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("image_embedding.url required for http provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("image_embedding.dims required for http provider"))?;

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url,
            model: config.model.clone().unwrap_or_else(|| "http".to_string()),
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ImageEmbedder for HttpImageEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_image(&self, image: &[u8], content_type: &str) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": self.model,
            "image": STANDARD.encode(image),
            "content_type": content_type,
        });
        let json = http::post_json(
            &self.client,
            &self.url,
            None,
            &body,
            self.max_retries,
            "image embedding",
        )
        .await?;
        let embedding = json
            .get("embedding")
            .ok_or_else(|| anyhow::anyhow!("Invalid image embedding response: missing embedding"))?;
        http::parse_vector(embedding, "image embedding")
    }
}

// ============ Factories ============

pub fn create_text_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn TextEmbedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledTextEmbedder {
            dims: config.dims.unwrap_or(0),
        })),
        "openai" => Ok(Arc::new(OpenAITextEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaTextEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

pub fn create_image_embedder(config: &ImageEmbeddingConfig) -> Result<Arc<dyn ImageEmbedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledImageEmbedder {
            dims: config.dims.unwrap_or(0),
        })),
        "http" => Ok(Arc::new(HttpImageEmbedder::new(config)?)),
        other => bail!("Unknown image_embedding provider: {}", other),
    }
}
