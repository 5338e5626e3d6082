use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use slabvault_core::pipeline::{
    PipelineOptions, DEFAULT_CONTENT_TYPES, DEFAULT_MAX_IMAGE_BYTES, DEFAULT_VERIFICATION_BASE_URL,
};
use slabvault_core::search::{SearchWeights, DEFAULT_IMAGE_WEIGHT, DEFAULT_TEXT_WEIGHT};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub extraction: ChatConfig,
    #[serde(default)]
    pub writer: ChatConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub image_embedding: ImageEmbeddingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub image_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_content_types")]
    pub allowed_content_types: Vec<String>,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
    #[serde(default = "default_verification_base_url")]
    pub verification_base_url: String,
    /// Enrichment flag used when a request does not say.
    #[serde(default)]
    pub enrich_by_default: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            allowed_content_types: default_content_types(),
            max_image_bytes: default_max_image_bytes(),
            verification_base_url: default_verification_base_url(),
            enrich_by_default: false,
        }
    }
}

impl PipelineConfig {
    pub fn options(&self) -> PipelineOptions {
        PipelineOptions {
            allowed_content_types: self.allowed_content_types.clone(),
            max_image_bytes: self.max_image_bytes,
            verification_base_url: self.verification_base_url.clone(),
        }
    }
}

fn default_content_types() -> Vec<String> {
    DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect()
}
fn default_max_image_bytes() -> usize {
    DEFAULT_MAX_IMAGE_BYTES
}
fn default_verification_base_url() -> String {
    DEFAULT_VERIFICATION_BASE_URL.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_text_weight")]
    pub text_weight: f64,
    #[serde(default = "default_image_weight")]
    pub image_weight: f64,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            text_weight: default_text_weight(),
            image_weight: default_image_weight(),
            default_top_k: default_top_k(),
            list_limit: default_list_limit(),
        }
    }
}

impl RetrievalConfig {
    pub fn weights(&self) -> SearchWeights {
        SearchWeights {
            text: self.text_weight,
            image: self.image_weight,
        }
    }
}

fn default_text_weight() -> f64 {
    DEFAULT_TEXT_WEIGHT
}
fn default_image_weight() -> f64 {
    DEFAULT_IMAGE_WEIGHT
}
fn default_top_k() -> usize {
    10
}
fn default_list_limit() -> usize {
    100
}

/// An OpenAI-compatible chat completions endpoint. Used for both
/// `[extraction]` and `[writer]`.
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_openai_url")]
    pub url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: default_openai_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

impl ChatConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LookupConfig {
    /// Search endpoint; lookup is skipped when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_lookup_max_results")]
    pub max_results: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_results: default_lookup_max_results(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_lookup_max_results() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider (default `http://localhost:11434`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImageEmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ImageEmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ImageEmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    0
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_chat_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Pipeline
    if config.pipeline.max_image_bytes == 0 {
        anyhow::bail!("pipeline.max_image_bytes must be > 0");
    }
    if config.pipeline.allowed_content_types.is_empty() {
        anyhow::bail!("pipeline.allowed_content_types must not be empty");
    }

    // Retrieval
    let r = &config.retrieval;
    if r.text_weight < 0.0 || r.image_weight < 0.0 {
        anyhow::bail!("retrieval weights must be >= 0");
    }
    if r.default_top_k < 1 {
        anyhow::bail!("retrieval.default_top_k must be >= 1");
    }
    if r.list_limit < 1 {
        anyhow::bail!("retrieval.list_limit must be >= 1");
    }

    // Chat endpoints
    for (section, chat) in [("extraction", &config.extraction), ("writer", &config.writer)] {
        match chat.provider.as_str() {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown {} provider: '{}'. Must be disabled or openai.",
                section,
                other
            ),
        }
        if chat.is_enabled() && chat.model.is_none() {
            anyhow::bail!(
                "{}.model must be specified when provider is '{}'",
                section,
                chat.provider
            );
        }
    }

    // Text embedding
    let e = &config.embedding;
    match e.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if e.is_enabled() {
        if e.dims.is_none() || e.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
        }
        if e.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                e.provider
            );
        }
    }

    // Image embedding
    let ie = &config.image_embedding;
    match ie.provider.as_str() {
        "disabled" | "http" => {}
        other => anyhow::bail!(
            "Unknown image_embedding provider: '{}'. Must be disabled or http.",
            other
        ),
    }
    if ie.is_enabled() {
        if ie.dims.is_none() || ie.dims == Some(0) {
            anyhow::bail!(
                "image_embedding.dims must be > 0 when provider is '{}'",
                ie.provider
            );
        }
        if ie.url.is_none() {
            anyhow::bail!(
                "image_embedding.url must be specified when provider is '{}'",
                ie.provider
            );
        }
    }

    Ok(())
}
