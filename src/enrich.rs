//! Enrichment capabilities: web fact lookup and the description writer.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use slabvault_core::capability::{DescriptionWriter, FactLookup, LookupResult, Snippet};
use slabvault_core::models::CardAttributes;

use crate::chat::ChatClient;
use crate::config::LookupConfig;
use crate::http;

/// Web search lookup speaking the Tavily request/response shape.
///
/// `POST {url}` with `{query, include_answer, max_results}`; the bearer
/// token comes from `LOOKUP_API_KEY` when set.
pub struct WebLookup {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    max_results: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
    #[serde(default)]
    answer: Option<String>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

impl WebLookup {
    pub fn new(config: &LookupConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("lookup.url required"))?;
        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url,
            api_key: http::env_key("LOOKUP_API_KEY"),
            max_results: config.max_results,
        })
    }
}

#[async_trait]
impl FactLookup for WebLookup {
    async fn lookup(&self, query: &str) -> Result<LookupResult> {
        let body = json!({
            "query": query,
            "include_answer": true,
            "max_results": self.max_results,
        });
        // Lookups are optional, so no retries.
        let value = http::post_json(
            &self.client,
            &self.url,
            self.api_key.as_deref(),
            &body,
            0,
            "lookup",
        )
        .await?;
        parse_search_response(value, self.max_results)
    }
}

fn parse_search_response(value: serde_json::Value, max_results: usize) -> Result<LookupResult> {
    let response: SearchResponse = serde_json::from_value(value)?;
    let snippets = response
        .results
        .into_iter()
        .filter(|hit| !hit.content.trim().is_empty())
        .take(max_results)
        .map(|hit| Snippet {
            title: hit.title,
            content: hit.content,
        })
        .collect();
    Ok(LookupResult {
        snippets,
        answer: response.answer.filter(|a| !a.trim().is_empty()),
    })
}

const WRITER_PROMPT: &str = "You write short catalogue descriptions of graded trading cards \
for collectors. Two to four sentences, plain prose, no markdown. Use the card attributes as \
ground truth; use the research notes only where they agree with them. Never change the grade, \
year, or certification number.";

/// Description writer backed by the chat completions endpoint.
pub struct ChatDescriptionWriter {
    chat: ChatClient,
}

impl ChatDescriptionWriter {
    pub fn new(chat: ChatClient) -> Self {
        Self { chat }
    }
}

/// User message for the writer: attributes, base description, notes.
pub fn writer_prompt(
    attributes: &CardAttributes,
    base_description: &str,
    lookup: Option<&LookupResult>,
) -> String {
    let mut prompt = format!(
        "Card attributes:\n{}\nCertification: {}\n\nBase description: {}\n",
        attributes.embedding_text(),
        attributes.identifier,
        base_description
    );
    if let Some(result) = lookup {
        if let Some(ref answer) = result.answer {
            prompt.push_str(&format!("\nResearch summary: {}\n", answer));
        }
        if !result.snippets.is_empty() {
            prompt.push_str("\nResearch notes:\n");
            for s in &result.snippets {
                prompt.push_str(&format!("- {}: {}\n", s.title, s.content));
            }
        }
    }
    prompt
}

#[async_trait]
impl DescriptionWriter for ChatDescriptionWriter {
    async fn write_description(
        &self,
        attributes: &CardAttributes,
        base_description: &str,
        lookup: Option<&LookupResult>,
    ) -> Result<String> {
        let messages = json!([
            { "role": "system", "content": WRITER_PROMPT },
            { "role": "user", "content": writer_prompt(attributes, base_description, lookup) }
        ]);
        let text = self.chat.complete(messages, false).await?;
        Ok(text.trim().to_string())
    }
}
