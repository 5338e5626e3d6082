//! Minimal client for OpenAI-compatible chat completions.

use anyhow::Result;
use serde_json::{json, Value};

use crate::config::ChatConfig;
use crate::http;

pub struct ChatClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl ChatClient {
    /// Requires `model` in the config and `OPENAI_API_KEY` in the environment.
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model required for chat provider '{}'", config.provider))?;
        let api_key = http::env_key("OPENAI_API_KEY")
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            api_key,
            model,
            max_retries: config.max_retries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` and return the first choice's text. With `json_mode`
    /// the model is asked for a single JSON object.
    pub async fn complete(&self, messages: Value, json_mode: bool) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = http::post_json(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "chat completions",
        )
        .await?;
        first_choice_text(&response)
    }
}

pub fn first_choice_text(response: &Value) -> Result<String> {
    response
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}
