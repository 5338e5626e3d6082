//! Card attribute extraction through a vision-capable chat model.
//!
//! The image is sent inline as a base64 `data:` URL (PDFs as a file part)
//! together with an instruction to answer with one JSON object:
//!
//! ```json
//! { "valid": true, "rejection_reason": null,
//!   "identifier": "12345678", "subject": "LeBron James", "year": "2003-04",
//!   "manufacturer": "Upper Deck", "grade": 10,
//!   "sub_category": "Exquisite Collection", "sub_number": "78" }
//! ```
//!
//! Models are loose with types, so numbers are accepted where strings are
//! expected and vice versa (`"grade": "GEM MT 10"` reads as 10).

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::debug;

use slabvault_core::capability::{CardExtractor, ExtractedAttributes, ExtractionOutput};

use crate::chat::ChatClient;

const SYSTEM_PROMPT: &str = "You read photos and scans of professionally graded trading cards \
(slabs). Decide whether the image shows a single graded card with a readable label. \
Answer with one JSON object with the keys: valid (boolean), rejection_reason (string or null), \
identifier (the certification number on the label), subject (player or character), year, \
manufacturer, grade (integer 1-10), sub_category (set or parallel, or null), \
sub_number (card number, or null). Use null for anything you cannot read. \
Never guess a certification number.";

pub struct OpenAiExtractor {
    chat: ChatClient,
}

impl OpenAiExtractor {
    pub fn new(chat: ChatClient) -> Self {
        Self { chat }
    }

    fn messages(image: &[u8], content_type: &str, hint: Option<&str>) -> Value {
        let data_url = format!("data:{};base64,{}", content_type, STANDARD.encode(image));
        let mut instruction = "Extract the card attributes.".to_string();
        if let Some(h) = hint.filter(|h| !h.trim().is_empty()) {
            instruction.push_str(" Context from the uploader: ");
            instruction.push_str(h.trim());
        }

        let media = if content_type == "application/pdf" {
            json!({ "type": "file", "file": { "filename": "card.pdf", "file_data": data_url } })
        } else {
            json!({ "type": "image_url", "image_url": { "url": data_url } })
        };

        json!([
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": [ { "type": "text", "text": instruction }, media ] }
        ])
    }
}

#[async_trait]
impl CardExtractor for OpenAiExtractor {
    async fn extract(
        &self,
        image: &[u8],
        content_type: &str,
        hint: Option<&str>,
    ) -> Result<ExtractionOutput> {
        let content = self
            .chat
            .complete(Self::messages(image, content_type, hint), true)
            .await?;
        debug!(model = self.chat.model(), "extractor responded");
        parse_extraction(&content)
    }
}

/// Extractor used when `[extraction]` is disabled; every call fails, so
/// every card ends as `extraction_rejected`.
pub struct DisabledExtractor;

#[async_trait]
impl CardExtractor for DisabledExtractor {
    async fn extract(
        &self,
        _image: &[u8],
        _content_type: &str,
        _hint: Option<&str>,
    ) -> Result<ExtractionOutput> {
        anyhow::bail!("Extraction provider is disabled")
    }
}

/// Parse the model's JSON answer into an [`ExtractionOutput`].
pub fn parse_extraction(content: &str) -> Result<ExtractionOutput> {
    let value: Value = serde_json::from_str(strip_code_fence(content))
        .context("Extractor did not return valid JSON")?;
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("Extractor did not return a JSON object"))?;

    let valid = match obj.get("valid") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    };
    // Attributes may be top-level or nested under "attributes".
    let fields = obj
        .get("attributes")
        .and_then(|a| a.as_object())
        .unwrap_or(obj);

    let attributes = ExtractedAttributes {
        identifier: text_field(fields.get("identifier")),
        subject: text_field(fields.get("subject")),
        year: text_field(fields.get("year")),
        manufacturer: text_field(fields.get("manufacturer")),
        grade: grade_field(fields.get("grade")),
        sub_category: text_field(fields.get("sub_category")),
        sub_number: text_field(fields.get("sub_number")),
    };

    Ok(ExtractionOutput {
        valid,
        attributes: if valid { Some(attributes) } else { None },
        rejection_reason: text_field(obj.get("rejection_reason")),
    })
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    match trimmed.strip_prefix("```") {
        Some(rest) => {
            let rest = rest.strip_prefix("json").unwrap_or(rest);
            rest.strip_suffix("```").unwrap_or(rest).trim()
        }
        None => trimmed,
    }
}

fn text_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer grade from a number or from the last number in a label string.
/// Half grades and anything outside `u8` read as absent.
fn grade_field(value: Option<&Value>) -> Option<u8> {
    match value? {
        Value::Number(n) => n.as_u64().and_then(|g| u8::try_from(g).ok()),
        Value::String(s) => s
            .split(|c: char| !c.is_ascii_digit() && c != '.')
            .filter(|part| !part.is_empty())
            .last()
            .and_then(|part| part.parse::<u8>().ok()),
        _ => None,
    }
}
