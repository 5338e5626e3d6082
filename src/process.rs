//! `slab process`: run one image file through the pipeline.

use anyhow::{bail, Context, Result};
use std::path::Path;

use slabvault_core::pipeline::{CardInput, Outcome};

use crate::service::CardService;

/// Guess a content type from the file extension.
pub fn content_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

pub async fn run_process(
    service: &CardService,
    path: &Path,
    content_type: Option<String>,
    hint: Option<String>,
    enrich: Option<bool>,
) -> Result<()> {
    let content_type = match content_type {
        Some(ct) => ct,
        None => content_type_for_path(path)
            .map(str::to_string)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "cannot infer the content type of {}; pass --content-type",
                    path.display()
                )
            })?,
    };
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut input = CardInput::from_bytes(bytes, content_type)
        .with_enrichment(enrich.unwrap_or(service.enrich_by_default()));
    if let Some(h) = hint {
        input = input.with_hint(h);
    }

    let state = service.process_card_traced(input).await;
    let trace: Vec<String> = state.trace.iter().map(|s| s.to_string()).collect();
    println!("steps: {}", trace.join(" -> "));

    match state.outcome {
        Some(Outcome::Success(card)) => {
            println!("{}", serde_json::to_string_pretty(&card)?);
            Ok(())
        }
        Some(Outcome::Failure(failure)) => bail!("{}: {}", failure.kind, failure.reason),
        None => bail!("pipeline finished without an outcome"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for_path() {
        assert_eq!(content_type_for_path(Path::new("a/card.JPG")), Some("image/jpeg"));
        assert_eq!(content_type_for_path(Path::new("slab.pdf")), Some("application/pdf"));
        assert_eq!(content_type_for_path(Path::new("notes.txt")), None);
        assert_eq!(content_type_for_path(Path::new("noext")), None);
    }
}
