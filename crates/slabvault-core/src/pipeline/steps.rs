//! Step implementations.
//!
//! Every step reads the current [`ProcessingState`] and returns a
//! [`StateUpdate`]; none of them mutate state directly. Fatal steps report
//! failure by returning [`StateUpdate::fatal`]; non-fatal steps only ever add
//! warnings.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, warn};

use crate::capability::{
    CardExtractor, DescriptionWriter, ExtractedAttributes, FactLookup, ImageStore, LookupResult,
};
use crate::embedding::{ImageEmbedder, TextEmbedder};
use crate::models::{CardAttributes, CardMetadata, CardRecord, MAX_GRADE, MIN_GRADE};
use crate::search::RetrievalEngine;

use super::state::{
    FailureKind, ImagePayload, Outcome, ProcessedCard, ProcessingState, StateUpdate, Verification,
    VerificationStatus,
};
use super::PipelineOptions;

// ============ Ingest ============

/// Lowercase, drop parameters (`; charset=…`), and fold `image/jpg` into
/// `image/jpeg`.
pub fn normalize_content_type(raw: &str) -> String {
    let base = raw.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    match base.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => base,
    }
}

/// Decode a base64 payload, accepting a `data:<type>;base64,` prefix and
/// embedded whitespace.
pub fn decode_base64(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let body = match data.split_once("base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    };
    let cleaned: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(cleaned)
}

/// MIME type declared by a `data:` URL, if `data` is one.
pub fn data_url_content_type(data: &str) -> Option<String> {
    let rest = data.trim_start().strip_prefix("data:")?;
    let (header, _) = rest.split_once(',')?;
    let mime = header.split(';').next()?.trim();
    if mime.is_empty() {
        None
    } else {
        Some(normalize_content_type(mime))
    }
}

pub fn ingest(options: &PipelineOptions, state: &ProcessingState) -> StateUpdate {
    let content_type = normalize_content_type(&state.input.content_type);
    if !options
        .allowed_content_types
        .iter()
        .any(|allowed| normalize_content_type(allowed) == content_type)
    {
        return StateUpdate::fatal(
            FailureKind::IngestFailed,
            format!(
                "unsupported content type '{}'; expected one of: {}",
                state.input.content_type,
                options.allowed_content_types.join(", ")
            ),
        );
    }

    let bytes = match &state.input.payload {
        ImagePayload::Bytes(b) => b.clone(),
        ImagePayload::Base64(s) => match decode_base64(s) {
            Ok(b) => b,
            Err(e) => {
                return StateUpdate::fatal(
                    FailureKind::IngestFailed,
                    format!("image payload is not valid base64: {}", e),
                )
            }
        },
    };

    if bytes.is_empty() {
        return StateUpdate::fatal(FailureKind::IngestFailed, "missing image payload");
    }
    if bytes.len() > options.max_image_bytes {
        return StateUpdate::fatal(
            FailureKind::IngestFailed,
            format!(
                "image is {} bytes; the limit is {} bytes",
                bytes.len(),
                options.max_image_bytes
            ),
        );
    }

    debug!(bytes = bytes.len(), content_type = %content_type, "ingested image");
    StateUpdate {
        content_type: Some(content_type),
        image: Some(bytes),
        ..Default::default()
    }
}

// ============ Extract ============

fn required(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Check that every required attribute is present and in range.
///
/// Returns the names of missing attributes on failure. Blank strings and
/// out-of-range grades count as missing.
pub fn validate_attributes(
    extracted: Option<ExtractedAttributes>,
) -> Result<CardAttributes, Vec<&'static str>> {
    let raw = extracted.unwrap_or_default();
    let identifier = required(raw.identifier);
    let subject = required(raw.subject);
    let year = required(raw.year);
    let manufacturer = required(raw.manufacturer);
    let grade = raw.grade.filter(|g| (MIN_GRADE..=MAX_GRADE).contains(g));

    let mut missing = Vec::new();
    if identifier.is_none() {
        missing.push("identifier");
    }
    if subject.is_none() {
        missing.push("subject");
    }
    if year.is_none() {
        missing.push("year");
    }
    if manufacturer.is_none() {
        missing.push("manufacturer");
    }
    if grade.is_none() {
        missing.push("grade");
    }

    match (identifier, subject, year, manufacturer, grade) {
        (Some(identifier), Some(subject), Some(year), Some(manufacturer), Some(grade)) => {
            Ok(CardAttributes {
                identifier,
                subject,
                year,
                manufacturer,
                grade,
                sub_category: required(raw.sub_category),
                sub_number: required(raw.sub_number),
            })
        }
        _ => Err(missing),
    }
}

pub async fn extract(extractor: &dyn CardExtractor, state: &ProcessingState) -> StateUpdate {
    let (Some(image), Some(content_type)) = (state.image.as_deref(), state.content_type.as_deref())
    else {
        return StateUpdate::fatal(FailureKind::ExtractionRejected, "no ingested image to extract from");
    };

    let output = match extractor
        .extract(image, content_type, state.input.hint.as_deref())
        .await
    {
        Ok(o) => o,
        Err(e) => {
            return StateUpdate::fatal(
                FailureKind::ExtractionRejected,
                format!("extraction failed: {:#}", e),
            )
        }
    };

    if !output.valid {
        let reason = output
            .rejection_reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "image was not recognized as a graded card".to_string());
        return StateUpdate::fatal(FailureKind::ExtractionRejected, reason);
    }

    match validate_attributes(output.attributes) {
        Ok(attributes) => StateUpdate {
            attributes: Some(attributes),
            ..Default::default()
        },
        Err(missing) => StateUpdate::fatal(
            FailureKind::ExtractionIncomplete,
            format!("missing required attributes: {}", missing.join(", ")),
        ),
    }
}

// ============ Verify ============

/// Build the certification lookup link for `identifier`.
///
/// Pure string construction; nothing is fetched.
pub fn verification_reference(base_url: &str, identifier: &str) -> Result<String, String> {
    let base = base_url.trim().trim_end_matches('/');
    if base.is_empty() {
        return Err("no verification base URL configured".to_string());
    }
    if identifier.is_empty() {
        return Err("identifier is empty".to_string());
    }
    if !identifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        return Err(format!(
            "identifier '{}' contains characters that cannot appear in a certification link",
            identifier
        ));
    }
    Ok(format!("{}/{}", base, identifier))
}

pub fn verify(options: &PipelineOptions, state: &ProcessingState) -> StateUpdate {
    let mut update = StateUpdate::default();
    let result = match state.attributes.as_ref() {
        Some(attrs) => verification_reference(&options.verification_base_url, &attrs.identifier),
        None => Err("no attributes to verify".to_string()),
    };
    update.verification = Some(match result {
        Ok(reference) => Verification {
            status: VerificationStatus::Linked,
            reference: Some(reference),
        },
        Err(e) => {
            update.warn(format!("verify: {}", e));
            Verification {
                status: VerificationStatus::Unverified,
                reference: None,
            }
        }
    });
    update
}

// ============ Enrich ============

/// Query sent to the lookup capability.
pub fn lookup_query(attrs: &CardAttributes) -> String {
    let mut parts = vec![
        attrs.year.as_str(),
        attrs.manufacturer.as_str(),
        attrs.subject.as_str(),
    ];
    if let Some(ref cat) = attrs.sub_category {
        parts.push(cat);
    }
    format!("{} card graded {}", parts.join(" "), attrs.grade)
}

pub async fn enrich(
    lookup: Option<&dyn FactLookup>,
    writer: Option<&dyn DescriptionWriter>,
    state: &ProcessingState,
) -> StateUpdate {
    let mut update = StateUpdate::default();
    let Some(attrs) = state.attributes.as_ref() else {
        update.warn("enrich: no attributes to describe");
        return update;
    };
    let base = attrs.base_description();

    let looked_up: Option<LookupResult> = match lookup {
        Some(l) => match l.lookup(&lookup_query(attrs)).await {
            Ok(found) => Some(found),
            Err(e) => {
                warn!(id = %attrs.identifier, error = %e, "lookup failed; using base description");
                update.warn(format!("enrich: lookup failed: {:#}", e));
                update.description = Some(base);
                return update;
            }
        },
        None => None,
    };

    let description = match writer {
        None => {
            update.warn("enrich: no description writer configured");
            base
        }
        Some(w) => match w.write_description(attrs, &base, looked_up.as_ref()).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                update.warn("enrich: description writer returned empty text");
                base
            }
            Err(e) => {
                warn!(id = %attrs.identifier, error = %e, "description writer failed; using base description");
                update.warn(format!("enrich: description generation failed: {:#}", e));
                base
            }
        },
    };

    update.lookup = looked_up;
    update.description = Some(description);
    update
}

// ============ Embed ============

fn check_len(which: &str, vector: &[f32], dims: usize) -> Result<(), String> {
    if vector.len() != dims {
        return Err(format!(
            "{} embedding has {} dimensions, expected {}",
            which,
            vector.len(),
            dims
        ));
    }
    Ok(())
}

pub async fn embed(
    text_embedder: &dyn TextEmbedder,
    image_embedder: &dyn ImageEmbedder,
    state: &ProcessingState,
) -> StateUpdate {
    let (Some(attrs), Some(image), Some(content_type)) = (
        state.attributes.as_ref(),
        state.image.as_deref(),
        state.content_type.as_deref(),
    ) else {
        return StateUpdate::fatal(FailureKind::EmbeddingFailed, "nothing to embed");
    };

    let text = attrs.embedding_text();
    let (text_res, image_res) = futures::join!(
        text_embedder.embed_text(&text),
        image_embedder.embed_image(image, content_type)
    );

    let mut errors = Vec::new();
    let text_vector = match text_res {
        Ok(v) => match check_len("text", &v, text_embedder.dims()) {
            Ok(()) => Some(v),
            Err(e) => {
                errors.push(e);
                None
            }
        },
        Err(e) => {
            errors.push(format!("text embedding failed: {:#}", e));
            None
        }
    };
    let image_vector = match image_res {
        Ok(v) => match check_len("image", &v, image_embedder.dims()) {
            Ok(()) => Some(v),
            Err(e) => {
                errors.push(e);
                None
            }
        },
        Err(e) => {
            errors.push(format!("image embedding failed: {:#}", e));
            None
        }
    };

    match (text_vector, image_vector) {
        (Some(t), Some(i)) => StateUpdate {
            text_vector: Some(t),
            image_vector: Some(i),
            ..Default::default()
        },
        _ => StateUpdate::fatal(FailureKind::EmbeddingFailed, errors.join("; ")),
    }
}

// ============ Persist ============

pub async fn persist(
    image_store: &dyn ImageStore,
    engine: &RetrievalEngine,
    state: &ProcessingState,
) -> StateUpdate {
    let (Some(attrs), Some(image), Some(content_type), Some(text_vector), Some(image_vector)) = (
        state.attributes.as_ref(),
        state.image.as_deref(),
        state.content_type.as_deref(),
        state.text_vector.as_ref(),
        state.image_vector.as_ref(),
    ) else {
        return StateUpdate::fatal(
            FailureKind::PersistenceFailed,
            "record is incomplete; nothing was stored",
        );
    };

    let image_path = match image_store
        .save(&attrs.identifier, image, content_type)
        .await
    {
        Ok(p) => p,
        Err(e) => {
            return StateUpdate::fatal(
                FailureKind::PersistenceFailed,
                format!("image store write failed: {:#}", e),
            )
        }
    };

    let description = state
        .description
        .clone()
        .unwrap_or_else(|| attrs.base_description());
    let (verification_status, verification_url) = match state.verification.as_ref() {
        Some(v) => (v.status, v.reference.clone()),
        None => (VerificationStatus::Unverified, None),
    };

    let record = CardRecord {
        metadata: CardMetadata {
            attributes: attrs.clone(),
            description: Some(description.clone()),
            image_path: image_path.clone(),
            verification_url: verification_url.clone(),
            created_at: chrono::Utc::now().timestamp(),
        },
        text_vector: text_vector.clone(),
        image_vector: image_vector.clone(),
    };

    if let Err(e) = engine.store(&record).await {
        let mut update = StateUpdate::fatal(
            FailureKind::PersistenceFailed,
            format!("index write failed: {}", e),
        );
        if let Err(abort_err) = image_store.abort(&image_path).await {
            warn!(id = %attrs.identifier, error = %abort_err, "could not discard staged image");
            update.warn(format!("persist: staged image not discarded: {:#}", abort_err));
        }
        return update;
    }

    if let Err(e) = image_store.commit(&image_path).await {
        return StateUpdate::fatal(
            FailureKind::PersistenceFailed,
            format!("image store commit failed: {:#}", e),
        );
    }

    StateUpdate {
        image_path: Some(image_path.clone()),
        description: Some(description.clone()),
        outcome: Some(Outcome::Success(ProcessedCard {
            attributes: attrs.clone(),
            description,
            image_path,
            verification_status,
            verification_url,
            warnings: state.warnings.clone(),
        })),
        ..Default::default()
    }
}
