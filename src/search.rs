//! `slab search`: hybrid search from the command line.

use anyhow::{Context, Result};
use std::path::PathBuf;

use slabvault_core::pipeline::ImagePayload;
use slabvault_core::search::SearchWeights;
use slabvault_core::store::SearchFilters;

use crate::process::content_type_for_path;
use crate::service::{CardService, QueryImage, SearchQuery};

pub struct SearchArgs {
    pub text: Option<String>,
    pub image: Option<PathBuf>,
    pub content_type: Option<String>,
    pub top_k: Option<usize>,
    pub text_weight: Option<f64>,
    pub image_weight: Option<f64>,
    pub filters: SearchFilters,
}

pub async fn run_search(service: &CardService, args: SearchArgs) -> Result<()> {
    let image = match args.image {
        Some(path) => {
            let content_type = args
                .content_type
                .or_else(|| content_type_for_path(&path).map(str::to_string))
                .unwrap_or_else(|| "image/jpeg".to_string());
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Some(QueryImage {
                payload: ImagePayload::Bytes(bytes),
                content_type,
            })
        }
        None => None,
    };

    let weights = match (args.text_weight, args.image_weight) {
        (None, None) => None,
        (t, i) => {
            let defaults = service.retrieval().weights();
            Some(SearchWeights {
                text: t.unwrap_or(defaults.text),
                image: i.unwrap_or(defaults.image),
            })
        }
    };

    let results = service
        .search(SearchQuery {
            text: args.text,
            image,
            top_k: args.top_k,
            weights,
            filters: Some(args.filters),
        })
        .await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let a = &result.card.attributes;
        println!(
            "{}. [{:.3}] {} {} {} (grade {})",
            i + 1,
            result.combined_score(),
            a.year,
            a.manufacturer,
            a.subject,
            a.grade
        );
        println!(
            "    text: {:.3}  image: {:.3}",
            result.text_score, result.image_score
        );
        println!("    id: {}", result.identifier());
        println!("    image: {}", result.card.image_path);
        println!();
    }

    Ok(())
}
