//! `slab get`, `slab list` and `slab delete`.

use anyhow::{bail, Result};

use slabvault_core::models::CardMetadata;

use crate::service::CardService;

pub async fn run_get(service: &CardService, id: &str) -> Result<()> {
    let card = match service.get(id).await? {
        Some(c) => c,
        None => bail!("card not found: {}", id),
    };

    println!("--- Card ---");
    println!("id:           {}", card.identifier());
    println!("subject:      {}", card.attributes.subject);
    println!("year:         {}", card.attributes.year);
    println!("manufacturer: {}", card.attributes.manufacturer);
    println!("grade:        {}", card.attributes.grade);
    if let Some(ref cat) = card.attributes.sub_category {
        println!("category:     {}", cat);
    }
    if let Some(ref num) = card.attributes.sub_number {
        println!("number:       {}", num);
    }
    println!("image:        {}", card.image_path);
    if let Some(ref url) = card.verification_url {
        println!("verify:       {}", url);
    }
    println!("created_at:   {}", format_ts_iso(card.created_at));
    println!();

    if let Some(ref description) = card.description {
        println!("--- Description ---");
        println!("{}", description);
    }

    Ok(())
}

pub async fn run_list(service: &CardService, limit: Option<usize>) -> Result<()> {
    let cards = service.list(limit).await?;
    if cards.is_empty() {
        println!("No cards stored.");
        return Ok(());
    }
    for card in &cards {
        println!("{}", summary_line(card));
    }
    println!("\n{} card(s)", cards.len());
    Ok(())
}

pub async fn run_delete(service: &CardService, id: &str) -> Result<()> {
    if service.delete(id).await? {
        println!("Deleted {}", id);
        Ok(())
    } else {
        bail!("card not found: {}", id)
    }
}

/// `12345678  2003-04 Upper Deck LeBron James  [10]  2025-01-01T00:00:00Z`
pub fn summary_line(card: &CardMetadata) -> String {
    let a = &card.attributes;
    format!(
        "{}  {} {} {}  [{}]  {}",
        a.identifier,
        a.year,
        a.manufacturer,
        a.subject,
        a.grade,
        format_ts_iso(card.created_at)
    )
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ts_iso() {
        assert_eq!(format_ts_iso(0), "1970-01-01T00:00:00Z");
    }
}
