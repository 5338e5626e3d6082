//! # slabvault CLI (`slab`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `slab init` | Create the SQLite database and index tables |
//! | `slab process <file>` | Run one card image through the pipeline |
//! | `slab search` | Hybrid search by `--text` and/or `--image` |
//! | `slab list` | Stored cards, newest first |
//! | `slab get <id>` | One stored card |
//! | `slab delete <id>` | Remove a card from both indexes |
//! | `slab serve` | Start the HTTP API |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `slabvault=info,slabvault_core=info,tower_http=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slabvault::config;
use slabvault::get;
use slabvault::migrate;
use slabvault::process;
use slabvault::search::{self, SearchArgs};
use slabvault::server;
use slabvault::service::CardService;
use slabvault_core::store::SearchFilters;

/// slabvault: graded card ingestion and hybrid text + image search.
#[derive(Parser)]
#[command(name = "slab", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/slab.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    #[command(flatten)]
    Card(CardCommand),
}

/// Commands that run against a configured [`CardService`].
#[derive(Subcommand)]
enum CardCommand {
    /// Process one card image (jpeg, png, webp or pdf).
    Process {
        /// Image file.
        path: PathBuf,

        /// Override the content type inferred from the extension.
        #[arg(long)]
        content_type: Option<String>,

        /// Free-text hint passed to the extractor.
        #[arg(long)]
        hint: Option<String>,

        /// Run the lookup + description writer step.
        #[arg(long, conflicts_with = "no_enrich")]
        enrich: bool,

        /// Skip enrichment even when `pipeline.enrich_by_default` is set.
        #[arg(long)]
        no_enrich: bool,
    },

    /// Search stored cards.
    Search {
        /// Text query, embedded with the text model.
        #[arg(long)]
        text: Option<String>,

        /// Query image, embedded with the image model.
        #[arg(long)]
        image: Option<PathBuf>,

        /// Content type of the query image.
        #[arg(long)]
        content_type: Option<String>,

        /// Number of results.
        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        text_weight: Option<f64>,

        #[arg(long)]
        image_weight: Option<f64>,

        #[arg(long)]
        subject: Option<String>,

        #[arg(long)]
        year: Option<String>,

        #[arg(long)]
        manufacturer: Option<String>,

        #[arg(long)]
        min_grade: Option<u8>,

        #[arg(long)]
        max_grade: Option<u8>,
    },

    /// List stored cards, newest first.
    List {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show one stored card.
    Get {
        /// Certification number.
        id: String,
    },

    /// Delete a card from both indexes.
    Delete {
        /// Certification number.
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slabvault=info,slabvault_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Card(command) => {
            let service = CardService::from_config(&cfg).await?;
            run_command(&service, command).await?;
        }
    }

    Ok(())
}

async fn run_command(service: &CardService, command: CardCommand) -> anyhow::Result<()> {
    match command {
        CardCommand::Process {
            path,
            content_type,
            hint,
            enrich,
            no_enrich,
        } => {
            let enrich = enrich_override(enrich, no_enrich);
            process::run_process(service, &path, content_type, hint, enrich).await
        }
        CardCommand::Search {
            text,
            image,
            content_type,
            top_k,
            text_weight,
            image_weight,
            subject,
            year,
            manufacturer,
            min_grade,
            max_grade,
        } => {
            let args = SearchArgs {
                text,
                image,
                content_type,
                top_k,
                text_weight,
                image_weight,
                filters: SearchFilters {
                    subject,
                    year,
                    manufacturer,
                    min_grade,
                    max_grade,
                },
            };
            search::run_search(service, args).await
        }
        CardCommand::List { limit } => get::run_list(service, limit).await,
        CardCommand::Get { id } => get::run_get(service, &id).await,
        CardCommand::Delete { id } => get::run_delete(service, &id).await,
    }
}

/// `--enrich` / `--no-enrich` as a per-run override; `None` defers to
/// `pipeline.enrich_by_default`.
fn enrich_override(enrich: bool, no_enrich: bool) -> Option<bool> {
    match (enrich, no_enrich) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process_flags(args: &[&str]) -> Option<bool> {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Card(CardCommand::Process {
                enrich, no_enrich, ..
            }) => enrich_override(enrich, no_enrich),
            _ => panic!("expected process"),
        }
    }

    #[test]
    fn test_enrichment_override_flags() {
        assert_eq!(process_flags(&["slab", "process", "a.jpg"]), None);
        assert_eq!(process_flags(&["slab", "process", "a.jpg", "--enrich"]), Some(true));
        assert_eq!(
            process_flags(&["slab", "process", "a.jpg", "--no-enrich"]),
            Some(false)
        );
        assert!(Cli::try_parse_from(["slab", "process", "a.jpg", "--enrich", "--no-enrich"]).is_err());
    }

    #[test]
    fn test_service_commands_are_flattened() {
        let cli = Cli::try_parse_from(["slab", "get", "12345678"]).unwrap();
        assert!(matches!(cli.command, Commands::Card(CardCommand::Get { .. })));
        let cli = Cli::try_parse_from(["slab", "serve"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve));
    }
}
