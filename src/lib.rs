//! # slabvault
//!
//! Ingest photos and scans of graded trading cards ("slabs") and find them
//! again by text, by image, or both.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────────────────────┐   ┌──────────────┐
//! │ CLI/HTTP │──▶│ Pipeline: ingest → extract → verify →     │──▶│ SQLite        │
//! │ (slab)   │   │ enrich → side-steps → embed → persist     │   │ text_index    │
//! └────┬─────┘   └──────────────────────────────────────────┘   │ image_index   │
//!      │                                                         └──────┬───────┘
//!      └──────────────── hybrid search (weighted fusion) ◀──────────────┘
//! ```
//!
//! The pipeline state machine, the vector-index trait and the retrieval
//! engine live in `slabvault-core`; this crate supplies configuration,
//! storage and the HTTP capability clients.
//!
//! ## Quick Start
//!
//! ```bash
//! slab init
//! slab process ./scans/lebron.jpg --enrich
//! slab search --text "LeBron rookie" --min-grade 9
//! slab serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`sqlite_index`] | SQLite vector index |
//! | [`embedding`] | Text and image embedding providers |
//! | [`extract`] | Vision-model card extraction |
//! | [`enrich`] | Web lookup and description writer |
//! | [`image_store`] | Filesystem image storage |
//! | [`service`] | Caller-facing facade |
//! | [`server`] | HTTP API |

pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod enrich;
pub mod extract;
pub mod get;
pub mod http;
pub mod image_store;
pub mod migrate;
pub mod process;
pub mod search;
pub mod server;
pub mod service;
pub mod sqlite_index;
