//! # slabvault core
//!
//! Runtime-agnostic logic for slabvault: card models, capability traits,
//! the processing pipeline state machine, the vector index abstraction,
//! and the hybrid (text + image) retrieval engine.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Concrete capabilities (model clients, SQLite index, image storage) live
//! in the `slabvault` application crate and are injected at startup.

pub mod capability;
pub mod embedding;
pub mod models;
pub mod pipeline;
pub mod search;
pub mod store;
