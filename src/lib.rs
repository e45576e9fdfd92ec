//! # Semantra
//!
//! Semantic search over structured records.
//!
//! ## Features
//!
//! - Pluggable vector index behind one trait ([`index::VectorIndexer`])
//! - Embedded HNSW backend with per-collection on-disk artifacts
//! - Point payloads kept in a separate key-value store
//! - Orchestration that turns records into text, vectors and indexed points

pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod payload;
pub mod storage;
pub mod vector;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
