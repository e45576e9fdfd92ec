//! Orchestration layer.
//!
//! [`SemanticEngine`] binds a [`TextEncoder`] and a [`VectorIndexer`]
//! together. It keeps, per index, the set of record fields whose string values
//! are embedded ("indexed fields"), turns records into text and text into
//! vectors, and stamps search results with their point ids under
//! [`RESERVED_ID_FIELD`].
//!
//! An index exists for the engine only once `create_index` has stored its
//! indexed fields. Inserting into an index that was never configured is a
//! silent no-op (`Ok(None)`); every other operation on it is `NotFound`.
//!
//! ```
//! use std::sync::Arc;
//!
//! use semantra::embedding::HashingEncoder;
//! use semantra::engine::SemanticEngine;
//! use semantra::index::{EmbeddedIndexer, EmbeddedIndexerConfig};
//! use semantra::payload::Record;
//! use semantra::storage::memory::MemoryKvStore;
//!
//! # #[tokio::main]
//! # async fn main() -> semantra::error::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let kv = Arc::new(MemoryKvStore::new());
//! let indexer = EmbeddedIndexer::open(EmbeddedIndexerConfig::new(dir.path()), kv.clone())?;
//! let engine = SemanticEngine::new(
//!     kv,
//!     Arc::new(HashingEncoder::new(64)),
//!     Arc::new(indexer),
//!     64,
//!     "",
//! )?;
//!
//! engine.create_index("books", &["title".to_string()])?;
//! engine
//!     .insert("books", &[Record::new().with("title", "The Rust Programming Language")])
//!     .await?;
//!
//! let hits = engine.search("books", "rust programming", 1).await?;
//! assert_eq!(hits[0].get("_id").and_then(|v| v.as_i64()), Some(0));
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;

use crate::config::SemantraConfig;
use crate::embedding::{TextEncoder, encoder_from_config};
use crate::error::{Result, SemantraError};
use crate::index::{EmbeddedIndexer, EmbeddedIndexerConfig, PointId, SearchHits, VectorIndexer};
use crate::payload::{FieldValue, Record};
use crate::storage::KeyValueStore;
use crate::storage::file::FileKvStore;
use crate::vector::DistanceMetric;

/// Field injected into returned payloads carrying the point id.
///
/// A user field with the same name is overwritten in results.
pub const RESERVED_ID_FIELD: &str = "_id";

/// Summary of one index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStat {
    pub name: String,
    pub size: usize,
    pub indexed_fields: Vec<String>,
}

/// Semantic search over records.
pub struct SemanticEngine {
    kv: Arc<dyn KeyValueStore>,
    encoder: Arc<dyn TextEncoder>,
    indexer: Arc<dyn VectorIndexer>,
    vector_size: usize,
    fields_prefix: String,
}

impl fmt::Debug for SemanticEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemanticEngine")
            .field("encoder", &self.encoder.name())
            .field("backend", &self.indexer.backend_name())
            .field("vector_size", &self.vector_size)
            .finish()
    }
}

impl SemanticEngine {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        encoder: Arc<dyn TextEncoder>,
        indexer: Arc<dyn VectorIndexer>,
        vector_size: usize,
        key_root: &str,
    ) -> Result<Self> {
        if encoder.dimension() != vector_size {
            return Err(SemantraError::invalid_argument(format!(
                "encoder '{}' produces {} dimensions but vector_size is {vector_size}",
                encoder.name(),
                encoder.dimension()
            )));
        }
        Ok(Self {
            kv,
            encoder,
            indexer,
            vector_size,
            fields_prefix: format!("{}/fields/", key_root.trim_end_matches('/')),
        })
    }

    /// Wire up the file-backed store, the configured encoder and the embedded
    /// indexer.
    pub fn from_config(config: &SemantraConfig) -> Result<Self> {
        config.validate()?;
        let kv: Arc<dyn KeyValueStore> = Arc::new(FileKvStore::open(&config.kv_path)?);
        let encoder = encoder_from_config(&config.encoder, config.vector_size)?;
        let indexer = EmbeddedIndexer::open(EmbeddedIndexerConfig::from(config), kv.clone())?;
        Self::new(
            kv,
            encoder,
            Arc::new(indexer),
            config.vector_size,
            &config.key_root,
        )
    }

    pub fn indexer(&self) -> &Arc<dyn VectorIndexer> {
        &self.indexer
    }

    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    fn fields_key(&self, name: &str) -> String {
        format!("{}{name}", self.fields_prefix)
    }

    /// Create the backing collection, then record `fields` as indexed.
    ///
    /// Duplicate field names are dropped, keeping the first occurrence. If the
    /// collection cannot be created, stored configuration is left untouched.
    pub fn create_index(&self, name: &str, fields: &[String]) -> Result<()> {
        let mut unique: Vec<String> = Vec::with_capacity(fields.len());
        for field in fields {
            if !unique.contains(field) {
                unique.push(field.clone());
            }
        }

        self.indexer
            .create_collection(name, self.vector_size, DistanceMetric::Cosine)?;
        self.kv
            .put(&self.fields_key(name), &serde_json::to_vec(&unique)?)?;

        info!("Created index '{name}' on fields {unique:?}");
        Ok(())
    }

    /// Indexed fields of `name`, or `None` if the index is not configured.
    pub fn indexed_fields(&self, name: &str) -> Result<Option<Vec<String>>> {
        match self.kv.get(&self.fields_key(name))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn require_fields(&self, name: &str) -> Result<Vec<String>> {
        self.indexed_fields(name)?
            .ok_or_else(|| SemantraError::not_found(format!("index '{name}'")))
    }

    /// Names of every configured index, sorted.
    pub fn list_indexes(&self) -> Result<Vec<String>> {
        Ok(self
            .kv
            .keys_with_prefix(&self.fields_prefix)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&self.fields_prefix).map(str::to_string))
            .collect())
    }

    /// Embed and index `records`; the whole records are stored as payloads.
    ///
    /// Returns `Ok(None)` without touching any store when `name` is not a
    /// configured index.
    pub async fn insert(&self, name: &str, records: &[Record]) -> Result<Option<Vec<PointId>>> {
        let Some(fields) = self.indexed_fields(name)? else {
            warn!("Index '{name}' is not configured, ignoring {} records", records.len());
            return Ok(None);
        };
        if records.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let texts: Vec<String> = records.iter().map(|r| indexable_text(r, &fields)).collect();
        let vectors = self.encoder.encode(&texts).await?;
        if vectors.len() != records.len() {
            return Err(SemantraError::backend(format!(
                "encoder returned {} vectors for {} texts",
                vectors.len(),
                records.len()
            )));
        }

        let ids = self.indexer.insert(name, &vectors, records)?;
        debug!("Indexed {} records into '{name}'", ids.len());
        Ok(Some(ids))
    }

    /// Like [`SemanticEngine::search`], keeping scores and skipped ids.
    pub async fn search_hits(&self, name: &str, text: &str, k: usize) -> Result<SearchHits> {
        self.require_fields(name)?;
        let query = self.encoder.encode_one(text).await?;
        let mut hits = self.indexer.search(name, &query, k)?;
        for (payload, id) in hits.payloads.iter_mut().zip(&hits.ids) {
            payload.insert(RESERVED_ID_FIELD, FieldValue::from(id));
        }
        Ok(hits)
    }

    /// Payloads of the `k` records closest to `text`, best first, each carrying
    /// its id under [`RESERVED_ID_FIELD`].
    pub async fn search(&self, name: &str, text: &str, k: usize) -> Result<Vec<Record>> {
        Ok(self.search_hits(name, text, k).await?.payloads)
    }

    /// Payloads of `ids` in order, each carrying its id.
    pub fn get_payloads(&self, name: &str, ids: &[PointId]) -> Result<Vec<Record>> {
        self.require_fields(name)?;
        let mut payloads = self.indexer.get_payloads(name, ids)?;
        for (payload, id) in payloads.iter_mut().zip(ids) {
            payload.insert(RESERVED_ID_FIELD, FieldValue::from(id));
        }
        Ok(payloads)
    }

    pub fn delete(&self, name: &str, ids: &[PointId]) -> Result<()> {
        self.require_fields(name)?;
        self.indexer.delete(name, ids)
    }

    /// Remove the index configuration and drop the backing collection.
    pub fn drop_index(&self, name: &str) -> Result<()> {
        self.kv.delete(&self.fields_key(name))?;
        self.indexer.drop_collection(name)?;
        info!("Dropped index '{name}'");
        Ok(())
    }

    pub fn index_size(&self, name: &str) -> Result<usize> {
        self.indexer.get_size(name)
    }

    /// Summary of a configured index, or `None`.
    pub fn stat(&self, name: &str) -> Result<Option<IndexStat>> {
        let Some(indexed_fields) = self.indexed_fields(name)? else {
            return Ok(None);
        };
        Ok(Some(IndexStat {
            name: name.to_string(),
            size: self.indexer.get_size(name)?,
            indexed_fields,
        }))
    }

    pub fn flush(&self) -> Result<()> {
        self.indexer.flush()
    }
}

/// String values of indexed fields, in record order, joined by newlines.
fn indexable_text(record: &Record, fields: &[String]) -> String {
    record
        .iter()
        .filter(|(name, _)| fields.iter().any(|f| f == name))
        .filter_map(|(_, value)| value.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
