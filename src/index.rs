//! The index contract shared by every vector-search backend.
//!
//! [`VectorIndexer`] is the capability interface the orchestration layer talks
//! to. The embedded HNSW backend in [`embedded`] implements it; a remote,
//! externally managed vector service can implement it too, and the
//! orchestration layer holds either one as `Arc<dyn VectorIndexer>` without
//! ever asking which.
//!
//! # Backend-defined behavior
//!
//! A few behaviors are left to each backend but must be documented on the
//! implementation:
//!
//! - whether `get_payloads` fails the whole batch or per id on an absent id
//! - whether `delete` ignores ids that are already absent
//! - whether `get_size` is exact or approximate

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::payload::{FieldValue, Record};
use crate::vector::DistanceMetric;

pub mod embedded;

pub use embedded::{EmbeddedIndexer, EmbeddedIndexerConfig};

/// Identifier of a point within a collection.
///
/// The embedded backend hands out sequential integers; remote backends
/// commonly use string identifiers such as UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointId {
    Num(u64),
    Str(String),
}

impl PointId {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            PointId::Num(n) => Some(*n),
            PointId::Str(_) => None,
        }
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointId::Num(n) => write!(f, "{n}"),
            PointId::Str(s) => f.write_str(s),
        }
    }
}

impl From<u64> for PointId {
    fn from(id: u64) -> Self {
        PointId::Num(id)
    }
}

impl From<&str> for PointId {
    /// Numeric strings become [`PointId::Num`].
    fn from(id: &str) -> Self {
        id.parse::<u64>()
            .map(PointId::Num)
            .unwrap_or_else(|_| PointId::Str(id.to_string()))
    }
}

impl From<&PointId> for FieldValue {
    fn from(id: &PointId) -> Self {
        match id {
            PointId::Num(n) => match i64::try_from(*n) {
                Ok(n) => FieldValue::Integer(n),
                Err(_) => FieldValue::String(n.to_string()),
            },
            PointId::Str(s) => FieldValue::String(s.clone()),
        }
    }
}

/// Result of a nearest-neighbor query.
///
/// `payloads`, `ids` and `scores` are parallel and ordered best first. Scores
/// are distances for euclidean collections (ascending) and inner products
/// otherwise (descending). `missing` lists ids the index returned but whose
/// payload could not be found; those are not part of the parallel vectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    pub payloads: Vec<Record>,
    pub ids: Vec<PointId>,
    pub scores: Vec<f32>,
    pub missing: Vec<PointId>,
}

impl SearchHits {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether the query ran into vectors without payloads.
    pub fn has_integrity_gaps(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// Capability interface of a vector-search backend.
pub trait VectorIndexer: Send + Sync + fmt::Debug {
    /// Short backend name, used in key namespaces and logs.
    fn backend_name(&self) -> &str;

    /// Create an empty collection. Fails with `AlreadyExists` if `name` is live.
    fn create_collection(&self, name: &str, dimension: usize, metric: DistanceMetric)
    -> Result<()>;

    /// Irreversibly discard a collection's vectors, payloads and artifacts.
    /// Fails with `NotFound` if absent.
    fn drop_collection(&self, name: &str) -> Result<()>;

    /// Insert points; returns one id per point in input order.
    fn insert(&self, name: &str, vectors: &[Vec<f32>], payloads: &[Record])
    -> Result<Vec<PointId>>;

    /// Fetch payloads in the order of `ids`.
    fn get_payloads(&self, name: &str, ids: &[PointId]) -> Result<Vec<Record>>;

    /// Up to `k` approximate nearest neighbors of `query`, best first.
    fn search(&self, name: &str, query: &[f32], k: usize) -> Result<SearchHits>;

    /// Remove points and their payloads.
    fn delete(&self, name: &str, ids: &[PointId]) -> Result<()>;

    /// Empty a collection, keeping its dimension and metric.
    fn delete_all(&self, name: &str) -> Result<()>;

    /// Number of live points.
    fn get_size(&self, name: &str) -> Result<usize>;

    /// Names of the live collections, sorted.
    fn collection_names(&self) -> Vec<String>;

    /// Persist in-memory state. Backends that are durable on every write keep
    /// the default no-op.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Deterministic key-value namespaces used by an indexer backend.
///
/// - registry: `<root>/index/<backend>/indexes`
/// - payloads: `<root>/index/<backend>/<collection>/<id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    base: String,
}

impl KeySpace {
    pub fn new(root: &str, backend: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            base: format!("{root}/index/{backend}"),
        }
    }

    pub fn registry_key(&self) -> String {
        format!("{}/indexes", self.base)
    }

    pub fn payload_prefix(&self, collection: &str) -> String {
        format!("{}/{collection}/", self.base)
    }

    pub fn payload_key(&self, collection: &str, id: u64) -> String {
        format!("{}/{collection}/{id}", self.base)
    }
}
