//! Embedded HNSW backend.
//!
//! [`EmbeddedIndexer`] keeps every collection's [`HnswIndex`] in memory and
//! stores point payloads in a [`KeyValueStore`], one key per point. The graph
//! structure only becomes durable on [`VectorIndexer::flush`], which writes one
//! `<base_path>/<name>.db` artifact per collection and then the registry
//! (`name -> artifact path`) as a single key-value entry.
//!
//! # Consistency
//!
//! Vector and payload writes are two stores without a shared transaction:
//!
//! - `insert` adds the vectors, then writes one payload key per point. A crash
//!   in between leaves vectors without payloads.
//! - `delete` tombstones the vectors, then removes the payload keys. A crash in
//!   between leaves payloads without vectors.
//! - payload writes are immediate but graph changes wait for `flush`, so a
//!   crash before `flush` leaves payloads for points the reloaded graph never
//!   saw.
//!
//! Searches skip a neighbor whose payload is missing, log it, and report the id
//! in [`SearchHits::missing`]. `get_payloads` reports the same situation as an
//! `IntegrityGap` error.
//!
//! # Backend-defined behavior
//!
//! - `get_payloads` fails the whole batch on the first absent id (`NotFound`).
//! - `delete` ignores ids that are not live in the collection.
//! - `get_size` is exact.
//! - ids are never reused: the next id is the number of points ever added,
//!   including deleted ones.
//!
//! # Locking
//!
//! Each collection sits behind its own `RwLock`. `insert`, `delete` and
//! `drop_collection` hold the write lock across both stores; `search`,
//! `get_payloads` and the snapshot taken by `flush` hold the read lock.
//! Lifecycle changes and flushes are additionally serialized with each other.
//! A dropped collection is marked under its write lock, and operations that
//! reached it before the drop fail with `NotFound` instead of writing into the
//! namespace a re-created collection of the same name now owns.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::config::{HnswParams, SemantraConfig};
use crate::error::{Result, SemantraError};
use crate::index::{KeySpace, PointId, SearchHits, VectorIndexer};
use crate::payload::{PayloadCodec, Record};
use crate::storage::KeyValueStore;
use crate::storage::file::write_atomic;
use crate::vector::{AnnMetric, DistanceMetric, HnswConfig, HnswIndex};

/// Backend name used in key namespaces.
pub const BACKEND_NAME: &str = "hnsw";

const ARTIFACT_EXTENSION: &str = "db";

/// Settings for [`EmbeddedIndexer`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedIndexerConfig {
    /// Directory holding the per-collection artifacts.
    pub base_path: PathBuf,
    /// Prefix of every key this indexer writes.
    pub key_root: String,
    /// Parameters for newly created collections.
    pub hnsw: HnswParams,
}

impl EmbeddedIndexerConfig {
    pub fn new<P: Into<PathBuf>>(base_path: P) -> Self {
        Self {
            base_path: base_path.into(),
            key_root: String::new(),
            hnsw: HnswParams::default(),
        }
    }

    pub fn with_key_root<S: Into<String>>(mut self, key_root: S) -> Self {
        self.key_root = key_root.into();
        self
    }

    pub fn with_hnsw(mut self, hnsw: HnswParams) -> Self {
        self.hnsw = hnsw;
        self
    }
}

impl From<&SemantraConfig> for EmbeddedIndexerConfig {
    fn from(config: &SemantraConfig) -> Self {
        Self {
            base_path: config.data_path.clone(),
            key_root: config.key_root.clone(),
            hnsw: config.hnsw.clone(),
        }
    }
}

/// Descriptive snapshot of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub metric: AnnMetric,
    /// Live points.
    pub size: usize,
    /// Points ever added; the next id to be assigned.
    pub next_id: u64,
    pub path: PathBuf,
}

#[derive(Debug)]
struct Collection {
    name: String,
    path: PathBuf,
    index: RwLock<HnswIndex>,
    /// Set by `drop_collection` while it holds the write lock.
    dropped: AtomicBool,
}

impl Collection {
    fn new(name: String, path: PathBuf, index: HnswIndex) -> Arc<Self> {
        Arc::new(Self {
            name,
            path,
            index: RwLock::new(index),
            dropped: AtomicBool::new(false),
        })
    }

    /// Call with the index lock held.
    fn ensure_live(&self) -> Result<()> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(SemantraError::not_found(format!(
                "collection '{}'",
                self.name
            )));
        }
        Ok(())
    }
}

/// Vector indexer backed by in-process HNSW graphs.
pub struct EmbeddedIndexer {
    config: EmbeddedIndexerConfig,
    keys: KeySpace,
    kv: Arc<dyn KeyValueStore>,
    collections: RwLock<AHashMap<String, Arc<Collection>>>,
    lifecycle: Mutex<()>,
}

impl fmt::Debug for EmbeddedIndexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddedIndexer")
            .field("config", &self.config)
            .field("collection_count", &self.collections.read().len())
            .finish()
    }
}

impl EmbeddedIndexer {
    /// Open the indexer, loading every collection listed in the registry.
    ///
    /// A registered collection whose artifact is missing is an unrecoverable
    /// inconsistency and fails with `IntegrityGap`.
    pub fn open(config: EmbeddedIndexerConfig, kv: Arc<dyn KeyValueStore>) -> Result<Self> {
        config.hnsw.validate()?;
        fs::create_dir_all(&config.base_path)?;

        let keys = KeySpace::new(&config.key_root, BACKEND_NAME);
        let mut collections = AHashMap::new();

        if let Some(bytes) = kv.get(&keys.registry_key())? {
            let registry: BTreeMap<String, PathBuf> = serde_json::from_slice(&bytes)?;
            for (name, path) in registry {
                if !path.is_file() {
                    return Err(SemantraError::integrity_gap(format!(
                        "collection '{name}' is registered but its artifact {} is missing",
                        path.display()
                    )));
                }
                let index = load_artifact(&path)?;
                info!(
                    "Loaded collection '{name}' ({} points) from {}",
                    index.len(),
                    path.display()
                );
                collections.insert(name.clone(), Collection::new(name, path, index));
            }
        }

        Ok(Self {
            config,
            keys,
            kv,
            collections: RwLock::new(collections),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EmbeddedIndexerConfig {
        &self.config
    }

    pub fn key_space(&self) -> &KeySpace {
        &self.keys
    }

    /// Deterministic artifact location for a collection.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.config
            .base_path
            .join(format!("{name}.{ARTIFACT_EXTENSION}"))
    }

    pub fn collection_info(&self, name: &str) -> Result<CollectionInfo> {
        let collection = self.collection(name)?;
        let index = collection.index.read();
        collection.ensure_live()?;
        Ok(CollectionInfo {
            name: collection.name.clone(),
            dimension: index.dimension(),
            metric: index.metric(),
            size: index.len(),
            next_id: index.ntotal(),
            path: collection.path.clone(),
        })
    }

    fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SemantraError::not_found(format!("collection '{name}'")))
    }

    fn install(&self, name: &str, index: HnswIndex) -> Result<()> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(SemantraError::already_exists(format!("collection '{name}'")));
        }
        let collection = Collection::new(name.to_string(), self.artifact_path(name), index);
        collections.insert(name.to_string(), collection);
        Ok(())
    }

    /// Remove a collection's artifact and payload keys, then forget it.
    ///
    /// Callers hold the lifecycle lock. If a removal fails the collection stays
    /// registered in memory, so a retried drop finishes the job.
    fn discard(&self, name: &str) -> Result<HnswConfig> {
        let collection = self.collection(name)?;

        // waits for in-flight operations on this collection
        let index = collection.index.write();

        match fs::remove_file(&collection.path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        // the prefix also catches payloads orphaned by an earlier crash
        let keys = self.kv.keys_with_prefix(&self.keys.payload_prefix(name))?;
        for key in &keys {
            self.kv.delete(key)?;
        }

        collection.dropped.store(true, Ordering::Release);
        self.collections.write().remove(name);

        info!(
            "Dropped collection '{name}' ({} payload keys removed)",
            keys.len()
        );
        Ok(index.config().clone())
    }

    fn insert_into(
        &self,
        collection: &Collection,
        vectors: &[Vec<f32>],
        payloads: &[Record],
    ) -> Result<Vec<PointId>> {
        let encoded = payloads
            .iter()
            .map(PayloadCodec::encode)
            .collect::<Result<Vec<_>>>()?;

        let mut index = collection.index.write();
        collection.ensure_live()?;
        let name = &collection.name;
        let ids = index.add(vectors)?;
        for (id, bytes) in ids.clone().zip(&encoded) {
            self.kv.put(&self.keys.payload_key(name, id), bytes)?;
        }

        debug!(
            "Inserted {} points into '{name}' (ids {}..{})",
            vectors.len(),
            ids.start,
            ids.end
        );
        Ok(ids.map(PointId::Num).collect())
    }

    fn delete_from(&self, collection: &Collection, ids: &[PointId]) -> Result<()> {
        let numeric: Vec<u64> = ids.iter().filter_map(PointId::as_u64).collect();

        let mut index = collection.index.write();
        collection.ensure_live()?;
        let name = &collection.name;
        let removed = index.remove_ids(&numeric);
        for &id in &numeric {
            self.kv.delete(&self.keys.payload_key(name, id))?;
        }

        debug!(
            "Deleted {removed} of {} requested points from '{name}'",
            ids.len()
        );
        Ok(())
    }
}

impl VectorIndexer for EmbeddedIndexer {
    fn backend_name(&self) -> &str {
        BACKEND_NAME
    }

    /// Create a collection, or reopen the artifact already sitting at the
    /// collection's path (a collection whose registry entry was lost).
    ///
    /// `DotProduct` and `Cosine` both map to an inner-product graph; vectors
    /// are not normalized here.
    fn create_collection(
        &self,
        name: &str,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<()> {
        validate_name(name)?;
        let _lifecycle = self.lifecycle.lock();

        if self.collections.read().contains_key(name) {
            return Err(SemantraError::already_exists(format!("collection '{name}'")));
        }

        let path = self.artifact_path(name);
        let index = if path.is_file() {
            let index = load_artifact(&path)?;
            if index.dimension() != dimension {
                return Err(SemantraError::dimension_mismatch(
                    dimension,
                    index.dimension(),
                ));
            }
            info!(
                "Reopened collection '{name}' ({} points) from {}",
                index.len(),
                path.display()
            );
            index
        } else {
            let config = self.config.hnsw.to_config(dimension, metric.into());
            let index = HnswIndex::new(config)?;
            info!(
                "Created collection '{name}' (dimension {dimension}, metric {})",
                metric.name()
            );
            index
        };

        self.install(name, index)
    }

    fn drop_collection(&self, name: &str) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        self.discard(name).map(|_| ())
    }

    fn insert(&self, name: &str, vectors: &[Vec<f32>], payloads: &[Record]) -> Result<Vec<PointId>> {
        if vectors.len() != payloads.len() {
            return Err(SemantraError::invalid_argument(format!(
                "{} vectors but {} payloads",
                vectors.len(),
                payloads.len()
            )));
        }
        self.insert_into(&*self.collection(name)?, vectors, payloads)
    }

    fn get_payloads(&self, name: &str, ids: &[PointId]) -> Result<Vec<Record>> {
        let collection = self.collection(name)?;
        let index = collection.index.read();
        collection.ensure_live()?;

        let mut payloads = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(num) = id.as_u64().filter(|&n| index.contains(n)) else {
                return Err(SemantraError::not_found(format!(
                    "point {id} in collection '{name}'"
                )));
            };
            let bytes = self.kv.get(&self.keys.payload_key(name, num))?.ok_or_else(|| {
                SemantraError::integrity_gap(format!(
                    "point {id} in collection '{name}' has a vector but no payload"
                ))
            })?;
            payloads.push(PayloadCodec::decode(&bytes)?);
        }
        Ok(payloads)
    }

    fn search(&self, name: &str, query: &[f32], k: usize) -> Result<SearchHits> {
        let collection = self.collection(name)?;
        let index = collection.index.read();
        collection.ensure_live()?;
        let neighbors = index.search(query, k)?;

        let mut hits = SearchHits::default();
        for (id, score) in neighbors {
            match self.kv.get(&self.keys.payload_key(name, id))? {
                Some(bytes) => {
                    hits.payloads.push(PayloadCodec::decode(&bytes)?);
                    hits.ids.push(PointId::Num(id));
                    hits.scores.push(score);
                }
                None => {
                    warn!("Integrity gap: point {id} in '{name}' has no payload, skipping");
                    hits.missing.push(PointId::Num(id));
                }
            }
        }

        debug!(
            "Search on '{name}' returned {} hits ({} skipped)",
            hits.len(),
            hits.missing.len()
        );
        Ok(hits)
    }

    fn delete(&self, name: &str, ids: &[PointId]) -> Result<()> {
        self.delete_from(&*self.collection(name)?, ids)
    }

    fn delete_all(&self, name: &str) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        let config = self.discard(name)?;
        self.install(name, HnswIndex::new(config)?)?;
        info!("Recreated collection '{name}' empty");
        Ok(())
    }

    fn get_size(&self, name: &str) -> Result<usize> {
        let collection = self.collection(name)?;
        let index = collection.index.read();
        collection.ensure_live()?;
        Ok(index.len())
    }

    fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Write every collection's artifact, then the registry.
    ///
    /// Artifacts are replaced atomically; if any write fails, the registry
    /// entry is left as it was.
    fn flush(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();

        let mut collections: Vec<Arc<Collection>> =
            self.collections.read().values().cloned().collect();
        collections.sort_by(|a, b| a.name.cmp(&b.name));

        let mut registry = BTreeMap::new();
        for collection in &collections {
            let bytes = collection.index.read().to_bytes()?;
            write_atomic(&collection.path, &bytes)?;
            registry.insert(collection.name.clone(), collection.path.clone());
        }

        self.kv
            .put(&self.keys.registry_key(), &serde_json::to_vec(&registry)?)?;
        info!("Flushed {} collections", registry.len());
        Ok(())
    }
}

/// Longest collection name in bytes; keeps `<name>.db` and its temp sibling
/// within file name limits.
const MAX_NAME_LEN: usize = 200;

fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(SemantraError::invalid_argument(format!(
            "invalid collection name '{name}'"
        )));
    }
    Ok(())
}

fn load_artifact(path: &Path) -> Result<HnswIndex> {
    let bytes = fs::read(path)?;
    HnswIndex::from_bytes(&bytes)
        .map_err(|e| SemantraError::serialization(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::file::FileKvStore;
    use crate::storage::memory::MemoryKvStore;
    use tempfile::TempDir;

    fn small_params() -> HnswParams {
        HnswParams {
            m: 8,
            ef_construction: 32,
            ef_search: 32,
            seed: 42,
        }
    }

    fn open(dir: &TempDir, kv: &MemoryKvStore) -> EmbeddedIndexer {
        let config = EmbeddedIndexerConfig::new(dir.path().join("data")).with_hnsw(small_params());
        EmbeddedIndexer::open(config, Arc::new(kv.clone())).unwrap()
    }

    fn doc(t: &str) -> Record {
        Record::new().with("t", t)
    }

    #[test]
    fn test_create_then_size_is_zero() {
        let dir = TempDir::new().unwrap();
        let indexer = open(&dir, &MemoryKvStore::new());
        indexer
            .create_collection("docs", 128, DistanceMetric::Cosine)
            .unwrap();
        assert_eq!(indexer.get_size("docs").unwrap(), 0);
        assert_eq!(indexer.collection_names(), vec!["docs"]);
    }

    #[test]
    fn test_docs_scenario() {
        let dir = TempDir::new().unwrap();
        let indexer = open(&dir, &MemoryKvStore::new());
        indexer
            .create_collection("docs", 3, DistanceMetric::Cosine)
            .unwrap();

        let ids = indexer
            .insert(
                "docs",
                &[vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
                &[doc("a"), doc("b")],
            )
            .unwrap();
        assert_eq!(ids, vec![PointId::Num(0), PointId::Num(1)]);

        let hits = indexer.search("docs", &[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits.ids, vec![PointId::Num(0)]);
        assert_eq!(hits.payloads, vec![doc("a")]);
        assert_eq!(hits.scores, vec![1.0]);
        assert!(!hits.has_integrity_gaps());
    }

    #[test]
    fn test_lifecycle_errors() {
        let dir = TempDir::new().unwrap();
        let indexer = open(&dir, &MemoryKvStore::new());

        let err = indexer.drop_collection("never").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        indexer
            .create_collection("docs", 3, DistanceMetric::Cosine)
            .unwrap();
        let err = indexer
            .create_collection("docs", 3, DistanceMetric::Cosine)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        for bad in ["", "..", "a/b", "a\\b"] {
            let err = indexer
                .create_collection(bad, 3, DistanceMetric::Cosine)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }

        for op in [
            indexer.get_size("missing").map(|_| ()),
            indexer.search("missing", &[0.0; 3], 1).map(|_| ()),
            indexer.insert("missing", &[], &[]).map(|_| ()),
            indexer.delete("missing", &[PointId::Num(0)]),
            indexer.delete_all("missing"),
        ] {
            assert_eq!(op.unwrap_err().kind(), ErrorKind::NotFound);
        }
    }

    #[test]
    fn test_insert_validation() {
        let dir = TempDir::new().unwrap();
        let indexer = open(&dir, &MemoryKvStore::new());
        indexer
            .create_collection("docs", 3, DistanceMetric::Euclidean)
            .unwrap();

        let err = indexer
            .insert("docs", &[vec![1.0, 0.0, 0.0]], &[])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = indexer
            .insert("docs", &[vec![1.0, 0.0]], &[doc("a")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);

        let err = indexer.search("docs", &[1.0], 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);

        // nothing leaked into either store
        assert_eq!(indexer.get_size("docs").unwrap(), 0);
        assert_eq!(indexer.collection_info("docs").unwrap().next_id, 0);
    }

    #[test]
    fn test_ids_continue_after_existing_points() {
        let dir = TempDir::new().unwrap();
        let indexer = open(&dir, &MemoryKvStore::new());
        indexer
            .create_collection("docs", 2, DistanceMetric::Euclidean)
            .unwrap();

        indexer
            .insert("docs", &[vec![0.0, 0.0]], &[doc("a")])
            .unwrap();
        let ids = indexer
            .insert("docs", &[vec![1.0, 0.0], vec![2.0, 0.0]], &[doc("b"), doc("c")])
            .unwrap();
        assert_eq!(ids, vec![PointId::Num(1), PointId::Num(2)]);
    }

    #[test]
    fn test_euclidean_search_ascending() {
        let dir = TempDir::new().unwrap();
        let indexer = open(&dir, &MemoryKvStore::new());
        indexer
            .create_collection("geo", 2, DistanceMetric::Euclidean)
            .unwrap();
        indexer
            .insert(
                "geo",
                &[vec![0.0, 0.0], vec![3.0, 0.0], vec![1.0, 0.0]],
                &[doc("origin"), doc("far"), doc("near")],
            )
            .unwrap();

        let hits = indexer.search("geo", &[0.0, 0.0], 3).unwrap();
        assert_eq!(
            hits.ids,
            vec![PointId::Num(0), PointId::Num(2), PointId::Num(1)]
        );
        assert_eq!(hits.scores, vec![0.0, 1.0, 9.0]);
    }

    #[test]
    fn test_delete_semantics() {
        let dir = TempDir::new().unwrap();
        let kv = MemoryKvStore::new();
        let indexer = open(&dir, &kv);
        indexer
            .create_collection("docs", 2, DistanceMetric::Euclidean)
            .unwrap();
        indexer
            .insert("docs", &[vec![0.0, 0.0], vec![1.0, 1.0]], &[doc("a"), doc("b")])
            .unwrap();

        indexer.delete("docs", &[PointId::Num(0)]).unwrap();
        assert_eq!(indexer.get_size("docs").unwrap(), 1);
        let err = indexer
            .get_payloads("docs", &[PointId::Num(0)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(!kv.has("/index/hnsw/docs/0").unwrap());

        // absent ids are ignored
        indexer
            .delete("docs", &[PointId::Num(0), PointId::Num(99), PointId::Str("x".into())])
            .unwrap();
        assert_eq!(indexer.get_size("docs").unwrap(), 1);

        let hits = indexer.search("docs", &[0.0, 0.0], 5).unwrap();
        assert_eq!(hits.ids, vec![PointId::Num(1)]);

        // ids are not reused
        let ids = indexer
            .insert("docs", &[vec![2.0, 2.0]], &[doc("c")])
            .unwrap();
        assert_eq!(ids, vec![PointId::Num(2)]);
    }

    #[test]
    fn test_get_payloads_order_and_batch_failure() {
        let dir = TempDir::new().unwrap();
        let indexer = open(&dir, &MemoryKvStore::new());
        indexer
            .create_collection("docs", 2, DistanceMetric::Euclidean)
            .unwrap();
        indexer
            .insert("docs", &[vec![0.0, 0.0], vec![1.0, 1.0]], &[doc("a"), doc("b")])
            .unwrap();

        let payloads = indexer
            .get_payloads("docs", &[PointId::Num(1), PointId::Num(0)])
            .unwrap();
        assert_eq!(payloads, vec![doc("b"), doc("a")]);

        let err = indexer
            .get_payloads("docs", &[PointId::Num(0), PointId::Num(7)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_missing_payload_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        let kv = MemoryKvStore::new();
        let indexer = open(&dir, &kv);
        indexer
            .create_collection("docs", 2, DistanceMetric::Euclidean)
            .unwrap();
        indexer
            .insert("docs", &[vec![0.0, 0.0], vec![1.0, 0.0]], &[doc("a"), doc("b")])
            .unwrap();

        // simulate a crash between the vector add and the payload put
        kv.delete("/index/hnsw/docs/0").unwrap();

        let hits = indexer.search("docs", &[0.0, 0.0], 2).unwrap();
        assert_eq!(hits.ids, vec![PointId::Num(1)]);
        assert_eq!(hits.payloads, vec![doc("b")]);
        assert_eq!(hits.missing, vec![PointId::Num(0)]);

        let err = indexer
            .get_payloads("docs", &[PointId::Num(0)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityGap);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let kv = MemoryKvStore::new();
        let indexer = open(&dir, &kv);
        indexer
            .create_collection("docs", 2, DistanceMetric::Cosine)
            .unwrap();
        indexer
            .insert("docs", &[vec![0.6, 0.8], vec![1.0, 0.0]], &[doc("a"), doc("b")])
            .unwrap();

        indexer.flush().unwrap();
        let path = indexer.artifact_path("docs");
        let first = fs::read(&path).unwrap();
        let registry = kv.get("/index/hnsw/indexes").unwrap().unwrap();

        indexer.flush().unwrap();
        assert_eq!(fs::read(&path).unwrap(), first);
        assert_eq!(kv.get("/index/hnsw/indexes").unwrap().unwrap(), registry);
    }

    #[test]
    fn test_reload_restores_collections() {
        let dir = TempDir::new().unwrap();
        let kv = MemoryKvStore::new();
        let query = [0.8, 0.6];
        let before = {
            let indexer = open(&dir, &kv);
            indexer
                .create_collection("docs", 2, DistanceMetric::Cosine)
                .unwrap();
            indexer
                .insert(
                    "docs",
                    &[vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]],
                    &[doc("a"), doc("b"), doc("c")],
                )
                .unwrap();
            indexer.delete("docs", &[PointId::Num(1)]).unwrap();
            indexer.flush().unwrap();
            indexer.search("docs", &query, 3).unwrap()
        };

        let reopened = open(&dir, &kv);
        assert_eq!(reopened.collection_names(), vec!["docs"]);
        assert_eq!(reopened.get_size("docs").unwrap(), 2);
        assert_eq!(reopened.search("docs", &query, 3).unwrap(), before);

        let ids = reopened
            .insert("docs", &[vec![0.5, 0.5]], &[doc("d")])
            .unwrap();
        assert_eq!(ids, vec![PointId::Num(3)]);
    }

    #[test]
    fn test_unflushed_collection_is_not_reloaded() {
        let dir = TempDir::new().unwrap();
        let kv = MemoryKvStore::new();
        {
            let indexer = open(&dir, &kv);
            indexer
                .create_collection("docs", 2, DistanceMetric::Cosine)
                .unwrap();
            indexer
                .insert("docs", &[vec![1.0, 0.0]], &[doc("a")])
                .unwrap();
        }
        let reopened = open(&dir, &kv);
        assert!(reopened.collection_names().is_empty());
        // the payload write already happened: a known, documented gap
        assert!(kv.has("/index/hnsw/docs/0").unwrap());
    }

    #[test]
    fn test_missing_artifact_fails_startup() {
        let dir = TempDir::new().unwrap();
        let kv = MemoryKvStore::new();
        {
            let indexer = open(&dir, &kv);
            indexer
                .create_collection("docs", 2, DistanceMetric::Cosine)
                .unwrap();
            indexer.flush().unwrap();
            fs::remove_file(indexer.artifact_path("docs")).unwrap();
        }

        let config = EmbeddedIndexerConfig::new(dir.path().join("data"));
        let err = EmbeddedIndexer::open(config, Arc::new(kv)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IntegrityGap);
    }

    #[test]
    fn test_create_reopens_orphaned_artifact() {
        let dir = TempDir::new().unwrap();
        let kv = MemoryKvStore::new();
        {
            let indexer = open(&dir, &kv);
            indexer
                .create_collection("docs", 2, DistanceMetric::Euclidean)
                .unwrap();
            indexer
                .insert("docs", &[vec![1.0, 1.0]], &[doc("a")])
                .unwrap();
            indexer.flush().unwrap();
        }
        // lose the registry but keep the artifact
        kv.delete("/index/hnsw/indexes").unwrap();

        let indexer = open(&dir, &kv);
        assert!(indexer.collection_names().is_empty());

        let err = indexer
            .create_collection("docs", 3, DistanceMetric::Euclidean)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DimensionMismatch);

        indexer
            .create_collection("docs", 2, DistanceMetric::Euclidean)
            .unwrap();
        assert_eq!(indexer.get_size("docs").unwrap(), 1);
        let hits = indexer.search("docs", &[1.0, 1.0], 1).unwrap();
        assert_eq!(hits.payloads, vec![doc("a")]);
    }

    #[test]
    fn test_drop_removes_artifact_and_payloads() {
        let dir = TempDir::new().unwrap();
        let kv = MemoryKvStore::new();
        let indexer = open(&dir, &kv);
        indexer
            .create_collection("docs", 2, DistanceMetric::Cosine)
            .unwrap();
        indexer
            .create_collection("docs2", 2, DistanceMetric::Cosine)
            .unwrap();
        indexer
            .insert("docs", &[vec![1.0, 0.0], vec![0.0, 1.0]], &[doc("a"), doc("b")])
            .unwrap();
        indexer
            .insert("docs2", &[vec![1.0, 0.0]], &[doc("z")])
            .unwrap();
        indexer.flush().unwrap();

        indexer.drop_collection("docs").unwrap();
        assert!(!indexer.artifact_path("docs").exists());
        assert!(kv.keys_with_prefix("/index/hnsw/docs/").unwrap().is_empty());
        assert_eq!(kv.keys_with_prefix("/index/hnsw/docs2/").unwrap().len(), 1);
        assert_eq!(indexer.collection_names(), vec!["docs2"]);

        // a fresh collection with the same name starts over
        indexer
            .create_collection("docs", 2, DistanceMetric::Cosine)
            .unwrap();
        assert_eq!(indexer.get_size("docs").unwrap(), 0);
    }

    #[test]
    fn test_operations_holding_a_dropped_collection_fail() {
        let dir = TempDir::new().unwrap();
        let kv = MemoryKvStore::new();
        let indexer = open(&dir, &kv);
        indexer
            .create_collection("docs", 2, DistanceMetric::Euclidean)
            .unwrap();
        indexer
            .insert("docs", &[vec![0.0, 0.0], vec![1.0, 0.0]], &[doc("a"), doc("b")])
            .unwrap();

        // an operation that looked the collection up before the drop
        let stale = indexer.collection("docs").unwrap();
        indexer.drop_collection("docs").unwrap();
        indexer
            .create_collection("docs", 2, DistanceMetric::Euclidean)
            .unwrap();
        indexer
            .insert("docs", &[vec![5.0, 5.0]], &[doc("new")])
            .unwrap();

        let err = indexer
            .insert_into(&stale, &[vec![0.0, 1.0]], &[doc("late")])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = indexer
            .delete_from(&stale, &[PointId::Num(0)])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        assert_eq!(
            kv.keys_with_prefix("/index/hnsw/docs/").unwrap(),
            vec!["/index/hnsw/docs/0".to_string()]
        );
        assert_eq!(
            indexer.get_payloads("docs", &[PointId::Num(0)]).unwrap(),
            vec![doc("new")]
        );
        assert_eq!(indexer.get_size("docs").unwrap(), 1);
    }

    #[test]
    fn test_failed_drop_keeps_collection() {
        let dir = TempDir::new().unwrap();
        let kv = MemoryKvStore::new();
        let indexer = open(&dir, &kv);
        indexer
            .create_collection("docs", 2, DistanceMetric::Euclidean)
            .unwrap();
        indexer
            .insert("docs", &[vec![0.0, 0.0]], &[doc("a")])
            .unwrap();

        // a non-empty directory where the artifact should be cannot be removed
        let blocked = indexer.artifact_path("docs");
        fs::create_dir_all(blocked.join("inner")).unwrap();
        assert!(indexer.drop_collection("docs").is_err());

        assert_eq!(indexer.collection_names(), vec!["docs"]);
        assert_eq!(indexer.get_size("docs").unwrap(), 1);
        assert_eq!(
            indexer.get_payloads("docs", &[PointId::Num(0)]).unwrap(),
            vec![doc("a")]
        );

        fs::remove_dir_all(&blocked).unwrap();
        indexer.drop_collection("docs").unwrap();
        assert!(indexer.collection_names().is_empty());
        assert!(kv.keys_with_prefix("/index/hnsw/docs/").unwrap().is_empty());
    }

    #[test]
    fn test_long_names_with_file_store() {
        let dir = TempDir::new().unwrap();
        let kv = FileKvStore::open(dir.path().join("kv")).unwrap();
        let config = EmbeddedIndexerConfig::new(dir.path().join("data")).with_hnsw(small_params());
        let indexer = EmbeddedIndexer::open(config, Arc::new(kv)).unwrap();

        let name = "a".repeat(MAX_NAME_LEN);
        indexer
            .create_collection(&name, 2, DistanceMetric::Euclidean)
            .unwrap();
        indexer
            .insert(&name, &[vec![0.0, 0.0]], &[doc("a")])
            .unwrap();
        let hits = indexer.search(&name, &[0.0, 0.0], 1).unwrap();
        assert_eq!(hits.payloads, vec![doc("a")]);
        assert!(hits.missing.is_empty());
        indexer.flush().unwrap();

        let err = indexer
            .create_collection(&"a".repeat(MAX_NAME_LEN + 1), 2, DistanceMetric::Euclidean)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_search_with_unbounded_k_after_delete() {
        let dir = TempDir::new().unwrap();
        let indexer = open(&dir, &MemoryKvStore::new());
        indexer
            .create_collection("c", 2, DistanceMetric::Euclidean)
            .unwrap();
        indexer
            .insert("c", &[vec![0.0, 0.0], vec![1.0, 1.0]], &[doc("a"), doc("b")])
            .unwrap();
        indexer.delete("c", &[PointId::Num(0)]).unwrap();

        let hits = indexer.search("c", &[0.0, 0.0], usize::MAX).unwrap();
        assert_eq!(hits.ids, vec![PointId::Num(1)]);
    }

    #[test]
    fn test_delete_all_keeps_configuration() {
        let dir = TempDir::new().unwrap();
        let indexer = open(&dir, &MemoryKvStore::new());
        indexer
            .create_collection("geo", 2, DistanceMetric::Euclidean)
            .unwrap();
        indexer
            .insert("geo", &[vec![1.0, 0.0], vec![0.0, 1.0]], &[doc("a"), doc("b")])
            .unwrap();

        indexer.delete_all("geo").unwrap();
        let info = indexer.collection_info("geo").unwrap();
        assert_eq!(info.size, 0);
        assert_eq!(info.dimension, 2);
        assert_eq!(info.metric, AnnMetric::L2);

        let ids = indexer
            .insert("geo", &[vec![5.0, 5.0]], &[doc("c")])
            .unwrap();
        assert_eq!(ids, vec![PointId::Num(0)]);
        assert_eq!(
            indexer.get_payloads("geo", &ids).unwrap(),
            vec![doc("c")]
        );
    }

    #[test]
    fn test_failed_flush_keeps_previous_registry() {
        let dir = TempDir::new().unwrap();
        let kv = MemoryKvStore::new();
        let indexer = open(&dir, &kv);
        indexer
            .create_collection("docs", 2, DistanceMetric::Cosine)
            .unwrap();
        indexer.flush().unwrap();
        let registry = kv.get("/index/hnsw/indexes").unwrap();

        indexer
            .create_collection("blocked", 2, DistanceMetric::Cosine)
            .unwrap();
        // a non-empty directory at the artifact path makes the rename fail
        let blocked = indexer.artifact_path("blocked");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("x"), b"x").unwrap();

        assert!(indexer.flush().is_err());
        assert_eq!(kv.get("/index/hnsw/indexes").unwrap(), registry);
        assert!(indexer.artifact_path("docs").is_file());
    }

    #[test]
    fn test_concurrent_inserts_get_distinct_ids() {
        let dir = TempDir::new().unwrap();
        let indexer = Arc::new(open(&dir, &MemoryKvStore::new()));
        indexer
            .create_collection("docs", 2, DistanceMetric::Euclidean)
            .unwrap();

        let mut all_ids: Vec<u64> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let indexer = Arc::clone(&indexer);
                    scope.spawn(move || {
                        let mut ids = Vec::new();
                        for i in 0..10 {
                            let v = vec![t as f32, i as f32];
                            let batch = indexer
                                .insert("docs", &[v.clone(), v], &[doc("x"), doc("y")])
                                .unwrap();
                            let nums: Vec<u64> =
                                batch.iter().filter_map(PointId::as_u64).collect();
                            assert_eq!(nums[1], nums[0] + 1);
                            ids.extend(nums);
                        }
                        ids
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        all_ids.sort();
        assert_eq!(all_ids, (0..80).collect::<Vec<u64>>());
        assert_eq!(indexer.get_size("docs").unwrap(), 80);
    }
}
