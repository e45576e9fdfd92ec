//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use semantra::embedding::TextEncoder;
use semantra::error::{Result, SemantraError};
use semantra::index::{PointId, SearchHits, VectorIndexer};
use semantra::payload::Record;
use semantra::storage::KeyValueStore;
use semantra::storage::memory::MemoryKvStore;
use semantra::vector::DistanceMetric;

/// Encoder with a fixed text -> vector table that counts its calls.
///
/// Unknown texts encode to the zero vector.
#[derive(Debug)]
pub struct TableEncoder {
    dimension: usize,
    table: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl TableEncoder {
    pub fn new(dimension: usize, entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            dimension,
            table: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every text seen so far, in call order.
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }
}

#[async_trait]
impl TextEncoder for TableEncoder {
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.lock().extend(texts.iter().cloned());
        Ok(texts
            .iter()
            .map(|t| {
                self.table
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| vec![0.0; self.dimension])
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "table"
    }
}

/// Key-value store that records every write it forwards.
#[derive(Debug, Clone, Default)]
pub struct RecordingKvStore {
    inner: MemoryKvStore,
    writes: Arc<Mutex<Vec<String>>>,
}

impl RecordingKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().clear();
    }
}

impl KeyValueStore for RecordingKvStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.writes.lock().push(format!("put {key}"));
        self.inner.put(key, value)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.writes.lock().push(format!("delete {key}"));
        self.inner.delete(key)
    }

    fn has(&self, key: &str) -> Result<bool> {
        self.inner.has(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.keys_with_prefix(prefix)
    }
}

#[derive(Debug)]
struct FlatCollection {
    dimension: usize,
    points: Vec<(PointId, Vec<f32>, Record)>,
}

/// Brute-force backend with UUID point ids, standing in for a remote
/// vector service.
#[derive(Debug, Default)]
pub struct FlatIndexer {
    collections: RwLock<HashMap<String, FlatCollection>>,
}

impl FlatIndexer {
    pub fn new() -> Self {
        Self::default()
    }
}

fn missing(name: &str) -> SemantraError {
    SemantraError::not_found(format!("collection '{name}'"))
}

impl VectorIndexer for FlatIndexer {
    fn backend_name(&self) -> &str {
        "flat"
    }

    fn create_collection(&self, name: &str, dimension: usize, _metric: DistanceMetric) -> Result<()> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(SemantraError::already_exists(name));
        }
        collections.insert(
            name.to_string(),
            FlatCollection {
                dimension,
                points: Vec::new(),
            },
        );
        Ok(())
    }

    fn drop_collection(&self, name: &str) -> Result<()> {
        self.collections
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| missing(name))
    }

    fn insert(&self, name: &str, vectors: &[Vec<f32>], payloads: &[Record]) -> Result<Vec<PointId>> {
        let mut collections = self.collections.write();
        let collection = collections.get_mut(name).ok_or_else(|| missing(name))?;
        let mut ids = Vec::new();
        for (vector, payload) in vectors.iter().zip(payloads) {
            if vector.len() != collection.dimension {
                return Err(SemantraError::dimension_mismatch(collection.dimension, vector.len()));
            }
            let id = PointId::Str(uuid::Uuid::new_v4().to_string());
            collection
                .points
                .push((id.clone(), vector.clone(), payload.clone()));
            ids.push(id);
        }
        Ok(ids)
    }

    fn get_payloads(&self, name: &str, ids: &[PointId]) -> Result<Vec<Record>> {
        let collections = self.collections.read();
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        ids.iter()
            .map(|id| {
                collection
                    .points
                    .iter()
                    .find(|(pid, _, _)| pid == id)
                    .map(|(_, _, payload)| payload.clone())
                    .ok_or_else(|| SemantraError::not_found(id.to_string()))
            })
            .collect()
    }

    fn search(&self, name: &str, query: &[f32], k: usize) -> Result<SearchHits> {
        let collections = self.collections.read();
        let collection = collections.get(name).ok_or_else(|| missing(name))?;
        let mut scored: Vec<(f32, &PointId, &Record)> = collection
            .points
            .iter()
            .map(|(id, vector, payload)| {
                let score = vector.iter().zip(query).map(|(a, b)| a * b).sum();
                (score, id, payload)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut hits = SearchHits::default();
        for (score, id, payload) in scored.into_iter().take(k) {
            hits.payloads.push(payload.clone());
            hits.ids.push(id.clone());
            hits.scores.push(score);
        }
        Ok(hits)
    }

    fn delete(&self, name: &str, ids: &[PointId]) -> Result<()> {
        let mut collections = self.collections.write();
        let collection = collections.get_mut(name).ok_or_else(|| missing(name))?;
        collection.points.retain(|(id, _, _)| !ids.contains(id));
        Ok(())
    }

    fn delete_all(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write();
        let collection = collections.get_mut(name).ok_or_else(|| missing(name))?;
        collection.points.clear();
        Ok(())
    }

    fn get_size(&self, name: &str) -> Result<usize> {
        let collections = self.collections.read();
        Ok(collections.get(name).ok_or_else(|| missing(name))?.points.len())
    }

    fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }
}
