//! HNSW (Hierarchical Navigable Small World) index for approximate vector search.
//!
//! HNSW builds a multi-layer proximity graph where each layer holds a subset of
//! the nodes of the layer below. A query descends greedily through the sparse
//! upper layers and finishes with a beam search of width `ef` on layer 0.
//!
//! Node ids double as point ids: the n-th vector ever added gets id `n`.
//! Removal only tombstones a node. The node keeps routing traffic through the
//! graph but is never returned, and its id is never handed out again.
//!
//! The structure is fully deterministic. The layer of a node is derived from
//! the configured seed and the node id, so two indexes fed the same vectors
//! are identical, and serializing an index twice yields the same bytes.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::{Cursor, Read};
use std::ops::Range;

use bit_vec::BitVec;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SemantraError};
use crate::vector::distance::AnnMetric;

const ARTIFACT_MAGIC: &[u8; 8] = b"SMHNSW01";
const ARTIFACT_VERSION: u32 = 1;
const MAX_LEVEL: usize = 16;

/// Configuration for HNSW index construction and search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Vector dimension.
    pub dimension: usize,
    /// Metric used to order neighbors.
    pub metric: AnnMetric,
    /// Maximum number of connections per node in the upper layers.
    /// Layer 0 allows twice as many.
    pub m: usize,
    /// Size of the candidate set during construction.
    pub ef_construction: usize,
    /// Size of the candidate set during search.
    pub ef_search: usize,
    /// Seed for layer assignment.
    pub seed: u64,
}

impl HnswConfig {
    pub fn new(dimension: usize, metric: AnnMetric) -> Self {
        Self {
            dimension,
            metric,
            m: 32,
            ef_construction: 200,
            ef_search: 64,
            seed: 42,
        }
    }

    /// Set the M parameter (connections per node).
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn with_ef_search(mut self, ef_search: usize) -> Self {
        self.ef_search = ef_search;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Validate the configuration parameters.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(SemantraError::invalid_argument("Dimension must be > 0"));
        }
        if self.m < 2 {
            return Err(SemantraError::invalid_argument("M must be >= 2"));
        }
        if self.ef_construction < self.m {
            return Err(SemantraError::invalid_argument(
                "ef_construction must be >= M",
            ));
        }
        if self.ef_search == 0 {
            return Err(SemantraError::invalid_argument("ef_search must be > 0"));
        }
        Ok(())
    }

    fn max_connections(&self, layer: usize) -> usize {
        if layer == 0 { self.m * 2 } else { self.m }
    }

    fn level_multiplier(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }
}

/// A node in the HNSW graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct HnswNode {
    vector: Vec<f32>,
    /// `neighbors[layer]` lists the ids connected at that layer.
    neighbors: Vec<Vec<u64>>,
    deleted: bool,
}

/// Priority queue entry for HNSW search.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    distance: f32,
    id: u64,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// HNSW index over fixed-dimension `f32` vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HnswIndex {
    config: HnswConfig,
    nodes: Vec<HnswNode>,
    entry_point: Option<u64>,
    max_level: usize,
    live: usize,
}

impl HnswIndex {
    /// Create an empty index.
    pub fn new(config: HnswConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            nodes: Vec::new(),
            entry_point: None,
            max_level: 0,
            live: 0,
        })
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn metric(&self) -> AnnMetric {
        self.config.metric
    }

    /// Total number of vectors ever added, including removed ones.
    ///
    /// This is also the id the next added vector receives.
    pub fn ntotal(&self) -> u64 {
        self.nodes.len() as u64
    }

    /// Number of live (not removed) vectors.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Whether `id` refers to a live vector.
    pub fn contains(&self, id: u64) -> bool {
        self.node(id).is_some_and(|node| !node.deleted)
    }

    /// Ids of all live vectors, ascending.
    pub fn live_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !node.deleted)
            .map(|(id, _)| id as u64)
    }

    /// The stored vector for a live id.
    pub fn vector(&self, id: u64) -> Option<&[f32]> {
        self.node(id)
            .filter(|node| !node.deleted)
            .map(|node| node.vector.as_slice())
    }

    /// Add vectors, returning the consecutive id range assigned to them.
    ///
    /// Every vector is validated before the graph is touched, so a dimension
    /// mismatch or a non-finite component leaves the index unchanged.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<Range<u64>> {
        for vector in vectors {
            self.check_vector(vector)?;
        }

        let start = self.ntotal();
        for vector in vectors {
            self.insert_one(vector.clone());
        }
        Ok(start..self.ntotal())
    }

    /// Tombstone the given ids. Unknown or already removed ids are ignored.
    ///
    /// Returns how many vectors were actually removed.
    pub fn remove_ids(&mut self, ids: &[u64]) -> usize {
        let mut removed = 0;
        for &id in ids {
            if let Some(node) = self.nodes.get_mut(id as usize) {
                if !node.deleted {
                    node.deleted = true;
                    removed += 1;
                }
            }
        }
        self.live -= removed;
        removed
    }

    /// Find up to `k` approximate nearest live neighbors of `query`.
    ///
    /// Results come best first as `(id, score)`, where the score is the squared
    /// euclidean distance for [`AnnMetric::L2`] and the inner product for
    /// [`AnnMetric::InnerProduct`].
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        self.check_vector(query)?;

        let Some(entry_point) = self.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 || self.live == 0 {
            return Ok(Vec::new());
        }

        let tombstones = self.nodes.len() - self.live;
        let ef = self
            .config
            .ef_search
            .max(k)
            .saturating_add(tombstones)
            .min(self.nodes.len());

        let mut entry = vec![entry_point];
        for layer in (1..=self.max_level).rev() {
            entry = self.closest_ids(query, &entry, 1, layer);
        }

        let metric = self.config.metric;
        let results = self
            .search_layer(query, &entry, ef, 0)
            .into_iter()
            .filter(|c| !self.nodes[c.id as usize].deleted)
            .take(k)
            .map(|c| (c.id, metric.score(c.distance)))
            .collect();
        Ok(results)
    }

    /// Serialize into the on-disk artifact format.
    ///
    /// Layout: magic (8 bytes), format version (u32 LE), crc32 of the body
    /// (u32 LE), body length (u64 LE), bincode body.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let mut bytes = Vec::with_capacity(body.len() + 24);
        bytes.extend_from_slice(ARTIFACT_MAGIC);
        bytes.write_u32::<LittleEndian>(ARTIFACT_VERSION)?;
        bytes.write_u32::<LittleEndian>(crc32fast::hash(&body))?;
        bytes.write_u64::<LittleEndian>(body.len() as u64)?;
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Deserialize an artifact produced by [`HnswIndex::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = Cursor::new(bytes);

        let mut magic = [0u8; 8];
        reader
            .read_exact(&mut magic)
            .map_err(|_| SemantraError::serialization("artifact too short"))?;
        if &magic != ARTIFACT_MAGIC {
            return Err(SemantraError::serialization("not an HNSW artifact"));
        }

        let version = reader.read_u32::<LittleEndian>()?;
        if version != ARTIFACT_VERSION {
            return Err(SemantraError::serialization(format!(
                "unsupported artifact version {version}"
            )));
        }
        let checksum = reader.read_u32::<LittleEndian>()?;
        let body_len = reader.read_u64::<LittleEndian>()? as usize;

        let body = &bytes[reader.position() as usize..];
        if body.len() != body_len {
            return Err(SemantraError::serialization(format!(
                "artifact body is {} bytes, header says {body_len}",
                body.len()
            )));
        }
        if crc32fast::hash(body) != checksum {
            return Err(SemantraError::serialization("artifact checksum mismatch"));
        }

        let index: HnswIndex = bincode::deserialize(body)?;
        index.check_consistency()?;
        Ok(index)
    }

    fn node(&self, id: u64) -> Option<&HnswNode> {
        self.nodes.get(id as usize)
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimension {
            return Err(SemantraError::dimension_mismatch(
                self.config.dimension,
                vector.len(),
            ));
        }
        if !vector.iter().all(|x| x.is_finite()) {
            return Err(SemantraError::invalid_argument(
                "Vector contains NaN or infinite values",
            ));
        }
        Ok(())
    }

    fn check_consistency(&self) -> Result<()> {
        self.config
            .validate()
            .map_err(|e| SemantraError::serialization(format!("artifact config: {e}")))?;

        let total = self.nodes.len() as u64;
        let mut live = 0;
        for node in &self.nodes {
            if node.vector.len() != self.config.dimension || node.neighbors.is_empty() {
                return Err(SemantraError::serialization("artifact node is malformed"));
            }
            if node.neighbors.iter().flatten().any(|&n| n >= total) {
                return Err(SemantraError::serialization(
                    "artifact references an unknown node",
                ));
            }
            if !node.deleted {
                live += 1;
            }
        }
        if live != self.live || self.entry_point.is_some_and(|ep| ep >= total) {
            return Err(SemantraError::serialization("artifact header is inconsistent"));
        }
        Ok(())
    }

    /// Layer for a node, derived from the seed and the node id only.
    fn select_level(&self, id: u64) -> usize {
        let mut rng =
            StdRng::seed_from_u64(self.config.seed ^ id.wrapping_mul(0x9E37_79B9_7F4A_7C15));
        // in (0, 1], so ln() is finite
        let uniform: f64 = 1.0 - rng.random::<f64>();
        ((-uniform.ln() * self.config.level_multiplier()).floor() as usize).min(MAX_LEVEL)
    }

    fn distance_to(&self, query: &[f32], id: u64) -> f32 {
        self.config
            .metric
            .distance(query, &self.nodes[id as usize].vector)
    }

    fn insert_one(&mut self, vector: Vec<f32>) {
        let id = self.ntotal();
        let level = self.select_level(id);
        self.nodes.push(HnswNode {
            vector,
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        });
        self.live += 1;

        let Some(entry_point) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            return;
        };

        let query = self.nodes[id as usize].vector.clone();
        let mut entry = vec![entry_point];
        for layer in (level + 1..=self.max_level).rev() {
            entry = self.closest_ids(&query, &entry, 1, layer);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates =
                self.search_layer(&query, &entry, self.config.ef_construction, layer);
            let max_conn = self.config.max_connections(layer);
            let selected: Vec<u64> = candidates
                .iter()
                .filter(|c| c.id != id)
                .take(max_conn)
                .map(|c| c.id)
                .collect();

            self.nodes[id as usize].neighbors[layer] = selected.clone();
            for &neighbor in &selected {
                self.nodes[neighbor as usize].neighbors[layer].push(id);
                if self.nodes[neighbor as usize].neighbors[layer].len() > max_conn {
                    self.prune_connections(neighbor, layer, max_conn);
                }
            }

            entry = candidates.into_iter().map(|c| c.id).collect();
        }

        if level > self.max_level {
            self.entry_point = Some(id);
            self.max_level = level;
        }
    }

    /// Keep only the `max_conn` closest neighbors of `id` at `layer`.
    fn prune_connections(&mut self, id: u64, layer: usize, max_conn: usize) {
        let node = &self.nodes[id as usize];
        let mut ranked: Vec<Candidate> = node.neighbors[layer]
            .iter()
            .map(|&n| Candidate {
                distance: self.distance_to(&node.vector, n),
                id: n,
            })
            .collect();
        ranked.sort();
        ranked.truncate(max_conn);
        self.nodes[id as usize].neighbors[layer] = ranked.into_iter().map(|c| c.id).collect();
    }

    fn closest_ids(&self, query: &[f32], entry: &[u64], ef: usize, layer: usize) -> Vec<u64> {
        self.search_layer(query, entry, ef, layer)
            .into_iter()
            .map(|c| c.id)
            .collect()
    }

    /// Beam search on one layer, returning up to `ef` candidates closest first.
    fn search_layer(
        &self,
        query: &[f32],
        entry: &[u64],
        ef: usize,
        layer: usize,
    ) -> Vec<Candidate> {
        let mut visited = BitVec::from_elem(self.nodes.len(), false);
        // min-heap of nodes to expand
        let mut frontier = BinaryHeap::new();
        // max-heap of the best `ef` found so far
        let mut best: BinaryHeap<Candidate> = BinaryHeap::new();

        for &id in entry {
            if visited.get(id as usize).unwrap_or(true) {
                continue;
            }
            visited.set(id as usize, true);
            let candidate = Candidate {
                distance: self.distance_to(query, id),
                id,
            };
            frontier.push(std::cmp::Reverse(candidate));
            best.push(candidate);
        }
        while best.len() > ef {
            best.pop();
        }

        while let Some(std::cmp::Reverse(current)) = frontier.pop() {
            if let Some(farthest) = best.peek() {
                if best.len() >= ef && current.distance > farthest.distance {
                    break;
                }
            }

            let node = &self.nodes[current.id as usize];
            let Some(neighbors) = node.neighbors.get(layer) else {
                continue;
            };
            for &neighbor in neighbors {
                if visited.get(neighbor as usize).unwrap_or(true) {
                    continue;
                }
                visited.set(neighbor as usize, true);

                let candidate = Candidate {
                    distance: self.distance_to(query, neighbor),
                    id: neighbor,
                };
                let admit = best.len() < ef
                    || best
                        .peek()
                        .is_some_and(|farthest| candidate.distance < farthest.distance);
                if admit {
                    frontier.push(std::cmp::Reverse(candidate));
                    best.push(candidate);
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        best.into_sorted_vec()
    }
}
