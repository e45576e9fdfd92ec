//! Approximate nearest-neighbor search structures.
//!
//! # Module Structure
//!
//! - `distance`: the user-facing [`DistanceMetric`] and the index-native
//!   [`AnnMetric`] it maps onto
//! - `hnsw`: the graph-based [`HnswIndex`] with its on-disk artifact format

pub mod distance;
pub mod hnsw;

pub use distance::{AnnMetric, DistanceMetric};
pub use hnsw::{HnswConfig, HnswIndex};
