//! Distance metrics for vector similarity calculation.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SemantraError};

/// Distance metric requested when a collection is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Euclidean (L2) distance, lower is closer.
    Euclidean,
    /// Dot product similarity, higher is closer.
    DotProduct,
    /// Cosine similarity, higher is closer.
    ///
    /// The index evaluates this as a plain inner product. Vectors are not
    /// normalized on the way in, so callers wanting true cosine semantics must
    /// supply unit-length vectors.
    #[default]
    Cosine,
}

impl DistanceMetric {
    /// Get the name of this distance metric.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::DotProduct => "dot_product",
            DistanceMetric::Cosine => "cosine",
        }
    }

    /// Parse a distance metric from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "dot_product" | "dot" => Ok(DistanceMetric::DotProduct),
            "cosine" => Ok(DistanceMetric::Cosine),
            _ => Err(SemantraError::invalid_argument(format!(
                "Unknown distance metric: {s}"
            ))),
        }
    }
}

/// Metric natively understood by [`HnswIndex`](crate::vector::HnswIndex).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnMetric {
    /// Squared euclidean distance; results ascend.
    L2,
    /// Raw inner product; results descend.
    InnerProduct,
}

impl From<DistanceMetric> for AnnMetric {
    fn from(metric: DistanceMetric) -> Self {
        match metric {
            DistanceMetric::Euclidean => AnnMetric::L2,
            DistanceMetric::DotProduct | DistanceMetric::Cosine => AnnMetric::InnerProduct,
        }
    }
}

impl AnnMetric {
    /// Graph-internal distance: smaller always means closer.
    #[inline]
    pub(crate) fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            AnnMetric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
            AnnMetric::InnerProduct => -a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>(),
        }
    }

    /// Convert a graph-internal distance into the score reported to callers.
    #[inline]
    pub(crate) fn score(&self, distance: f32) -> f32 {
        match self {
            AnnMetric::L2 => distance,
            AnnMetric::InnerProduct => -distance,
        }
    }

    /// Whether a higher reported score means a closer match.
    pub fn higher_is_closer(&self) -> bool {
        matches!(self, AnnMetric::InnerProduct)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AnnMetric::L2 => "l2",
            AnnMetric::InnerProduct => "inner_product",
        }
    }
}
